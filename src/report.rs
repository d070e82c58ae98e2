use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;

use crate::models::{Finding, ScanResults};

/// Pure formatter over a completed scan aggregate: console summary, JSON
/// serialization and an HTML rendering. Computes nothing new beyond the
/// vulnerability count.
pub struct Report<'a> {
    results: &'a ScanResults,
    scan_time: String,
    duration: f64,
    vuln_count: usize,
}

impl<'a> Report<'a> {
    pub fn new(results: &'a ScanResults) -> Self {
        Self {
            results,
            scan_time: results.start_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            duration: results.duration_secs(),
            vuln_count: results.vuln_count(),
        }
    }

    /// Prints the summary block and, when anything was found, a table of
    /// the vulnerable findings.
    pub fn display_console(&self) {
        println!("\n{}", "===== Scan Report =====".green().bold());
        println!("{} {}", "Target:".bold(), self.results.target);
        println!("{} {}", "Scan time:".bold(), self.scan_time);
        println!("{} {:.2} seconds", "Duration:".bold(), self.duration);
        println!("{} {}", "Vulnerabilities found:".bold(), self.vuln_count);

        if self.vuln_count == 0 {
            println!("{}", "No vulnerabilities detected!".blue().bold());
            return;
        }

        println!();
        println!(
            "{:<12} {:<40} {}",
            "TYPE".cyan().bold(),
            "TARGET".cyan().bold(),
            "DETAILS".cyan().bold()
        );
        for (category, target, details) in self.vulnerable_rows() {
            println!("{:<12} {:<40} {}", category.cyan(), target.green(), details.red());
        }
    }

    /// One row per vulnerable finding, in category order.
    fn vulnerable_rows(&self) -> Vec<(String, String, String)> {
        let mut rows = Vec::new();
        for (category, findings) in &self.results.findings {
            for finding in findings.iter().filter(|f| f.vulnerable) {
                rows.push((
                    category_label(category).to_string(),
                    row_target(finding),
                    row_details(finding),
                ));
            }
        }
        rows
    }

    /// JSON envelope: `{target, scan_time, duration, vuln_count, results}`.
    pub fn to_json(&self) -> Result<String> {
        let envelope = json!({
            "target": self.results.target,
            "scan_time": self.scan_time,
            "duration": format!("{:.2} seconds", self.duration),
            "vuln_count": self.vuln_count,
            "results": self.results,
        });
        serde_json::to_string_pretty(&envelope).context("failed to serialize scan results")
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)
            .with_context(|| format!("failed to write JSON report to {}", path.display()))
    }

    /// The HTML report lives next to the JSON file, same stem.
    pub fn html_sibling(path: &Path) -> PathBuf {
        path.with_extension("html")
    }

    pub fn save_html(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_html())
            .with_context(|| format!("failed to write HTML report to {}", path.display()))
    }

    /// Standalone styled page: header, summary block, vulnerability table.
    pub fn to_html(&self) -> String {
        let mut html = format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>netrecon scan report - {target}</title>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 20px; }}
        h1, h2 {{ color: #2c3e50; }}
        .header {{ background-color: #3498db; color: white; padding: 10px; border-radius: 5px; }}
        .summary {{ background-color: #f8f9fa; padding: 15px; border-radius: 5px; margin: 20px 0; }}
        table {{ border-collapse: collapse; width: 100%; margin: 20px 0; }}
        th, td {{ border: 1px solid #ddd; padding: 8px; text-align: left; }}
        th {{ background-color: #f2f2f2; }}
        tr:nth-child(even) {{ background-color: #f9f9f9; }}
        .vuln-high {{ color: #e74c3c; }}
        .footer {{ margin-top: 30px; text-align: center; font-size: 0.8em; color: #7f8c8d; }}
    </style>
</head>
<body>
    <div class="header">
        <h1>netrecon scan report</h1>
    </div>

    <div class="summary">
        <h2>Scan summary</h2>
        <p><strong>Target:</strong> {target}</p>
        <p><strong>Scan time:</strong> {scan_time}</p>
        <p><strong>Duration:</strong> {duration:.2} seconds</p>
        <p><strong>Vulnerabilities found:</strong> {vuln_count}</p>
    </div>
"#,
            target = self.results.target,
            scan_time = self.scan_time,
            duration = self.duration,
            vuln_count = self.vuln_count,
        );

        if self.vuln_count > 0 {
            html.push_str(
                r#"    <div class="vulnerabilities">
        <h2>Vulnerabilities</h2>
        <table>
            <tr>
                <th>Type</th>
                <th>Target</th>
                <th>Details</th>
            </tr>
"#,
            );
            for (category, target, details) in self.vulnerable_rows() {
                html.push_str(&format!(
                    "            <tr>\n                <td>{}</td>\n                <td>{}</td>\n                <td class=\"vuln-high\">{}</td>\n            </tr>\n",
                    category, target, details
                ));
            }
            html.push_str("        </table>\n    </div>\n");
        } else {
            html.push_str(
                r#"    <div class="no-vulnerabilities">
        <h2>Scan results</h2>
        <p>No vulnerabilities detected!</p>
    </div>
"#,
            );
        }

        html.push_str(
            r#"    <div class="footer">
        <p>Generated by netrecon, an automated network reconnaissance scanner</p>
    </div>
</body>
</html>
"#,
        );
        html
    }
}

fn category_label(key: &str) -> &str {
    match key {
        "wordpress" => "WordPress",
        "craftcms" => "Craft CMS",
        "smb" => "SMB",
        "zyxel" => "Zyxel",
        other => other,
    }
}

fn row_target(finding: &Finding) -> String {
    match &finding.share {
        Some(share) => format!("{} ({})", finding.target, share),
        None => finding.target.clone(),
    }
}

fn row_details(finding: &Finding) -> String {
    match &finding.version {
        Some(version) => format!("{} (version {})", finding.details, version),
        None => finding.details.clone(),
    }
}
