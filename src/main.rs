mod checks;
mod fingerprint;
mod models;
mod probe;
mod report;
mod resolver;
mod scanner;

use std::path::PathBuf;
use std::process;

use clap::Parser;
use colored::Colorize;
use log::{warn, LevelFilter};

use crate::report::Report;
use crate::scanner::ReconScanner;

/// Automated network reconnaissance scanner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target to scan: IP address, hostname, or CIDR block (e.g. 192.168.1.0/24)
    #[arg(short, long)]
    target: String,

    /// Write a JSON report to this path (an HTML report lands alongside it)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Concurrent workers for port and web probing
    #[arg(long, default_value_t = 10)]
    threads: usize,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn print_banner() {
    let banner = r#"
                __
   ____   _____/  |________   ____   ____  ____   ____
  /    \_/ __ \   __\_  __ \_/ __ \_/ ___\/  _ \ /    \
 |   |  \  ___/|  |  |  | \/\  ___/\  \__(  <_> )   |  \
 |___|  /\___  >__|  |__|    \___  >\___  >____/|___|  /
      \/     \/                  \/     \/           \/
"#;
    println!("{}", banner.cyan());
    println!("{}\n", "  unauthenticated network recon scanner".dimmed());
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .target(env_logger::Target::Stdout)
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    print_banner();
    init_logging(args.verbose);

    let scanner = ReconScanner::new(&args.target, args.threads, args.verbose);

    let results = tokio::select! {
        outcome = scanner.run() => match outcome {
            Ok(results) => results,
            Err(e) => {
                eprintln!("{} {:#}", "Scan failed:".red().bold(), e);
                process::exit(1);
            }
        },
        _ = tokio::signal::ctrl_c() => {
            println!("\n{}", "Scan interrupted by user".yellow());
            process::exit(0);
        }
    };

    let report = Report::new(&results);
    report.display_console();

    // Report files are best effort; the scan already ran and printed.
    if let Some(path) = &args.output {
        match report.save_json(path) {
            Ok(()) => println!("\n{} {}", "JSON report saved to".bold(), path.display()),
            Err(e) => warn!("{:#}", e),
        }
        let html_path = Report::html_sibling(path);
        match report.save_html(&html_path) {
            Ok(()) => println!("{} {}", "HTML report saved to".bold(), html_path.display()),
            Err(e) => warn!("{:#}", e),
        }
    }
}
