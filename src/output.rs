//! Operator-facing status lines and diagnostic logging setup.

use colored::Colorize;
use std::fmt::Display;
use tracing_subscriber::EnvFilter;

/// Installs the tracing subscriber. `RUST_LOG` wins over the flags.
pub fn init_tracing(verbose: bool, debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(verbose, debug)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// `--verbose` surfaces the step events (vhost commits, certificate and pool
/// changes), `--debug` adds every external command.
fn default_level(verbose: bool, debug: bool) -> &'static str {
    if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    }
}

pub fn section(title: impl Display) {
    println!("\n=== {} ===", title);
}

/// Something is about to be created or changed.
pub fn log(message: impl Display) {
    println!("\n{}", format!("[CREATE] {}", message).green().bold());
}

pub fn verify(message: impl Display) {
    println!("{}", format!("[VERIFY] {}", message).cyan());
}

pub fn skip(message: impl Display) {
    println!("{}", format!("[SKIP]   {}", message).bright_black());
}

pub fn fix(message: impl Display) {
    println!("{}", format!("[FIX]    {}", message).yellow().bold());
}

pub fn warn(message: impl Display) {
    println!("\n{}", format!("[!] {}", message).yellow().bold());
}

pub fn error(message: impl Display) {
    eprintln!("\n{}", format!("[-] {}", message).red().bold());
}

pub fn ok(message: impl Display) {
    println!("{}", format!("[✓] {}", message).green().bold());
}
