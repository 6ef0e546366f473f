//! Console output helpers.

use colored::Colorize;

use crate::state::RunStep;

/// Print the tool banner.
pub fn print_banner() {
    println!();
    println!("{}", "midl".cyan().bold());
    println!("  {}", "Polkadot validator on DigitalOcean Kubernetes".bright_black());
    println!();
}

/// Print a section header.
pub fn print_section(title: &str) {
    println!();
    println!("{}", "═".repeat(60).bright_black());
    println!("{}", title.cyan().bold());
    println!("{}", "═".repeat(60).bright_black());
    println!();
}

/// Print a completed run step.
pub fn print_run_step(step: RunStep) {
    println!(
        "{} {} {}",
        format!("[{}/{}]", step.step_number(), RunStep::TOTAL_STEPS).bright_black(),
        "▶".cyan(),
        step.description().bold()
    );
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a key-value pair.
pub fn print_kv(key: &str, value: &str) {
    println!("  {} {}", format!("{key}:").bright_black(), value.green());
}
