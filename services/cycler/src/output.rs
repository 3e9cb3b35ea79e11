//! Output formatting for CLI commands.

use colored::Colorize;
use serde::Serialize;
use tabled::{Table, Tabled};
use vmcycle_cycler::SchedulerError;

/// Output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
}

/// Print rows as a table, or `json_value` as JSON.
pub fn print_output<T: Tabled, J: Serialize>(rows: &[T], json_value: &J, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("{}", "No workers found.".dimmed());
            } else {
                println!("{}", Table::new(rows));
            }
        }
        OutputFormat::Json => match serde_json::to_string_pretty(json_value) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("{} {}", "Error:".red().bold(), e),
        },
    }
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "Success:".green().bold(), message);
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "Info:".blue().bold(), message);
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "Warning:".yellow().bold(), message);
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    if let Some(SchedulerError::EmptyPool) = err.downcast_ref::<SchedulerError>() {
        eprintln!(
            "\n{}",
            "Hint: create instances in the worker manager, or check --manager-path.".yellow()
        );
    }
}
