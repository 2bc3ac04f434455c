//! Human-facing status lines printed when a tool finishes.

use colored::Colorize;
use std::error::Error;
use std::fmt::Display;

/// One green line on stderr naming what was done.
pub fn success(tool: &str, what: impl Display) {
    eprintln!("{} {}", format!("{tool}:").green().bold(), what);
}

/// The error and its causes, one per line, in red.
pub fn failure(tool: &str, err: &(dyn Error + 'static)) {
    eprintln!("{}", failure_message(tool, err).red());
}

pub fn failure_message(tool: &str, err: &(dyn Error + 'static)) -> String {
    let mut message = format!("{tool}: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        // `#[error(transparent)]` and `{0}` wrappers repeat their source.
        if !message.contains(&cause_text) {
            message.push_str(&format!("\n  caused by: {cause_text}"));
        }
        source = cause.source();
    }
    message
}
