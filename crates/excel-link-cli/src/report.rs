//! Top-level error reporting.
//!
//! Failures that escape a command, and panics, end up here and are printed as
//! a framed block on stderr so they stand out from the streamed output.

use std::any::Any;
use std::panic;

/// Print an error and its cause chain.
pub fn print_error(err: &anyhow::Error) {
    tracing::error!("{err:#}");
    eprint!("{}", frame("excel-link failed", &error_lines(err)));
}

/// Report panics through the same framed message.
pub fn install_panic_hook() {
    panic::set_hook(Box::new(|info| {
        let message = panic_message(info.payload());
        let mut lines = vec![message.clone()];
        if let Some(location) = info.location() {
            lines.push(format!("at {}:{}", location.file(), location.line()));
        }
        tracing::error!(%message, "panic");
        eprint!("{}", frame("Unexpected error", &lines));
    }));
}

fn error_lines(err: &anyhow::Error) -> Vec<String> {
    let mut lines = vec![err.to_string()];
    lines.extend(err.chain().skip(1).map(|cause| format!("caused by: {cause}")));
    lines
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn frame(title: &str, lines: &[String]) -> String {
    let width = lines
        .iter()
        .map(|l| l.chars().count())
        .chain(std::iter::once(title.chars().count()))
        .max()
        .unwrap_or(0);
    let rule = "─".repeat(width + 2);

    let mut out = format!("┌{rule}┐\n");
    out.push_str(&format!("│ {title:<width$} │\n"));
    out.push_str(&format!("├{rule}┤\n"));
    for line in lines {
        out.push_str(&format!("│ {line:<width$} │\n"));
    }
    out.push_str(&format!("└{rule}┘\n"));
    out
}
