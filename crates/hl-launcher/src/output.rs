//! Colored status lines for the terminal

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

fn print_tagged(mut out: impl std::io::Write, color: Color, tag: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(tag),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    print_tagged(std::io::stdout(), Color::Green, "✓ ", msg);
}

/// Print an error message in red with an X prefix, to stderr
pub fn print_error(msg: &str) {
    print_tagged(std::io::stderr(), Color::Red, "✗ ", msg);
}

/// Print a warning message in yellow, to stderr
pub fn print_warning(msg: &str) {
    print_tagged(std::io::stderr(), Color::Yellow, "⚠ ", msg);
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    print_tagged(std::io::stdout(), Color::Cyan, "ℹ ", msg);
}
