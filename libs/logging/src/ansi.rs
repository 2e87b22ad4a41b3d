use std::io::IsTerminal as _;

/// Whether stdout should receive ANSI color/style escapes.
///
/// Respects `NO_COLOR` (<https://no-color.org>) and falls back to a
/// terminal check otherwise.
pub fn stdout_supports_ansi() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }

    std::io::stdout().is_terminal()
}
