use std::fs;
use std::path::Path;

/// Clickable file:// link for terminals that understand OSC 8; relative paths are resolved
/// when the file exists
pub fn osc8_file_link(path: &Path, text: &str) -> String {
    let target = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    format!(
        "\x1b]8;;file://{}\x1b\\{}\x1b]8;;\x1b\\",
        target.display(),
        text
    )
}
