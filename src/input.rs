//! Recipient list loading.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};

/// One address per line. Surrounding whitespace is trimmed and blank lines
/// are skipped. Order and duplicates are kept.
pub fn parse_recipients(text: &str) -> Vec<String> {
    text.trim_start_matches('\u{feff}')
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read the whole list before anything is sent. `-` reads standard input.
pub fn read_recipients(path: &Path) -> Result<Vec<String>> {
    let text = if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read recipients from stdin")?;
        text
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read recipients from {}", path.display()))?
    };
    Ok(parse_recipients(&text))
}
