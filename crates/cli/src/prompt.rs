//! Small interactive-prompt helpers for `add`/`edit` (§6).

use std::io::{self, Write};

/// Prompts for a line of input. Returns `None` if the user enters nothing.
pub fn prompt(label: &str) -> anyhow::Result<Option<String>> {
    print!("{label}: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let trimmed = line.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

/// Prompts with a default shown inline; blank input keeps the default.
pub fn prompt_with_default(label: &str, default: &str) -> anyhow::Result<String> {
    let shown = if default.is_empty() { label.to_string() } else { format!("{label} [{default}]") };
    Ok(prompt(&shown)?.unwrap_or_else(|| default.to_string()))
}

/// `y`/`yes` (case-insensitive) confirms; anything else declines.
pub fn confirm(label: &str) -> anyhow::Result<bool> {
    let answer = prompt(&format!("{label} (y/N)"))?;
    Ok(matches!(answer.as_deref(), Some("y" | "Y" | "yes" | "Yes")))
}
