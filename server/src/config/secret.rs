//! `.secret` file support
//!
//! The file holds `KEY=VALUE` lines in dotenv style. Values are only used as
//! a fallback for variables missing from the environment; the process
//! environment itself is never modified.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;

/// Default secret file name, looked up in the working directory
pub const SECRET_FILE_NAME: &str = ".secret";

/// Parse secret file content into a map
pub fn parse_secrets(content: &str) -> HashMap<String, String> {
    let mut secrets = HashMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = parse_value(value.trim());

        if !key.is_empty() {
            secrets.insert(key.to_string(), value.to_string());
        }
    }

    secrets
}

/// Unquote a value, or cut an unquoted one at a ` #` comment
fn parse_value(raw: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(rest) = raw.strip_prefix(quote) {
            if let Some(end) = rest.find(quote) {
                return &rest[..end];
            }
        }
    }

    let comment = raw
        .char_indices()
        .find(|&(i, c)| c == '#' && (i == 0 || raw[..i].ends_with(char::is_whitespace)));
    match comment {
        Some((i, _)) => raw[..i].trim_end(),
        None => raw,
    }
}

/// Load a secret file; a missing file yields an empty map
pub async fn load_secrets(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        tracing::debug!("No secret file at {}", path.display());
        return Ok(HashMap::new());
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read secret file: {}", path.display()))?;
    let secrets = parse_secrets(&content);
    tracing::debug!("Loaded {} entries from {}", secrets.len(), path.display());
    Ok(secrets)
}
