//! TOML parser with helpful error messages

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::schema::GatherConfig;

/// `gather/gather.toml` under the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gather").join("gather.toml"))
}

/// Load the config at the default path, falling back to defaults if absent.
pub fn load_default_config() -> Result<GatherConfig> {
    match default_config_path() {
        Some(path) if path.exists() => load_config(&path),
        _ => Ok(GatherConfig::default()),
    }
}

/// Parse gather.toml with detailed error messages
pub fn load_config(path: &Path) -> Result<GatherConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse gather.toml content from string
pub fn parse_config_str(content: &str) -> Result<GatherConfig> {
    let config: GatherConfig =
        toml::from_str(content).map_err(|e| enhance_toml_error(e, content))?;

    config.validate()?;

    Ok(config)
}

/// Enhance TOML parsing errors with the surrounding lines
fn enhance_toml_error(error: toml::de::Error, content: &str) -> anyhow::Error {
    let message = error.message().to_string();

    let Some(span) = error.span() else {
        return anyhow::anyhow!("TOML parsing error: {}", message);
    };

    let line_num = content[..span.start.min(content.len())]
        .bytes()
        .filter(|b| *b == b'\n')
        .count()
        + 1;
    anyhow::anyhow!(
        "TOML parsing error at line {}:\n{}\n\nError: {}",
        line_num,
        line_context(content, line_num),
        message
    )
}

/// Get context lines around an error
fn line_context(content: &str, line_num: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = line_num.saturating_sub(2);
    let end = (line_num + 1).min(lines.len());

    lines[start.min(end)..end]
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let num = start + i + 1;
            let marker = if num == line_num { ">>>" } else { "   " };
            format!("{} {:4} | {}", marker, num, line)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
