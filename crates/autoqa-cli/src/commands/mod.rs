//! Stage subcommands and their shared file plumbing.

pub mod checklist;
pub mod gate;
pub mod ingest;
pub mod manifest;
pub mod reconcile;

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use autoqa_core::config::AutoQaConfig;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Exit codes for stage commands.
pub mod exit_codes {
    /// Success exit code.
    pub const SUCCESS: u8 = 0;
    /// The merge gate declined.
    pub const DECLINED: u8 = 2;
}

/// Path that stands for standard input.
const STDIN_PATH: &str = "-";

/// Loads the configuration file, or defaults, with environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<AutoQaConfig> {
    let mut config = match path {
        Some(path) => AutoQaConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => AutoQaConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("invalid environment override")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Reads a file, or stdin for `-`.
pub fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    if path.as_os_str() == STDIN_PATH {
        let mut buffer = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buffer)
            .context("failed to read stdin")?;
        return Ok(buffer);
    }
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

/// Reads a UTF-8 text file, or stdin for `-`.
pub fn read_text(path: &Path) -> Result<String> {
    String::from_utf8(read_bytes(path)?)
        .with_context(|| format!("{} is not valid UTF-8", path.display()))
}

/// Reads a JSON document.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = read_bytes(path)?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse JSON document {}", path.display()))
}

/// Reads an optional JSON document.
pub fn read_optional_json<T: DeserializeOwned>(path: Option<&PathBuf>) -> Result<Option<T>> {
    path.map(|path| read_json(path)).transpose()
}

/// Writes text to `output`, or stdout when absent.
pub fn write_text(text: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("failed to write {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(text.as_bytes())
                .context("failed to write stdout")?;
            stdout.flush().context("failed to flush stdout")
        },
    }
}

/// Writes a pretty-printed JSON document to `output`, or stdout.
pub fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value).context("failed to encode JSON")?;
    json.push('\n');
    write_text(&json, output)
}
