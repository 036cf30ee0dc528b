// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use tracing::debug;

use crate::schema::{Config, ConfigError, RawConfig};

/// Hard cap on the config file's size (spec §6.4).
const MAX_CONFIG_BYTES: u64 = 64 * 1024;

/// `~/.twiddle/twiddle.toml` (`%USERPROFILE%\.twiddle\twiddle.toml` on
/// Windows, via `dirs::home_dir`'s platform-aware resolution).
fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".twiddle").join("twiddle.toml"))
}

/// Load `~/.twiddle/twiddle.toml`, falling back to [`Config::default`] when
/// the file does not exist. `OPENAI_API_KEY` fills in a missing `api_key`.
pub fn load() -> Result<Config, ConfigError> {
    let mut config = match config_path() {
        Some(path) if path.is_file() => load_from(&path)?,
        _ => Config::default(),
    };

    if config.api_key.is_none() {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.is_empty() {
                config.api_key = Some(key.into());
            }
        }
    }

    Ok(config)
}

fn load_from(path: &std::path::Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let meta = std::fs::metadata(path)
        .map_err(|e| ConfigError::ConfigParseFailed(format!("reading {}: {e}", path.display())))?;
    if meta.len() > MAX_CONFIG_BYTES {
        return Err(ConfigError::ConfigTooLarge {
            limit: MAX_CONFIG_BYTES,
        });
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ConfigParseFailed(format!("reading {}: {e}", path.display())))?;
    let raw: RawConfig = toml::from_str(&text)
        .map_err(|e| ConfigError::ConfigParseFailed(format!("parsing {}: {e}", path.display())))?;
    raw.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_loads_defaults() {
        let cfg = load_from(std::path::Path::new("/nonexistent/twiddle.toml"));
        assert!(cfg.is_err());
    }

    #[test]
    fn parses_explicit_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            "base_url = \"https://example.test\"\nmodel = \"x\"\nsandbox_mode = \"workspace-write\"\napproval_policy = \"never\""
        )
        .unwrap();
        let cfg = load_from(f.path()).unwrap();
        assert_eq!(cfg.base_url, "https://example.test");
        assert_eq!(cfg.model, "x");
        assert_eq!(cfg.sandbox_mode, twiddle_sandbox::SandboxMode::WorkspaceWrite);
        assert_eq!(cfg.approval_policy, crate::ApprovalPolicy::Never);
    }

    #[test]
    fn oversize_file_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let filler = "x".repeat(MAX_CONFIG_BYTES as usize + 1);
        writeln!(f, "# {filler}").unwrap();
        let err = load_from(f.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ConfigTooLarge { .. }));
    }

    #[test]
    fn malformed_toml_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "this is not = = toml").unwrap();
        let err = load_from(f.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ConfigParseFailed(_)));
    }
}
