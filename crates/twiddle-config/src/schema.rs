// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::Deserialize;
use thiserror::Error;
use twiddle_sandbox::SandboxMode;
use zeroize::Zeroizing;

/// What to do when a tool requires `workspace_write` but the sandbox is
/// configured `read-only`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPolicy {
    /// Prompt the user once; a grant persists for the rest of the session.
    OnRequest,
    /// Never prompt — escalation requests always fail.
    Never,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("api key missing: set api_key in the config file or OPENAI_API_KEY")]
    ApiKeyMissing,
    #[error("failed to parse config: {0}")]
    ConfigParseFailed(String),
    #[error("config file exceeds {limit} bytes")]
    ConfigTooLarge { limit: u64 },
}

/// Resolved configuration used to drive the chat client and sandbox.
///
/// `api_key` is wrapped in [`Zeroizing`] so the credential bytes are
/// scrubbed from memory when the config is dropped (spec §6.5, §9).
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<Zeroizing<String>>,
    pub sandbox_mode: SandboxMode,
    pub approval_policy: ApprovalPolicy,
    /// Token budget used to compute the end-of-turn context-usage summary.
    /// Not part of the wire protocol — purely a local display figure.
    pub context_window: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api".to_string(),
            model: "openai/gpt-5-codex".to_string(),
            api_key: None,
            sandbox_mode: SandboxMode::ReadOnly,
            approval_policy: ApprovalPolicy::OnRequest,
            context_window: 128_000,
        }
    }
}

impl Config {
    /// The credential to send with requests, failing with `ApiKeyMissing`
    /// if neither the config file nor the environment provided one.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .map(|s| s.as_str())
            .ok_or(ConfigError::ApiKeyMissing)
    }
}

/// Mirror of the TOML file's shape before validation — every field is
/// optional so a partially-specified file still parses, with unknown enum
/// values and blank strings caught explicitly afterward rather than by
/// serde (which would just reject the whole document).
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub sandbox_mode: Option<String>,
    pub approval_policy: Option<String>,
    pub context_window: Option<u64>,
}

impl RawConfig {
    pub(crate) fn validate(self) -> Result<Config, ConfigError> {
        let defaults = Config::default();

        let base_url = non_empty("base_url", self.base_url)?.unwrap_or(defaults.base_url);
        let model = non_empty("model", self.model)?.unwrap_or(defaults.model);
        let api_key = non_empty("api_key", self.api_key)?.map(Zeroizing::new);

        let sandbox_mode = match non_empty("sandbox_mode", self.sandbox_mode)? {
            None => defaults.sandbox_mode,
            Some(s) => match s.as_str() {
                "read-only" => SandboxMode::ReadOnly,
                "workspace-write" => SandboxMode::WorkspaceWrite,
                "danger-full-access" => SandboxMode::DangerFullAccess,
                other => {
                    return Err(ConfigError::ConfigParseFailed(format!(
                        "unknown sandbox_mode '{other}'"
                    )))
                }
            },
        };

        let approval_policy = match non_empty("approval_policy", self.approval_policy)? {
            None => defaults.approval_policy,
            Some(s) => match s.as_str() {
                "on-request" => ApprovalPolicy::OnRequest,
                "never" => ApprovalPolicy::Never,
                other => {
                    return Err(ConfigError::ConfigParseFailed(format!(
                        "unknown approval_policy '{other}'"
                    )))
                }
            },
        };

        let context_window = self.context_window.unwrap_or(defaults.context_window);

        Ok(Config {
            base_url,
            model,
            api_key,
            sandbox_mode,
            approval_policy,
            context_window,
        })
    }
}

/// Reject an explicitly-empty string (spec §6.4: "Any empty string ... →
/// ConfigParseFailed"); `None` (field absent) passes through untouched.
fn non_empty(field: &str, value: Option<String>) -> Result<Option<String>, ConfigError> {
    match value {
        None => Ok(None),
        Some(s) if s.is_empty() => Err(ConfigError::ConfigParseFailed(format!(
            "'{field}' must not be empty"
        ))),
        Some(s) => Ok(Some(s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_raw_config_yields_defaults() {
        let cfg = RawConfig::default().validate().unwrap();
        assert_eq!(cfg.base_url, "https://openrouter.ai/api");
        assert_eq!(cfg.model, "openai/gpt-5-codex");
        assert_eq!(cfg.sandbox_mode, SandboxMode::ReadOnly);
        assert_eq!(cfg.approval_policy, ApprovalPolicy::OnRequest);
    }

    #[test]
    fn unknown_sandbox_mode_rejected() {
        let raw = RawConfig {
            sandbox_mode: Some("read-write".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            raw.validate(),
            Err(ConfigError::ConfigParseFailed(_))
        ));
    }

    #[test]
    fn empty_model_rejected() {
        let raw = RawConfig {
            model: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(
            raw.validate(),
            Err(ConfigError::ConfigParseFailed(_))
        ));
    }

    #[test]
    fn require_api_key_missing() {
        let cfg = Config::default();
        assert!(matches!(
            cfg.require_api_key(),
            Err(ConfigError::ApiKeyMissing)
        ));
    }
}
