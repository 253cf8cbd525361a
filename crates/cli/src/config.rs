use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use agent::{BackendCandidate, GeminiBackend, OpenAiBackend, SelectionMode};
use channels::WhatsAppBridgeConfig;
use gateway::{ReconnectPolicy, RouterPolicy};
use proto::ConfigError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Top-level configuration loaded from `config.toml` plus environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// WhatsApp Web bridge config.
///
/// Configure via `[whatsapp]` in `config.toml` or environment variables:
/// - `WHATSAPP_SESSION_DIR`: directory for session credentials (default: `~/.wagpt/whatsapp-session`)
/// - `WHATSAPP_BRIDGE_PATH`: path to the Node.js bridge script (default: bundled `whatsapp-bridge/index.js`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default = "default_whatsapp_session_dir")]
    pub session_dir: String,
    /// `None` = bundled default.
    #[serde(default)]
    pub bridge_path: Option<String>,
    #[serde(default = "default_node_command")]
    pub node_command: String,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            session_dir: default_whatsapp_session_dir(),
            bridge_path: None,
            node_command: default_node_command(),
        }
    }
}

impl WhatsAppConfig {
    pub fn effective_bridge_path(&self) -> &str {
        self.bridge_path
            .as_deref()
            .unwrap_or("whatsapp-bridge/index.js")
    }

    pub fn bridge_config(&self) -> WhatsAppBridgeConfig {
        WhatsAppBridgeConfig {
            node_command: self.node_command.clone(),
            ..WhatsAppBridgeConfig::new(self.effective_bridge_path())
        }
    }
}

fn default_whatsapp_session_dir() -> String {
    wagpt_home().join("whatsapp-session").display().to_string()
}

fn default_node_command() -> String {
    "node".to_string()
}

/// Completion backends and selection behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default)]
    pub mode: SelectionMode,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            mode: SelectionMode::default(),
            request_timeout_secs: default_request_timeout_secs(),
            gemini: GeminiConfig::default(),
            openai: OpenAiConfig::default(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    /// Empty disables Gemini candidates.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_gemini_models")]
    pub models: Vec<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            models: default_gemini_models(),
            base_url: None,
        }
    }
}

fn default_gemini_models() -> Vec<String> {
    ["gemini-1.5-flash", "gemini-1.5-pro", "gemini-pro"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Empty disables OpenAI candidates.
    #[serde(default)]
    pub api_key: String,
    /// OpenAI-compatible endpoint; `None` = api.openai.com.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_openai_models")]
    pub models: Vec<String>,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            models: default_openai_models(),
        }
    }
}

fn default_openai_models() -> Vec<String> {
    vec!["gpt-4o-mini".to_string()]
}

impl CompletionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Backend candidates in probe order: Gemini models, then OpenAI models.
    /// Providers without an API key contribute nothing.
    pub fn candidates(&self) -> Vec<BackendCandidate> {
        let timeout = self.request_timeout();
        let mut candidates: Vec<BackendCandidate> = Vec::new();

        if !self.gemini.api_key.is_empty() {
            for model in &self.gemini.models {
                let backend = match &self.gemini.base_url {
                    Some(base) => {
                        GeminiBackend::with_base_url(&self.gemini.api_key, base, model, timeout)
                    }
                    None => GeminiBackend::new(&self.gemini.api_key, model, timeout),
                };
                candidates.push(Arc::new(backend));
            }
        }

        if !self.openai.api_key.is_empty() {
            for model in &self.openai.models {
                let backend = match &self.openai.base_url {
                    Some(base) => {
                        OpenAiBackend::with_base_url(&self.openai.api_key, base, model, timeout)
                    }
                    None => OpenAiBackend::new(&self.openai.api_key, model, timeout),
                };
                candidates.push(Arc::new(backend));
            }
        }

        candidates
    }
}

/// Which messages may trigger completions.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouterConfig {
    #[serde(default)]
    pub allow_self_trigger: bool,
}

impl RouterConfig {
    pub fn policy(&self) -> RouterPolicy {
        RouterPolicy {
            allow_self_trigger: self.allow_self_trigger,
        }
    }
}

/// Reconnect backoff after recoverable closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    /// `None` = retry forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            max_attempts: None,
        }
    }
}

fn default_initial_delay_secs() -> u64 {
    3
}

fn default_max_delay_secs() -> u64 {
    60
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        let initial_delay = Duration::from_secs(self.initial_delay_secs);
        ReconnectPolicy {
            initial_delay,
            max_delay: Duration::from_secs(self.max_delay_secs).max(initial_delay),
            max_attempts: self.max_attempts,
        }
    }
}

/// `~/.wagpt`, or `./.wagpt` when `HOME` is unset.
pub fn wagpt_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".wagpt")
}

fn parse_env<T>(field: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            field: field.to_string(),
            reason: e.to_string(),
        })
}

fn parse_bool_env(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}

fn parse_list_env(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    /// Loads configuration from explicit path, fallback locations, and env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path.map(|p| p.to_path_buf()).or_else(|| {
            let cwd = std::env::current_dir().ok()?.join("config.toml");
            if cwd.exists() {
                return Some(cwd);
            }
            let home_config = wagpt_home().join("config.toml");
            if home_config.exists() {
                return Some(home_config);
            }
            None
        });
        debug!(path = ?config_path, "Config file resolved");

        let mut config = if let Some(path) = config_path {
            let content = std::fs::read_to_string(&path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(|e| ConfigError::Toml(e.to_string()))?
        } else {
            Config::default()
        };

        config.apply_env()?;
        config.validate()?;

        debug!(
            mode = ?config.completion.mode,
            gemini = !config.completion.gemini.api_key.is_empty(),
            openai = !config.completion.openai.api_key.is_empty(),
            session_dir = %config.whatsapp.session_dir,
            "Config loaded"
        );
        Ok(config)
    }

    /// A provider with a key but no models would silently contribute no
    /// candidates.
    fn validate(&self) -> Result<(), ConfigError> {
        let completion = &self.completion;
        if !completion.gemini.api_key.is_empty() && completion.gemini.models.is_empty() {
            return Err(ConfigError::MissingField("completion.gemini.models".to_string()));
        }
        if !completion.openai.api_key.is_empty() && completion.openai.models.is_empty() {
            return Err(ConfigError::MissingField("completion.openai.models".to_string()));
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        // Completion providers
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            self.completion.gemini.api_key = key;
        }
        if let Ok(models) = std::env::var("GEMINI_MODELS") {
            self.completion.gemini.models = parse_list_env(&models);
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.completion.openai.api_key = key;
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL")
            && !url.trim().is_empty()
        {
            self.completion.openai.base_url = Some(url);
        }
        if let Ok(models) = std::env::var("OPENAI_MODELS") {
            self.completion.openai.models = parse_list_env(&models);
        }
        if let Ok(mode) = std::env::var("WAGPT_COMPLETION_MODE") {
            self.completion.mode = parse_env("WAGPT_COMPLETION_MODE", &mode)?;
        }

        // Router
        if let Ok(flag) = std::env::var("WAGPT_ALLOW_SELF_TRIGGER") {
            self.router.allow_self_trigger = parse_bool_env("WAGPT_ALLOW_SELF_TRIGGER", &flag)?;
        }

        // WhatsApp
        if let Ok(dir) = std::env::var("WHATSAPP_SESSION_DIR") {
            self.whatsapp.session_dir = dir;
        }
        if let Ok(bridge) = std::env::var("WHATSAPP_BRIDGE_PATH") {
            self.whatsapp.bridge_path = Some(bridge);
        }

        // Reconnect
        if let Ok(secs) = std::env::var("WAGPT_RECONNECT_DELAY_SECS") {
            self.reconnect.initial_delay_secs = parse_env("WAGPT_RECONNECT_DELAY_SECS", &secs)?;
        }
        if let Ok(max) = std::env::var("WAGPT_RECONNECT_MAX_ATTEMPTS") {
            self.reconnect.max_attempts = if max.trim().is_empty() {
                None
            } else {
                Some(parse_env("WAGPT_RECONNECT_MAX_ATTEMPTS", &max)?)
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{EnvGuard, with_locked_env};

    const ENV_KEYS: &[&str] = &[
        "GEMINI_API_KEY",
        "GEMINI_MODELS",
        "OPENAI_API_KEY",
        "OPENAI_BASE_URL",
        "OPENAI_MODELS",
        "WAGPT_COMPLETION_MODE",
        "WAGPT_ALLOW_SELF_TRIGGER",
        "WHATSAPP_SESSION_DIR",
        "WHATSAPP_BRIDGE_PATH",
        "WAGPT_RECONNECT_DELAY_SECS",
        "WAGPT_RECONNECT_MAX_ATTEMPTS",
    ];

    fn write_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, content).expect("write config");
    }

    #[test]
    fn default_config_has_expected_values() {
        let cfg = Config::default();
        assert_eq!(cfg.completion.mode, SelectionMode::DiscoverOnce);
        assert_eq!(cfg.completion.request_timeout_secs, 60);
        assert_eq!(
            cfg.completion.gemini.models,
            vec!["gemini-1.5-flash", "gemini-1.5-pro", "gemini-pro"]
        );
        assert_eq!(cfg.completion.openai.models, vec!["gpt-4o-mini"]);
        assert!(!cfg.router.allow_self_trigger);
        assert_eq!(cfg.reconnect.initial_delay_secs, 3);
        assert_eq!(cfg.reconnect.max_attempts, None);
        assert_eq!(cfg.whatsapp.effective_bridge_path(), "whatsapp-bridge/index.js");
        assert!(cfg.whatsapp.session_dir.ends_with("whatsapp-session"));
    }

    #[test]
    fn load_reads_explicit_toml_file() {
        with_locked_env(|| {
            let _env = EnvGuard::cleared(ENV_KEYS);
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("custom.toml");
            write_file(
                &path,
                r#"
[whatsapp]
session_dir = "/srv/wagpt/session"
bridge_path = "/opt/bridge/index.js"

[completion]
mode = "per_request"
request_timeout_secs = 15

[completion.gemini]
api_key = "file-gemini"
models = ["gemini-2.0-flash"]

[router]
allow_self_trigger = true

[reconnect]
initial_delay_secs = 5
max_delay_secs = 30
max_attempts = 4
"#,
            );

            let cfg = Config::load(Some(&path)).expect("config load");
            assert_eq!(cfg.whatsapp.session_dir, "/srv/wagpt/session");
            assert_eq!(cfg.whatsapp.effective_bridge_path(), "/opt/bridge/index.js");
            assert_eq!(cfg.completion.mode, SelectionMode::PerRequest);
            assert_eq!(cfg.completion.request_timeout(), Duration::from_secs(15));
            assert_eq!(cfg.completion.gemini.api_key, "file-gemini");
            assert_eq!(cfg.completion.gemini.models, vec!["gemini-2.0-flash"]);
            assert_eq!(cfg.completion.openai.models, vec!["gpt-4o-mini"]);
            assert!(cfg.router.policy().allow_self_trigger);

            let policy = cfg.reconnect.policy();
            assert_eq!(policy.initial_delay, Duration::from_secs(5));
            assert_eq!(policy.max_delay, Duration::from_secs(30));
            assert_eq!(policy.max_attempts, Some(4));
        });
    }

    #[test]
    fn load_reports_invalid_toml() {
        with_locked_env(|| {
            let _env = EnvGuard::cleared(ENV_KEYS);
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("broken.toml");
            write_file(&path, "[completion\nmode = ");

            let err = Config::load(Some(&path)).expect_err("invalid toml");
            assert!(matches!(err, ConfigError::Toml(_)));
        });
    }

    #[test]
    fn load_applies_env_overrides() {
        with_locked_env(|| {
            let env = EnvGuard::cleared(ENV_KEYS);
            env.set("GEMINI_API_KEY", "env-gemini");
            env.set("GEMINI_MODELS", "gemini-pro, ,gemini-1.5-flash");
            env.set("OPENAI_API_KEY", "env-openai");
            env.set("OPENAI_BASE_URL", "https://llm.example.com/v1");
            env.set("OPENAI_MODELS", "llama-3.1-8b");
            env.set("WAGPT_COMPLETION_MODE", "per-request");
            env.set("WAGPT_ALLOW_SELF_TRIGGER", "yes");
            env.set("WHATSAPP_SESSION_DIR", "/tmp/test-wa-session");
            env.set("WHATSAPP_BRIDGE_PATH", "/usr/local/bin/bridge.js");
            env.set("WAGPT_RECONNECT_DELAY_SECS", "7");
            env.set("WAGPT_RECONNECT_MAX_ATTEMPTS", "10");

            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("empty.toml");
            write_file(&path, "");
            let cfg = Config::load(Some(&path)).expect("config load");

            assert_eq!(cfg.completion.gemini.api_key, "env-gemini");
            assert_eq!(
                cfg.completion.gemini.models,
                vec!["gemini-pro", "gemini-1.5-flash"]
            );
            assert_eq!(cfg.completion.openai.api_key, "env-openai");
            assert_eq!(
                cfg.completion.openai.base_url.as_deref(),
                Some("https://llm.example.com/v1")
            );
            assert_eq!(cfg.completion.openai.models, vec!["llama-3.1-8b"]);
            assert_eq!(cfg.completion.mode, SelectionMode::PerRequest);
            assert!(cfg.router.allow_self_trigger);
            assert_eq!(cfg.whatsapp.session_dir, "/tmp/test-wa-session");
            assert_eq!(
                cfg.whatsapp.bridge_path,
                Some("/usr/local/bin/bridge.js".to_string())
            );
            assert_eq!(cfg.reconnect.initial_delay_secs, 7);
            assert_eq!(cfg.reconnect.max_attempts, Some(10));
        });
    }

    #[test]
    fn invalid_env_values_are_rejected() {
        with_locked_env(|| {
            let env = EnvGuard::cleared(ENV_KEYS);
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("empty.toml");
            write_file(&path, "");

            env.set("WAGPT_COMPLETION_MODE", "round_robin");
            let err = Config::load(Some(&path)).expect_err("bad mode");
            assert!(
                matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "WAGPT_COMPLETION_MODE")
            );
            env.remove("WAGPT_COMPLETION_MODE");

            env.set("WAGPT_ALLOW_SELF_TRIGGER", "maybe");
            assert!(Config::load(Some(&path)).is_err());
            env.remove("WAGPT_ALLOW_SELF_TRIGGER");

            env.set("WAGPT_RECONNECT_MAX_ATTEMPTS", "-1");
            assert!(Config::load(Some(&path)).is_err());
        });
    }

    #[test]
    fn keyed_provider_without_models_is_rejected() {
        with_locked_env(|| {
            let env = EnvGuard::cleared(ENV_KEYS);
            let tmp = tempfile::tempdir().expect("tempdir");
            let path = tmp.path().join("config.toml");
            write_file(
                &path,
                r#"
[completion.openai]
api_key = "sk-test"
models = []
"#,
            );
            let err = Config::load(Some(&path)).expect_err("no openai models");
            assert!(
                matches!(err, ConfigError::MissingField(ref field) if field == "completion.openai.models")
            );

            let empty = tmp.path().join("empty.toml");
            write_file(&empty, "");
            env.set("GEMINI_API_KEY", "g-test");
            env.set("GEMINI_MODELS", " , ");
            let err = Config::load(Some(&empty)).expect_err("no gemini models");
            assert!(
                matches!(err, ConfigError::MissingField(ref field) if field == "completion.gemini.models")
            );

            // Models without a key are fine: the provider is simply disabled.
            env.remove("GEMINI_API_KEY");
            let cfg = Config::load(Some(&empty)).expect("keyless provider");
            assert!(cfg.completion.gemini.models.is_empty());
        });
    }

    #[test]
    fn candidates_follow_provider_order_and_keys() {
        let mut completion = CompletionConfig::default();
        assert!(completion.candidates().is_empty());

        completion.openai.api_key = "sk-test".to_string();
        let names: Vec<String> = completion
            .candidates()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, vec!["openai:gpt-4o-mini"]);

        completion.gemini.api_key = "g-test".to_string();
        completion.gemini.models = vec!["gemini-1.5-flash".into(), "gemini-pro".into()];
        let names: Vec<String> = completion
            .candidates()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "gemini:gemini-1.5-flash",
                "gemini:gemini-pro",
                "openai:gpt-4o-mini"
            ]
        );
    }

    #[test]
    fn reconnect_policy_never_caps_below_initial_delay() {
        let cfg = ReconnectConfig {
            initial_delay_secs: 90,
            max_delay_secs: 60,
            max_attempts: None,
        };
        let policy = cfg.policy();
        assert_eq!(policy.max_delay, Duration::from_secs(90));
    }

    #[test]
    fn bridge_config_uses_effective_path() {
        let whatsapp = WhatsAppConfig {
            node_command: "/usr/bin/node20".to_string(),
            ..WhatsAppConfig::default()
        };
        let bridge = whatsapp.bridge_config();
        assert_eq!(bridge.node_command, "/usr/bin/node20");
        assert_eq!(bridge.bridge_path, PathBuf::from("whatsapp-bridge/index.js"));
    }
}
