//! TOML configuration with environment overrides for secrets.

use errorcast_core::{RelayError, RelayResult};
use errorcast_format::DEFAULT_MAX_LEN;
use errorcast_listener::{ListenerConfig, ReconnectPolicy};
use errorcast_relay::RelayConfig;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const ENV_TELEGRAM_TOKEN: &str = "TELEGRAM_TOKEN";
pub const ENV_ACCESS_PASSWORD: &str = "TELEGRAM_ACCESS_PASSWORD";
pub const ENV_REDIS_URL: &str = "REDIS_URL";

/// Longest message body the Telegram Bot API accepts.
pub const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

#[derive(Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub relay: RelaySettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            telegram: TelegramConfig::default(),
            auth: AuthConfig::default(),
            redis: RedisConfig::default(),
            relay: RelaySettings::default(),
        }
    }
}

#[derive(Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: default_api_base(),
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

#[derive(Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_channel")]
    pub channel: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            channel: default_channel(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RelaySettings {
    #[serde(default = "default_autosave")]
    pub autosave_secs: u64,
    #[serde(default = "default_poll_wait")]
    pub poll_wait_ms: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            autosave_secs: default_autosave(),
            poll_wait_ms: default_poll_wait(),
            reconnect_delay_ms: default_reconnect_delay(),
            max_concurrent_sends: default_max_concurrent_sends(),
            max_message_len: default_max_message_len(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}
fn default_poll_timeout() -> u64 {
    30
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}
fn default_channel() -> String {
    "log-channel".to_string()
}
fn default_autosave() -> u64 {
    60
}
fn default_poll_wait() -> u64 {
    1000
}
fn default_reconnect_delay() -> u64 {
    1000
}
fn default_max_concurrent_sends() -> usize {
    8
}
fn default_max_message_len() -> usize {
    DEFAULT_MAX_LEN
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("data_dir", &self.data_dir)
            .field("telegram.token", &self.telegram.token.as_ref().map(|_| "<redacted>"))
            .field("telegram.api_base", &self.telegram.api_base)
            .field("auth.password", &self.auth.password.as_ref().map(|_| "<redacted>"))
            .field("redis.channel", &self.redis.channel)
            .field("relay", &self.relay)
            .finish()
    }
}

impl AppConfig {
    /// Read `path` (defaults apply when it does not exist) and apply secret
    /// overrides from `env`.
    pub fn load<F>(path: &Path, env: F) -> RelayResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                RelayError::Config(format!(
                    "Failed to parse config '{}': {e}",
                    path.display()
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                AppConfig::default()
            }
            Err(e) => {
                return Err(RelayError::Config(format!(
                    "Failed to read config '{}': {e}",
                    path.display()
                )))
            }
        };

        if let Some(token) = secret_from_env(&env, ENV_TELEGRAM_TOKEN)? {
            config.telegram.token = Some(token);
        }
        if let Some(password) = secret_from_env(&env, ENV_ACCESS_PASSWORD)? {
            config.auth.password = Some(password);
        }
        if let Some(url) = secret_from_env(&env, ENV_REDIS_URL)? {
            config.redis.url = url;
        }
        Ok(config)
    }

    pub fn telegram_token(&self) -> RelayResult<&str> {
        required(self.telegram.token.as_deref(), "telegram.token", ENV_TELEGRAM_TOKEN)
    }

    /// Settings for the relay; fails without an access password.
    pub fn relay_config(&self) -> RelayResult<RelayConfig> {
        let password = required(self.auth.password.as_deref(), "auth.password", ENV_ACCESS_PASSWORD)?;
        let relay = &self.relay;
        if relay.autosave_secs == 0 {
            return Err(RelayError::Config("relay.autosave_secs must be positive".into()));
        }
        if relay.max_concurrent_sends == 0 {
            return Err(RelayError::Config(
                "relay.max_concurrent_sends must be positive".into(),
            ));
        }
        if relay.max_message_len > TELEGRAM_MAX_MESSAGE_LEN {
            return Err(RelayError::Config(format!(
                "relay.max_message_len must not exceed {TELEGRAM_MAX_MESSAGE_LEN}, got {}",
                relay.max_message_len
            )));
        }

        let mut config = RelayConfig::new(&self.data_dir, password);
        config.autosave = Duration::from_secs(relay.autosave_secs);
        config.max_message_len = relay.max_message_len;
        config.listener = ListenerConfig {
            channel: self.redis.channel.clone(),
            poll_wait: Duration::from_millis(relay.poll_wait_ms.max(1)),
            reconnect: ReconnectPolicy {
                delay_ms: relay.reconnect_delay_ms,
            },
            max_concurrent_sends: relay.max_concurrent_sends,
        };
        Ok(config)
    }
}

fn required<'a>(value: Option<&'a str>, key: &str, env_key: &str) -> RelayResult<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(RelayError::Config(format!(
            "Missing {key}: set it in the config file or via {env_key}"
        ))),
    }
}

/// Read a secret from the environment. A value starting with `/` names a
/// file holding the secret (Docker secrets).
fn secret_from_env<F>(env: &F, key: &str) -> RelayResult<Option<String>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = env(key) else {
        return Ok(None);
    };
    if !value.starts_with('/') {
        return Ok(Some(value.trim().to_string()));
    }
    let content = std::fs::read_to_string(&value)
        .map_err(|e| RelayError::Config(format!("Failed to read {key} from '{value}': {e}")))?;
    Ok(Some(content.trim().to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_parse_full_config() {
        let f = write_config(
            r#"
data_dir = "/var/lib/errorcast"

[telegram]
token = "123:ABC"

[auth]
password = "swordfish"

[redis]
url = "redis://redis:6379/1"
channel = "errors"

[relay]
autosave_secs = 30
poll_wait_ms = 250
reconnect_delay_ms = 2000
max_concurrent_sends = 4
max_message_len = 2000
"#,
        );
        let config = AppConfig::load(f.path(), no_env).unwrap();
        assert_eq!(config.telegram_token().unwrap(), "123:ABC");

        let relay = config.relay_config().unwrap();
        assert_eq!(relay.password, "swordfish");
        assert_eq!(relay.data_dir, PathBuf::from("/var/lib/errorcast"));
        assert_eq!(relay.autosave, Duration::from_secs(30));
        assert_eq!(relay.max_message_len, 2000);
        assert_eq!(relay.listener.channel, "errors");
        assert_eq!(relay.listener.poll_wait, Duration::from_millis(250));
        assert_eq!(relay.listener.reconnect.delay(), Duration::from_secs(2));
        assert_eq!(relay.listener.max_concurrent_sends, 4);
        assert_eq!(config.redis.url, "redis://redis:6379/1");
    }

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.toml"), no_env).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.redis.channel, "log-channel");
        assert_eq!(config.relay.autosave_secs, 60);
        assert_eq!(config.relay.max_message_len, DEFAULT_MAX_LEN);
        assert!(config.telegram_token().is_err());
    }

    #[test]
    fn test_missing_password_is_fatal() {
        let f = write_config("[telegram]\ntoken = \"t\"\n");
        let config = AppConfig::load(f.path(), no_env).unwrap();
        let err = config.relay_config().unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
        assert!(err.to_string().contains(ENV_ACCESS_PASSWORD));
    }

    #[test]
    fn test_blank_token_counts_as_missing() {
        let f = write_config("[telegram]\ntoken = \"   \"\n");
        let config = AppConfig::load(f.path(), no_env).unwrap();
        assert!(config.telegram_token().is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let f = write_config("[telegram]\ntoken = \"from-file\"\n[auth]\npassword = \"file-pw\"\n");
        let env = env_of(&[
            (ENV_TELEGRAM_TOKEN, " from-env\n"),
            (ENV_REDIS_URL, "redis://cache:6379/2"),
        ]);
        let config = AppConfig::load(f.path(), env).unwrap();
        assert_eq!(config.telegram_token().unwrap(), "from-env");
        assert_eq!(config.relay_config().unwrap().password, "file-pw");
        assert_eq!(config.redis.url, "redis://cache:6379/2");
    }

    #[test]
    fn test_env_secret_read_from_file() {
        let secret = write_config("docker-secret-pw\n");
        let path = secret.path().to_str().unwrap().to_string();
        let env = env_of(&[(ENV_ACCESS_PASSWORD, path.as_str()), (ENV_TELEGRAM_TOKEN, "t")]);
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("none.toml"), env).unwrap();
        assert_eq!(config.relay_config().unwrap().password, "docker-secret-pw");
    }

    #[test]
    fn test_unreadable_secret_file_is_error() {
        let env = env_of(&[(ENV_TELEGRAM_TOKEN, "/nonexistent/errorcast/token")]);
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(&dir.path().join("none.toml"), env).unwrap_err();
        assert!(err.to_string().contains(ENV_TELEGRAM_TOKEN));
    }

    #[test]
    fn test_invalid_toml() {
        let f = write_config("this is not [valid toml");
        let err = AppConfig::load(f.path(), no_env).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_zero_autosave_rejected() {
        let f = write_config("[auth]\npassword = \"pw\"\n[relay]\nautosave_secs = 0\n");
        let config = AppConfig::load(f.path(), no_env).unwrap();
        assert!(config.relay_config().is_err());
    }

    #[test]
    fn test_max_message_len_bounded_by_telegram() {
        let f = write_config("[auth]\npassword = \"pw\"\n[relay]\nmax_message_len = 4096\n");
        let config = AppConfig::load(f.path(), no_env).unwrap();
        assert_eq!(config.relay_config().unwrap().max_message_len, 4096);

        let f = write_config("[auth]\npassword = \"pw\"\n[relay]\nmax_message_len = 4097\n");
        let config = AppConfig::load(f.path(), no_env).unwrap();
        let err = config.relay_config().unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
        assert!(err.to_string().contains("max_message_len"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let f = write_config("[telegram]\ntoken = \"123:SECRET\"\n[auth]\npassword = \"hunter2\"\n");
        let config = AppConfig::load(f.path(), no_env).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("SECRET"));
        assert!(!debug.contains("hunter2"));
    }
}
