use std::{
    env,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use config as cfg;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/flowdeck.db".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    // Never serialized; comes from config files or FLOWDECK__AUTH__JWT_SECRET.
    #[serde(default, skip_serializing)]
    pub jwt_secret: Option<SecretString>,
    #[serde(default = "AuthConfig::default_expiry_hours")]
    pub jwt_expiry_hours: u64,
    #[serde(default = "AuthConfig::default_login_attempts")]
    pub login_attempts_per_minute: u32,
}

impl AuthConfig {
    const DEV_SECRET: &'static str = "flowdeck-development-secret-change-me";

    fn default_expiry_hours() -> u64 {
        24
    }

    fn default_login_attempts() -> u32 {
        10
    }

    /// The configured secret, or a fixed development secret when none is set.
    pub fn secret_or_dev(&self) -> SecretString {
        self.jwt_secret
            .clone()
            .unwrap_or_else(|| SecretString::from(Self::DEV_SECRET))
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            jwt_expiry_hours: Self::default_expiry_hours(),
            login_attempts_per_minute: Self::default_login_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "ChatConfig::default_history_limit")]
    pub history_limit: u32,
    #[serde(default = "ChatConfig::default_search_limit")]
    pub search_limit: u32,
}

impl ChatConfig {
    fn default_history_limit() -> u32 {
        100
    }

    fn default_search_limit() -> u32 {
        50
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_limit: Self::default_history_limit(),
            search_limit: Self::default_search_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "AppConfig::default_name")]
    pub name: String,
    #[serde(default = "AppConfig::default_url")]
    pub url: String,
    #[serde(default = "AppConfig::default_per_page")]
    pub items_per_page: u32,
}

impl AppConfig {
    fn default_name() -> String {
        "FlowDeck".to_string()
    }

    fn default_url() -> String {
        "http://localhost:5000".to_string()
    }

    fn default_per_page() -> u32 {
        20
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            url: Self::default_url(),
            items_per_page: Self::default_per_page(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "Settings::default_env")]
    pub env: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: Self::default_env(),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            chat: ChatConfig::default(),
            app: AppConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    fn default_env() -> String {
        env::var("FLOWDECK_ENV")
            .ok()
            .or_else(|| env::var("APP_ENV").ok())
            .unwrap_or_else(|| "development".to_string())
    }

    pub fn is_development(&self) -> bool {
        matches!(self.env.as_str(), "development" | "test")
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.server.host.trim().is_empty(),
            "server.host cannot be empty"
        );
        anyhow::ensure!(self.server.port > 0, "server.port must be > 0");
        anyhow::ensure!(
            !self.database.path.trim().is_empty(),
            "database.path cannot be empty"
        );
        anyhow::ensure!(
            self.auth.jwt_expiry_hours > 0,
            "auth.jwt_expiry_hours must be > 0"
        );
        anyhow::ensure!(
            self.auth.login_attempts_per_minute > 0,
            "auth.login_attempts_per_minute must be > 0"
        );
        anyhow::ensure!(
            self.chat.history_limit > 0 && self.chat.search_limit > 0,
            "chat limits must be > 0"
        );
        anyhow::ensure!(
            self.app.items_per_page > 0 && self.app.items_per_page <= 100,
            "app.items_per_page must be 1..=100"
        );

        if !self.is_development() {
            let secret_len = self
                .auth
                .jwt_secret
                .as_ref()
                .map(|s| s.expose_secret().len())
                .unwrap_or(0);
            anyhow::ensure!(
                secret_len >= 32,
                "auth.jwt_secret must be set and at least 32 characters outside development"
            );
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct ConfigManager {
    settings: Arc<RwLock<Settings>>,
    config_dir: PathBuf,
    env: String,
}

impl ConfigManager {
    pub fn settings(&self) -> &Arc<RwLock<Settings>> {
        &self.settings
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    pub fn load(config_dir: Option<PathBuf>, env_override: Option<String>) -> Result<Arc<Self>> {
        let env_name = env_override.unwrap_or_else(Settings::default_env);
        let config_dir = config_dir.unwrap_or_else(Self::default_config_dir);
        let loaded = Self::load_from_sources(&config_dir, &env_name)?;
        loaded.validate()?;
        info!(env = %env_name, dir = ?config_dir, "Configuration loaded");

        Ok(Arc::new(Self {
            settings: Arc::new(RwLock::new(loaded)),
            config_dir,
            env: env_name,
        }))
    }

    /// `./config` when it exists, otherwise the working directory.
    pub fn default_config_dir() -> PathBuf {
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let project_config = cwd.join("config");
        if project_config.exists() {
            return project_config;
        }
        cwd
    }

    pub fn load_from_sources(config_dir: &Path, env_name: &str) -> Result<Settings> {
        let settings: Settings = cfg::Config::builder()
            .set_override("env", env_name)
            .context("setting environment name")?
            .add_source(cfg::File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.toml", env_name))).required(false),
            )
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(cfg::Environment::with_prefix("FLOWDECK").separator("__"))
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;
        Ok(settings)
    }

    pub async fn reload(&self) -> Result<()> {
        let fresh = Self::load_from_sources(&self.config_dir, &self.env)?;
        fresh.validate()?;
        *self.settings.write().await = fresh;
        info!(env = %self.env, "Configuration reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_are_valid_in_development() {
        let mut settings = Settings::default();
        settings.env = "development".into();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn production_requires_a_strong_secret() {
        let mut settings = Settings::default();
        settings.env = "production".into();
        assert!(settings.validate().is_err());
        settings.auth.jwt_secret = Some(SecretString::from("x".repeat(32)));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn environment_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[server]\nhost = \"127.0.0.1\"\nport = 8080\n",
        )
        .unwrap();
        fs::write(dir.path().join("staging.toml"), "[server]\nhost = \"127.0.0.1\"\nport = 9090\n").unwrap();

        let settings = ConfigManager::load_from_sources(dir.path(), "staging").unwrap();
        assert_eq!(settings.env, "staging");
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.chat.history_limit, 100);
    }

    #[tokio::test]
    async fn reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("default.toml");
        fs::write(&file, "[app]\nitems_per_page = 10\n").unwrap();

        let manager =
            ConfigManager::load(Some(dir.path().to_path_buf()), Some("test".into())).unwrap();
        assert_eq!(manager.settings().read().await.app.items_per_page, 10);

        fs::write(&file, "[app]\nitems_per_page = 25\n").unwrap();
        manager.reload().await.unwrap();
        assert_eq!(manager.settings().read().await.app.items_per_page, 25);
    }
}
