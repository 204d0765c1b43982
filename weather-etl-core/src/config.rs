use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use crate::{
    error::ConfigError,
    model::{Location, default_locations},
    pipeline::FailurePolicy,
    warehouse::{Dialect, TableName},
};

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

/// Weather provider settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    /// Passed through as the `units` query parameter. `metric` yields Celsius.
    pub units: String,
    /// Request timeout; 0 waits forever.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            units: "metric".to_string(),
            timeout_secs: 30,
        }
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("units", &self.units)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Warehouse connection and destination table.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: Option<String>,
    pub port: u16,
    pub dbname: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub table: TableName,
    pub dialect: Dialect,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 5439,
            dbname: None,
            user: None,
            password: None,
            table: TableName::default(),
            dialect: Dialect::default(),
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("table", &self.table)
            .field("dialect", &self.dialect)
            .finish()
    }
}

/// Everything needed to open a warehouse connection.
#[derive(Clone)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl DatabaseConfig {
    /// Resolve the connection parameters, failing on the first one missing.
    pub fn connection_settings(&self) -> Result<ConnectionSettings, ConfigError> {
        fn get(value: &Option<String>, key: &'static str, env: &'static str) -> Result<String, ConfigError> {
            value.clone().ok_or(ConfigError::Missing { key, env })
        }

        Ok(ConnectionSettings {
            host: get(&self.host, "database.host", "DB_HOST")?,
            port: self.port,
            dbname: get(&self.dbname, "database.dbname", "DB_NAME")?,
            user: get(&self.user, "database.user", "DB_USER")?,
            password: get(&self.password, "database.password", "DB_PASSWORD")?,
        })
    }
}

/// Top-level configuration for one ingestion run.
///
/// Example TOML:
/// ```toml
/// on_error = "abort"
///
/// [api]
/// api_key = "..."
///
/// [database]
/// host = "example.redshift.amazonaws.com"
/// dbname = "dev"
///
/// [[locations]]
/// name = "Rosario"
/// lat = -32.9468
/// lon = -60.6393
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub on_error: FailurePolicy,
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub locations: Vec<Location>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            on_error: FailurePolicy::default(),
            api: ApiConfig::default(),
            database: DatabaseConfig::default(),
            locations: default_locations(),
        }
    }
}

impl Config {
    /// Load config from the platform config directory, or defaults if the file doesn't exist yet.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_file_path()?)
    }

    /// Load config from `path`, or defaults if it doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;

        toml::from_str(&contents).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Save config to the platform config directory.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_file_path()?)
    }

    /// Save config to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::Write { path: parent.to_path_buf(), source })?;
        }

        let toml = toml::to_string_pretty(self)?;

        fs::write(path, toml).map_err(|source| ConfigError::Write { path: path.to_path_buf(), source })
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        let dirs = ProjectDirs::from("dev", "weather-etl", "weather-etl").ok_or(ConfigError::NoConfigDir)?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Override file values with the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Override file values from `lookup`. Variables: `API_KEY`, `DB_HOST`,
    /// `DB_PORT`, `DB_NAME`, `DB_USER`, `DB_PASSWORD`, `WEATHER_ETL_TABLE`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(key) = get("API_KEY") {
            self.api.api_key = Some(key);
        }
        if let Some(host) = get("DB_HOST") {
            self.database.host = Some(host);
        }
        if let Some(port) = get("DB_PORT") {
            self.database.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { name: "DB_PORT", value: port })?;
        }
        if let Some(dbname) = get("DB_NAME") {
            self.database.dbname = Some(dbname);
        }
        if let Some(user) = get("DB_USER") {
            self.database.user = Some(user);
        }
        if let Some(password) = get("DB_PASSWORD") {
            self.database.password = Some(password);
        }
        if let Some(table) = get("WEATHER_ETL_TABLE") {
            self.database.table = TableName::parse(&table)?;
        }

        Ok(())
    }

    /// The API key, or an error telling the user where to set it.
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.api
            .api_key
            .as_deref()
            .ok_or(ConfigError::Missing { key: "api.api_key", env: "API_KEY" })
    }

    /// Locations whose name matches one of `names` (case-insensitive), in configured order.
    ///
    /// Every requested name must match a configured location.
    pub fn select_locations(&self, names: &[String]) -> Result<Vec<Location>, ConfigError> {
        if names.is_empty() {
            return Ok(self.locations.clone());
        }

        let unknown: Vec<String> = names
            .iter()
            .filter(|n| !self.locations.iter().any(|l| l.name.eq_ignore_ascii_case(n)))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(ConfigError::UnknownLocations(unknown));
        }

        Ok(self
            .locations
            .iter()
            .filter(|l| names.iter().any(|n| n.eq_ignore_ascii_case(&l.name)))
            .cloned()
            .collect())
    }
}
