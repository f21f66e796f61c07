use std::path::PathBuf;
use std::time::Duration;

const DEV_TOKEN_SECRET: &str = "venuedb-dev-secret-change-me";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("{0} must be set (or set VENUEDB_DEV=1 to use the development default)")]
    Missing(&'static str),
}

/// Process settings, read once from `VENUEDB_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub token_secret: String,
    pub token_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`Config::from_env`] over an arbitrary variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let parsed = |var: &'static str| -> Result<Option<u64>, ConfigError> {
            get(var)
                .map(|value| {
                    value
                        .trim()
                        .parse::<u64>()
                        .map_err(|_| ConfigError::Invalid { var, value })
                })
                .transpose()
        };
        let port = |var: &'static str| -> Result<Option<u16>, ConfigError> {
            parsed(var)?
                .map(|n| {
                    u16::try_from(n).map_err(|_| ConfigError::Invalid {
                        var,
                        value: n.to_string(),
                    })
                })
                .transpose()
        };

        let dev = get("VENUEDB_DEV")
            .is_some_and(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true"));
        let token_secret = match get("VENUEDB_TOKEN_SECRET").filter(|s| !s.trim().is_empty()) {
            Some(secret) => secret,
            None if dev => {
                tracing::warn!("VENUEDB_TOKEN_SECRET not set, using the built-in development secret");
                DEV_TOKEN_SECRET.to_string()
            }
            None => return Err(ConfigError::Missing("VENUEDB_TOKEN_SECRET")),
        };

        Ok(Self {
            bind: get("VENUEDB_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: port("VENUEDB_PORT")?.unwrap_or(5433),
            data_dir: get("VENUEDB_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            password: get("VENUEDB_PASSWORD").unwrap_or_else(|| "venuedb".into()),
            max_connections: parsed("VENUEDB_MAX_CONNECTIONS")?.map_or(256, |n| n as usize),
            metrics_port: port("VENUEDB_METRICS_PORT")?,
            tls_cert: get("VENUEDB_TLS_CERT").map(PathBuf::from),
            tls_key: get("VENUEDB_TLS_KEY").map(PathBuf::from),
            token_secret,
            token_ttl: Duration::from_secs(parsed("VENUEDB_TOKEN_TTL_SECS")?.unwrap_or(86_400)),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("venuedb.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
