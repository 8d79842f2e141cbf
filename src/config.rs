use std::fmt;
use std::path::PathBuf;

/// Certificate chain and private key, both PEM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Server settings read from `PARKBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends after which the tenant log is rewritten as a snapshot.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls: Option<TlsFiles>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    TlsPairIncomplete,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
            ConfigError::TlsPairIncomplete => write!(
                f,
                "both PARKBOOK_TLS_CERT and PARKBOOK_TLS_KEY must be set, or neither"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let max_connections = parsed(&lookup, "PARKBOOK_MAX_CONNECTIONS")?.unwrap_or(256);
        if max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "PARKBOOK_MAX_CONNECTIONS",
                value: "0".into(),
            });
        }

        let tls = match (lookup("PARKBOOK_TLS_CERT"), lookup("PARKBOOK_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(TlsFiles {
                cert: cert.into(),
                key: key.into(),
            }),
            _ => return Err(ConfigError::TlsPairIncomplete),
        };

        Ok(Self {
            port: parsed(&lookup, "PARKBOOK_PORT")?.unwrap_or(5433),
            bind: lookup("PARKBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: lookup("PARKBOOK_DATA_DIR")
                .unwrap_or_else(|| "./data".into())
                .into(),
            password: lookup("PARKBOOK_PASSWORD").unwrap_or_else(|| "parkbook".into()),
            max_connections,
            compact_threshold: parsed(&lookup, "PARKBOOK_COMPACT_THRESHOLD")?.unwrap_or(1000),
            metrics_port: parsed(&lookup, "PARKBOOK_METRICS_PORT")?,
            tls,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
