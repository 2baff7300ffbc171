use std::path::PathBuf;

use crate::engine::SeriesCascade;
use crate::identity::DEFAULT_TOKENINFO_URL;
use crate::notify::DEFAULT_CHANNEL_CAPACITY;

pub const DEFAULT_IDENTITY_DOMAIN: &str = "colegiolahispanidad.es";

/// Server settings, read once at startup from `SLOTBOOK_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub upstream_url: Option<String>,
    /// Sent to the identity provider and required on roster pushes.
    pub upstream_secret: Option<String>,
    pub tokeninfo_url: String,
    pub identity_domain: String,
    pub series_cascade: SeriesCascade,
    pub calendar_file: Option<PathBuf>,
    pub broadcast_capacity: usize,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str) -> Result<Option<T>, String> {
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| format!("{name}: cannot parse {raw:?}")),
        None => Ok(None),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let series_cascade = match var("SLOTBOOK_SERIES_CASCADE") {
            Some(raw) => raw.parse()?,
            None => SeriesCascade::default(),
        };
        Ok(Self {
            bind: var("SLOTBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parsed("SLOTBOOK_PORT")?.unwrap_or(3001),
            data_dir: var("SLOTBOOK_DATA_DIR").unwrap_or_else(|| "./data".into()).into(),
            metrics_port: parsed("SLOTBOOK_METRICS_PORT")?,
            upstream_url: var("SLOTBOOK_UPSTREAM_URL"),
            upstream_secret: var("SLOTBOOK_UPSTREAM_SECRET"),
            tokeninfo_url: var("SLOTBOOK_TOKENINFO_URL").unwrap_or_else(|| DEFAULT_TOKENINFO_URL.into()),
            identity_domain: var("SLOTBOOK_IDENTITY_DOMAIN")
                .unwrap_or_else(|| DEFAULT_IDENTITY_DOMAIN.into()),
            series_cascade,
            calendar_file: var("SLOTBOOK_CALENDAR_FILE").map(PathBuf::from),
            broadcast_capacity: parsed("SLOTBOOK_BROADCAST_CAPACITY")?
                .unwrap_or(DEFAULT_CHANNEL_CAPACITY),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
