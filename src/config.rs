use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use pgwire::tokio::TlsAcceptor;

use crate::auth::StaffRoster;
use crate::engine::EngineSettings;
use crate::money::Bps;

/// Server settings, read once from `INNKEEP_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub tax_rate: Bps,
    pub lock_timeout: Duration,
    pub sweep_interval: Duration,
    /// Property-local offset used to decide what "today" is.
    pub utc_offset: FixedOffset,
    pub managers: Vec<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; unset variables take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let parse = |var: &'static str| -> Result<Option<i64>, ConfigError> {
            match lookup(var) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError::Invalid { var, value }),
            }
        };
        let bounded = |var: &'static str, v: i64, min: i64, max: i64| {
            if (min..=max).contains(&v) {
                Ok(v)
            } else {
                Err(ConfigError::Invalid { var, value: v.to_string() })
            }
        };

        let port = bounded("INNKEEP_PORT", parse("INNKEEP_PORT")?.unwrap_or(5433), 1, 65535)? as u16;
        let metrics_port = match parse("INNKEEP_METRICS_PORT")? {
            Some(p) => Some(bounded("INNKEEP_METRICS_PORT", p, 1, 65535)? as u16),
            None => None,
        };
        let max_connections =
            bounded("INNKEEP_MAX_CONNECTIONS", parse("INNKEEP_MAX_CONNECTIONS")?.unwrap_or(256), 1, 65535)?;
        let compact_threshold =
            bounded("INNKEEP_COMPACT_THRESHOLD", parse("INNKEEP_COMPACT_THRESHOLD")?.unwrap_or(1000), 1, i64::MAX)?;
        let tax_bps = bounded("INNKEEP_TAX_RATE_BPS", parse("INNKEEP_TAX_RATE_BPS")?.unwrap_or(1500), 0, 10_000)?;
        let lock_timeout_ms =
            bounded("INNKEEP_LOCK_TIMEOUT_MS", parse("INNKEEP_LOCK_TIMEOUT_MS")?.unwrap_or(2000), 1, 600_000)?;
        let sweep_secs = bounded(
            "INNKEEP_SWEEP_INTERVAL_SECS",
            parse("INNKEEP_SWEEP_INTERVAL_SECS")?.unwrap_or(3600),
            1,
            86_400 * 7,
        )?;
        let offset_minutes = bounded(
            "INNKEEP_UTC_OFFSET_MINUTES",
            parse("INNKEEP_UTC_OFFSET_MINUTES")?.unwrap_or(0),
            -1439,
            1439,
        )?;
        let utc_offset = FixedOffset::east_opt((offset_minutes * 60) as i32).ok_or(ConfigError::Invalid {
            var: "INNKEEP_UTC_OFFSET_MINUTES",
            value: offset_minutes.to_string(),
        })?;

        let managers = lookup("INNKEEP_MANAGERS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            bind: lookup("INNKEEP_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            data_dir: PathBuf::from(lookup("INNKEEP_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: lookup("INNKEEP_PASSWORD").unwrap_or_else(|| "innkeep".into()),
            max_connections: max_connections as usize,
            compact_threshold: compact_threshold as u64,
            metrics_port,
            tls_cert: lookup("INNKEEP_TLS_CERT"),
            tls_key: lookup("INNKEEP_TLS_KEY"),
            tax_rate: Bps::from_bps(tax_bps as u32),
            lock_timeout: Duration::from_millis(lock_timeout_ms as u64),
            sweep_interval: Duration::from_secs(sweep_secs as u64),
            utc_offset,
            managers,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("innkeep.wal")
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            tax_rate: self.tax_rate,
            lock_timeout: self.lock_timeout,
        }
    }

    pub fn roster(&self) -> StaffRoster {
        StaffRoster::new(self.managers.iter().cloned())
    }

    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        load_tls_acceptor(self.tls_cert.as_deref(), self.tls_key.as_deref())
    }
}

pub fn load_tls_acceptor(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        _ => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "both INNKEEP_TLS_CERT and INNKEEP_TLS_KEY must be set, or neither",
            ));
        }
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<_, _>>()?;

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.port, 5433);
        assert_eq!(cfg.max_connections, 256);
        assert_eq!(cfg.tax_rate, Bps::from_percent(15));
        assert_eq!(cfg.lock_timeout, Duration::from_secs(2));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(3600));
        assert_eq!(cfg.metrics_port, None);
        assert!(cfg.managers.is_empty());
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/innkeep.wal"));
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("INNKEEP_PORT", "6000"),
            ("INNKEEP_TAX_RATE_BPS", "825"),
            ("INNKEEP_UTC_OFFSET_MINUTES", "-300"),
            ("INNKEEP_MANAGERS", "amara, jun ,"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 6000);
        assert_eq!(cfg.tax_rate, Bps::from_bps(825));
        assert_eq!(cfg.utc_offset.local_minus_utc(), -300 * 60);
        assert_eq!(cfg.managers, vec!["amara".to_string(), "jun".to_string()]);
        assert!(cfg.roster().actor_for("jun").is_manager());
    }

    #[test]
    fn rejects_garbage_and_out_of_range() {
        assert!(matches!(
            config(&[("INNKEEP_PORT", "not-a-port")]),
            Err(ConfigError::Invalid { var: "INNKEEP_PORT", .. })
        ));
        assert!(config(&[("INNKEEP_TAX_RATE_BPS", "20000")]).is_err());
        assert!(config(&[("INNKEEP_UTC_OFFSET_MINUTES", "100000")]).is_err());
    }

    #[test]
    fn tls_needs_both_files() {
        assert!(load_tls_acceptor(None, None).unwrap().is_none());
        assert!(matches!(
            load_tls_acceptor(Some("cert.pem"), None),
            Err(e) if e.kind() == ErrorKind::InvalidInput
        ));
        assert!(matches!(
            load_tls_acceptor(None, Some("key.pem")),
            Err(e) if e.kind() == ErrorKind::InvalidInput
        ));
    }
}
