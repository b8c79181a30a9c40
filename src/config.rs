use std::path::PathBuf;
use std::str::FromStr;

/// SMTP relay settings. Present only when `TABLEBOOK_SMTP_HOST` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub smtp: Option<SmtpConfig>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unparsable numbers fall back to defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            get(key).and_then(|s| s.trim().parse().ok())
        }

        let smtp = get("TABLEBOOK_SMTP_HOST").map(|host| SmtpConfig {
            host,
            port: parsed(&get, "TABLEBOOK_SMTP_PORT").unwrap_or(25),
            user: get("TABLEBOOK_SMTP_USER"),
            password: get("TABLEBOOK_SMTP_PASSWORD"),
            from: get("TABLEBOOK_MAIL_FROM").unwrap_or_else(|| "reservations@localhost".into()),
        });

        Self {
            port: parsed(&get, "TABLEBOOK_PORT").unwrap_or(5433),
            bind: get("TABLEBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(get("TABLEBOOK_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: get("TABLEBOOK_PASSWORD").unwrap_or_else(|| "tablebook".into()),
            max_connections: parsed(&get, "TABLEBOOK_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&get, "TABLEBOOK_COMPACT_THRESHOLD").unwrap_or(1000),
            metrics_port: parsed(&get, "TABLEBOOK_METRICS_PORT"),
            tls_cert: get("TABLEBOOK_TLS_CERT"),
            tls_key: get("TABLEBOOK_TLS_KEY"),
            smtp,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("tablebook.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let c = Config::from_lookup(lookup(&[]));
        assert_eq!(c.port, 5433);
        assert_eq!(c.addr(), "0.0.0.0:5433");
        assert_eq!(c.password, "tablebook");
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.smtp, None);
        assert_eq!(c.wal_path(), PathBuf::from("./data/tablebook.wal"));
    }

    #[test]
    fn overrides_and_smtp() {
        let c = Config::from_lookup(lookup(&[
            ("TABLEBOOK_PORT", "6543"),
            ("TABLEBOOK_METRICS_PORT", "9100"),
            ("TABLEBOOK_SMTP_HOST", "mail.internal"),
            ("TABLEBOOK_SMTP_USER", "bot"),
            ("TABLEBOOK_SMTP_PASSWORD", "hunter2"),
        ]));
        assert_eq!(c.port, 6543);
        assert_eq!(c.metrics_port, Some(9100));
        let smtp = c.smtp.unwrap();
        assert_eq!(smtp.host, "mail.internal");
        assert_eq!(smtp.port, 25);
        assert_eq!(smtp.user.as_deref(), Some("bot"));
        assert_eq!(smtp.from, "reservations@localhost");
    }

    #[test]
    fn garbage_numbers_fall_back() {
        let c = Config::from_lookup(lookup(&[("TABLEBOOK_MAX_CONNECTIONS", "lots")]));
        assert_eq!(c.max_connections, 256);
    }
}
