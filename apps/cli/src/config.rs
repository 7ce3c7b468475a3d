use qtree_core::TreeConfig;
use qtree_storage_sqlite::db;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub log_format: LogFormat,
    pub tree: TreeConfig,
}

impl Config {
    /// `--db` wins over `QTREE_DB_PATH`, which wins over `DATABASE_URL` and
    /// finally `<QTREE_DATA_DIR>/qtree.db`.
    pub fn from_env(db_override: Option<String>) -> anyhow::Result<Self> {
        Self::from_lookup(db_override, |key| std::env::var(key).ok())
    }

    fn from_lookup<F>(db_override: Option<String>, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = db_override
            .or_else(|| lookup("QTREE_DB_PATH"))
            .unwrap_or_else(|| {
                let data_dir = lookup("QTREE_DATA_DIR").unwrap_or_else(|| ".".to_string());
                db::get_db_path(&data_dir)
            });

        let log_format = match lookup("QTREE_LOG_FORMAT") {
            Some(raw) if raw.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            db_path,
            log_format,
            tree: TreeConfig::from_env()?,
        })
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
    fn test_cli_flag_overrides_env_path() {
        let config = Config::from_lookup(
            Some("/tmp/flag.db".to_string()),
            lookup(&[("QTREE_DB_PATH", "/tmp/env.db")]),
        )
        .unwrap();
        assert_eq!(config.db_path, "/tmp/flag.db");
    }

    #[test]
    fn test_env_path_and_log_format() {
        let config = Config::from_lookup(
            None,
            lookup(&[("QTREE_DB_PATH", "/tmp/env.db"), ("QTREE_LOG_FORMAT", "JSON")]),
        )
        .unwrap();
        assert_eq!(config.db_path, "/tmp/env.db");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_unknown_log_format_falls_back_to_text() {
        let config = Config::from_lookup(
            Some("x.db".to_string()),
            lookup(&[("QTREE_LOG_FORMAT", "pretty")]),
        )
        .unwrap();
        assert_eq!(config.log_format, LogFormat::Text);
    }
}
