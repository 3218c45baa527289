use std::path::PathBuf;

pub const DEFAULT_DB_URL: &str = "sqlite://ladico.sqlite3";
pub const DEFAULT_CACHE_PATH: &str = ".ladico-cache.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub db_url: String,
    pub cache_path: PathBuf,
    pub log_level: String,
}

impl AppConfig {
    /// Read `LADICO_DB_URL`, `LADICO_CACHE_PATH` and `RUST_LOG`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_blank = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let db_url = non_blank("LADICO_DB_URL").unwrap_or_else(|| DEFAULT_DB_URL.to_string());
        let cache_path = non_blank("LADICO_CACHE_PATH")
            .map_or_else(|| PathBuf::from(DEFAULT_CACHE_PATH), PathBuf::from);
        let log_level = non_blank("RUST_LOG").unwrap_or_else(|| "info".to_string());

        Self {
            db_url,
            cache_path,
            log_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_apply_when_unset_or_blank() {
        let env = HashMap::from([("LADICO_DB_URL", " ")]);
        let config = AppConfig::from_lookup(|name| env.get(name).map(|v| (*v).to_string()));
        assert_eq!(config.db_url, DEFAULT_DB_URL);
        assert_eq!(config.cache_path, PathBuf::from(DEFAULT_CACHE_PATH));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn env_values_are_used() {
        let env = HashMap::from([
            ("LADICO_DB_URL", "sqlite://tmp/x.db"),
            ("LADICO_CACHE_PATH", "/tmp/cache.json"),
            ("RUST_LOG", "services=debug"),
        ]);
        let config = AppConfig::from_lookup(|name| env.get(name).map(|v| (*v).to_string()));
        assert_eq!(config.db_url, "sqlite://tmp/x.db");
        assert_eq!(config.cache_path, PathBuf::from("/tmp/cache.json"));
        assert_eq!(config.log_level, "services=debug");
    }
}
