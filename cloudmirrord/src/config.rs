use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::store;

const DEFAULT_MAX_CONNECTIONS: u32 = 4;
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MirrorConfig {
    pub db_path: PathBuf,
    pub max_connections: u32,
    pub log_filter: String,
}

impl MirrorConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let db_path = match std::env::var("CLOUDMIRROR_DB") {
            Ok(value) => resolve_db_path(&value, dirs::home_dir)?,
            Err(_) => store::default_db_path().context("no default metadata store location")?,
        };
        let max_connections = read_u32_env("CLOUDMIRROR_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS);
        let log_filter = std::env::var("CLOUDMIRROR_LOG")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Ok(Self {
            db_path,
            max_connections,
            log_filter,
        })
    }
}

fn resolve_db_path(
    value: &str,
    home_dir: impl FnOnce() -> Option<PathBuf>,
) -> anyhow::Result<PathBuf> {
    if value == "~" || value.starts_with("~/") {
        let home = home_dir().context("home directory is unavailable")?;
        return Ok(expand_with_home(value, &home));
    }
    Ok(PathBuf::from(value))
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u32_env(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_home_prefix() {
        let home = PathBuf::from("/home/alice");
        assert_eq!(expand_with_home("~", &home), home);
        assert_eq!(
            expand_with_home("~/mirror/metadata.db", &home),
            PathBuf::from("/home/alice/mirror/metadata.db")
        );
        assert_eq!(
            expand_with_home("/var/lib/mirror.db", &home),
            PathBuf::from("/var/lib/mirror.db")
        );
    }

    #[test]
    fn db_path_needs_home_only_for_tilde() {
        assert_eq!(
            resolve_db_path("/var/lib/mirror.db", || None).unwrap(),
            PathBuf::from("/var/lib/mirror.db")
        );
        assert_eq!(
            resolve_db_path("~/mirror.db", || Some(PathBuf::from("/home/alice"))).unwrap(),
            PathBuf::from("/home/alice/mirror.db")
        );
        assert!(resolve_db_path("~/mirror.db", || None).is_err());
    }

    #[test]
    fn numeric_env_falls_back_on_garbage_and_zero() {
        // Names unique to this test; nothing else reads them.
        unsafe {
            std::env::set_var("CLOUDMIRROR_TEST_CONNS_ZERO", "0");
            std::env::set_var("CLOUDMIRROR_TEST_CONNS_BAD", "many");
            std::env::set_var("CLOUDMIRROR_TEST_CONNS_OK", " 8 ");
        }
        assert_eq!(read_u32_env("CLOUDMIRROR_TEST_CONNS_ZERO", 4), 4);
        assert_eq!(read_u32_env("CLOUDMIRROR_TEST_CONNS_BAD", 4), 4);
        assert_eq!(read_u32_env("CLOUDMIRROR_TEST_CONNS_OK", 4), 8);
        assert_eq!(read_u32_env("CLOUDMIRROR_TEST_CONNS_UNSET", 4), 4);
    }
}
