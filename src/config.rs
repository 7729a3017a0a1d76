// Daemon-level configuration: where to listen, which table/family to use,
// where the SQLite store lives. Generalizes the teacher's
// WG_QUICKRS_CONFIG_FOLDER/conf.yml loading idiom from YAML to JSON, since
// the wire schema here is already JSON throughout.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

fn default_http_listen() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_dns_listen() -> String {
    "127.0.0.1:5353".to_string()
}

fn default_dns_upstream() -> String {
    "1.1.1.1:53".to_string()
}

fn default_sqlite_path() -> String {
    "octaroute.sqlite3".to_string()
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("parsing {0}: {1}")]
    Parse(PathBuf, serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(rename = "httpListen", default = "default_http_listen")]
    pub http_listen: String,
    #[serde(rename = "dnsListen", default = "default_dns_listen")]
    pub dns_listen: String,
    #[serde(rename = "dnsUpstream", default = "default_dns_upstream")]
    pub dns_upstream: String,
    #[serde(rename = "sqlitePath", default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(rename = "apiKey", default)]
    pub api_key: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            http_listen: default_http_listen(),
            dns_listen: default_dns_listen(),
            dns_upstream: default_dns_upstream(),
            sqlite_path: default_sqlite_path(),
            api_key: String::new(),
        }
    }
}

pub fn load(path: &Path) -> Result<DaemonConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_owned(), e))?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(path.to_owned(), e))
}

/// Where to look when the caller didn't pass `--config`: `$XDG_CONFIG_HOME/octaroute/config.json`
/// (or the platform equivalent), falling back to `octaroute.json` in the
/// working directory if no config directory is known.
pub fn default_config_path() -> PathBuf {
    match dirs::config_dir() {
        Some(dir) => dir.join("octaroute").join("config.json"),
        None => PathBuf::from("octaroute.json"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("octaroute.json");
        std::fs::write(&path, r#"{"apiKey": "secret"}"#).unwrap();
        let cfg = load(&path).unwrap();
        assert_eq!(cfg.api_key, "secret");
        assert_eq!(cfg.http_listen, default_http_listen());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load(Path::new("/nonexistent/octaroute.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read(_, _)));
    }

    #[test]
    fn default_config_path_ends_in_octaroute_config() {
        let path = default_config_path();
        assert!(path.ends_with("config.json") || path == PathBuf::from("octaroute.json"));
    }
}
