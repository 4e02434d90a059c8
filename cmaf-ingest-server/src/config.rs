//! Server configuration, built from CLI flags (spec §6 "CLI surface").
//!
//! No argument-parsing crate: the CLI surface is explicitly out of the
//! core's scope and this is the thin front, so flags are read by hand the
//! way the teacher's own `main.rs` reads its one positional config-path
//! argument.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub storage_root: PathBuf,
    pub url_prefix: String,
    pub default_timeshift_buffer_depth_secs: u32,
    pub log_level: String,
    pub log_format: LogFormat,
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            storage_root: PathBuf::from("./storage"),
            url_prefix: "/upload".to_string(),
            default_timeshift_buffer_depth_secs: 60,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            config_path: None,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parse `--port`, `--storage`, `--prefix`, `--maxbuffer`, `--loglevel`,
    /// `--logformat`, `--config` and `--version` out of a raw argument list
    /// (normally `std::env::args().skip(1)`). Returns `Ok(None)` if
    /// `--version` was given, since the caller just prints the version and
    /// exits 0 rather than starting a server.
    pub fn from_args<I: IntoIterator<Item = String>>(
        args: I,
    ) -> Result<Option<Self>, String> {
        let mut config = ServerConfig::default();
        let mut iter = args.into_iter();

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--version" => return Ok(None),
                "--port" => config.port = next_value(&mut iter, "--port")?.parse::<u16>().map_err(|e| e.to_string())?,
                "--storage" => config.storage_root = PathBuf::from(next_value(&mut iter, "--storage")?),
                "--prefix" => config.url_prefix = normalize_prefix(&next_value(&mut iter, "--prefix")?),
                "--maxbuffer" => {
                    config.default_timeshift_buffer_depth_secs =
                        next_value(&mut iter, "--maxbuffer")?.parse::<u32>().map_err(|e| e.to_string())?
                }
                "--loglevel" => config.log_level = next_value(&mut iter, "--loglevel")?,
                "--logformat" => {
                    config.log_format = match next_value(&mut iter, "--logformat")?.as_str() {
                        "json" => LogFormat::Json,
                        "pretty" => LogFormat::Pretty,
                        other => return Err(format!("unknown --logformat value: {other}")),
                    }
                }
                "--config" => config.config_path = Some(PathBuf::from(next_value(&mut iter, "--config")?)),
                other => return Err(format!("unrecognized argument: {other}")),
            }
        }

        Ok(Some(config))
    }
}

fn next_value<I: Iterator<Item = String>>(iter: &mut I, flag: &str) -> Result<String, String> {
    iter.next().ok_or_else(|| format!("{flag} requires a value"))
}

fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.url_prefix, "/upload");
        assert_eq!(config.default_timeshift_buffer_depth_secs, 60);
    }

    #[test]
    fn parses_flags() {
        let args = ["--port", "9000", "--storage", "/data", "--prefix", "ingest", "--loglevel", "debug"]
            .into_iter()
            .map(String::from);
        let config = ServerConfig::from_args(args).unwrap().unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.storage_root, PathBuf::from("/data"));
        assert_eq!(config.url_prefix, "/ingest");
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn version_flag_short_circuits() {
        let args = ["--version".to_string()];
        assert!(ServerConfig::from_args(args).unwrap().is_none());
    }

    #[test]
    fn rejects_unknown_flag() {
        let args = ["--bogus".to_string()];
        assert!(ServerConfig::from_args(args).is_err());
    }
}
