//! Server configuration: `<world>/server.json` plus command-line overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "server.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub world_dir: PathBuf,
    /// Used only when the world has no stored seed yet.
    pub seed: u64,
    /// Seconds a block may stay untouched before it is unloaded.
    pub unload_timeout_secs: f32,
    pub save_interval_secs: u64,
    pub tick_ms: u64,
    pub dashboard_port: u16,
    pub log_level: String,
    /// Liquid nodes transformed per tick.
    pub max_liquid_per_tick: usize,
    /// Blocks emerged around the origin at startup, per axis and direction.
    pub spawn_radius: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            world_dir: PathBuf::from("world"),
            seed: 0,
            unload_timeout_secs: 30.0,
            save_interval_secs: 60,
            tick_ms: 100,
            dashboard_port: 8000,
            log_level: "info".to_string(),
            max_liquid_per_tick: 1000,
            spawn_radius: 2,
        }
    }
}

impl ServerConfig {
    /// Reads `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating directory {}", dir.display()))?;
        }
        let text = serde_json::to_string_pretty(self).context("serializing config")?;
        std::fs::write(path, text).with_context(|| format!("writing config {}", path.display()))
    }

    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref world) = args.world {
            self.world_dir = world.clone();
        }
        if let Some(seed) = args.seed {
            self.seed = seed;
        }
        if let Some(t) = args.unload_timeout {
            self.unload_timeout_secs = t;
        }
        if let Some(s) = args.save_interval {
            self.save_interval_secs = s;
        }
        if let Some(ms) = args.tick_ms {
            self.tick_ms = ms;
        }
        if let Some(port) = args.dashboard_port {
            self.dashboard_port = port;
        }
        if let Some(ref level) = args.log_level {
            self.log_level = level.clone();
        }
    }
}

/// voxmap server command-line arguments.
///
/// CLI values override settings loaded from `<world>/server.json`.
#[derive(Parser, Debug, Default)]
#[command(name = "voxmap-server", about = "Persistent voxel map server")]
pub struct CliArgs {
    /// World directory (holds server.json, map_meta.json and sectors/).
    #[arg(long)]
    pub world: Option<PathBuf>,

    /// Seed for a new world.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Unload timeout in seconds.
    #[arg(long)]
    pub unload_timeout: Option<f32>,

    /// Autosave interval in seconds.
    #[arg(long)]
    pub save_interval: Option<u64>,

    /// Map tick length in milliseconds.
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Dashboard HTTP port.
    #[arg(long)]
    pub dashboard_port: Option<u16>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Run an in-memory demo and exit.
    #[arg(long)]
    pub demo: bool,
}

impl CliArgs {
    /// Where the config file lives for these arguments.
    pub fn config_path(&self) -> PathBuf {
        let world = self.world.clone().unwrap_or_else(|| ServerConfig::default().world_dir);
        world.join(CONFIG_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{ "seed": 42, "tick_ms": 50 }"#).unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.seed, 42);
        assert_eq!(config.tick_ms, 50);
        assert_eq!(config.dashboard_port, 8000);
        assert_eq!(config.unload_timeout_secs, 30.0);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let config = ServerConfig {
            seed: 7,
            log_level: "debug".into(),
            ..ServerConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(ServerConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        assert!(ServerConfig::load(&path).is_err());
    }

    #[test]
    fn cli_overrides_only_given_fields() {
        let mut config = ServerConfig::default();
        let args = CliArgs {
            seed: Some(99),
            dashboard_port: Some(9000),
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.seed, 99);
        assert_eq!(config.dashboard_port, 9000);
        assert_eq!(config.tick_ms, 100);
        assert_eq!(config.world_dir, PathBuf::from("world"));
    }

    #[test]
    fn cli_parses_flags() {
        let args = CliArgs::parse_from(["voxmap-server", "--world", "w2", "--demo", "--tick-ms", "20"]);
        assert!(args.demo);
        assert_eq!(args.tick_ms, Some(20));
        assert_eq!(args.config_path(), PathBuf::from("w2").join(CONFIG_FILE));
    }
}
