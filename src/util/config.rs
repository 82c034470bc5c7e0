//! Server configuration
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `NETDS_*` environment variables (nested keys joined with `__`, e.g.
//! `NETDS_RENDERER__VIEWPORT=256`).

use std::path::Path;

use config::{Config, Environment, File, FileFormat, Map};
use serde::{Deserialize, Serialize};

use crate::data::{Pattern, VolumeSpec};
use crate::render::RendererConfig;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Rank that owns the client socket and writes every reply
    pub source_rank: i32,
    /// Bricks per rotation batch until a client sends `BatchSize`
    pub max_batch_size: usize,
    pub log_level: String,
    pub renderer: RendererConfig,
    pub volumes: Vec<VolumeSpec>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 4445,
            source_rank: 0,
            max_batch_size: 16,
            log_level: "info".to_string(),
            renderer: RendererConfig::default(),
            volumes: vec![
                VolumeSpec {
                    name: "volume.uvf".to_string(),
                    dimensions: [128, 128, 128],
                    brick_size: [32, 32, 32],
                    pattern: Pattern::Sphere,
                },
                VolumeSpec {
                    name: "gradient.uvf".to_string(),
                    dimensions: [64, 64, 32],
                    brick_size: [16, 16, 16],
                    pattern: Pattern::Gradient,
                },
            ],
        }
    }
}

impl ServerConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(path, None)
    }

    /// `env` replaces the process environment when given
    fn load_from(path: Option<&Path>, env: Option<Map<String, String>>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&ServerConfig::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("NETDS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: ServerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source_rank < 0 {
            return Err(Error::Config(format!("negative source rank {}", self.source_rank)));
        }
        for volume in &self.volumes {
            if volume.dimensions.contains(&0) || volume.brick_size.contains(&0) {
                return Err(Error::Config(format!("volume '{}' has a zero dimension", volume.name)));
            }
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_load_without_a_file() {
        let config = ServerConfig::load_from(None, Some(Map::new())).unwrap();
        assert_eq!(config.max_batch_size, 16);
        assert_eq!(config.source_rank, 0);
        assert!(config.volumes.iter().any(|v| v.name == "volume.uvf"));
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("netds-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("netds.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
port = 5000
max_batch_size = 64

[renderer]
viewport = 256

[[volumes]]
name = "tiny.uvf"
dimensions = [8, 8, 8]
brick_size = [4, 4, 4]
pattern = "checker"
"#
        )
        .unwrap();

        let config = ServerConfig::load_from(Some(&path), Some(Map::new())).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.max_batch_size, 64);
        assert_eq!(config.renderer.viewport, 256);
        assert_eq!(config.volumes.len(), 1);
        assert_eq!(config.volumes[0].pattern, Pattern::Checker);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn environment_overrides_defaults() {
        let env: Map<String, String> = [
            ("NETDS_PORT", "5123"),
            ("NETDS_MAX_BATCH_SIZE", "32"),
            ("NETDS_RENDERER__VIEWPORT", "256"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = ServerConfig::load_from(None, Some(env)).unwrap();
        assert_eq!(config.port, 5123);
        assert_eq!(config.max_batch_size, 32);
        assert_eq!(config.renderer.viewport, 256);
        assert_eq!(config.renderer.fov_degrees, 45.0);
    }

    #[test]
    fn toml_dump_reloads() {
        let text = ServerConfig::default().to_toml().unwrap();
        let parsed: ServerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.address(), "0.0.0.0:4445");
        assert_eq!(parsed.volumes.len(), 2);
    }

    #[test]
    fn zero_sized_volume_is_rejected() {
        let mut config = ServerConfig::default();
        config.volumes[0].brick_size = [0, 4, 4];
        assert!(config.validate().is_err());
    }
}
