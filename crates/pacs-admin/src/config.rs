//! 配置管理
//!
//! 分层加载：内置默认值 → 可选的TOML文件 → `PACS_MIGRATE__` 前缀的环境变量，
//! 例如 `PACS_MIGRATE__SOURCE__PORT=4242`。

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use pacs_core::{
    utils::{is_valid_ae_title, parse_dicom_date},
    Endpoint, EndpointRole,
};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use tracing::{error, info};

/// 迁移工具完整配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MigrationConfig {
    /// 查询与检索的PACS
    pub source: EndpointConfig,
    /// 转发目标PACS
    pub destination: EndpointConfig,
    /// 本地AE与存储监听地址
    pub local: EndpointConfig,
    pub migration: RunConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    pub ae_title: String,
    pub host: String,
    pub port: u16,
}

impl EndpointConfig {
    fn new(ae_title: &str, host: &str, port: u16) -> Self {
        Self {
            ae_title: ae_title.to_string(),
            host: host.to_string(),
            port,
        }
    }

    pub fn endpoint(&self, role: EndpointRole) -> Endpoint {
        Endpoint::new(self.ae_title.clone(), self.host.clone(), self.port, role)
    }
}

/// 运行参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    /// `YYYYMMDD`，缺省为当天
    pub study_date: Option<String>,
    pub settle_timeout_secs: u64,
    pub drain_grace_secs: u64,
    pub use_completion_signal: bool,
    pub context_cap: usize,
}

impl RunConfig {
    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.settle_timeout_secs)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }
}

/// 关联参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    pub connect_timeout_secs: u64,
    pub dimse_timeout_secs: u64,
    pub release_timeout_secs: u64,
    pub max_pdu_length: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` 语法，`RUST_LOG` 优先
    pub level: String,
    /// 追加写入的日志文件，不设置则只输出到控制台
    pub file: Option<String>,
    pub console: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            source: EndpointConfig::new("DCM4CHEE", "127.0.0.1", 11112),
            destination: EndpointConfig::new("ORTHANC", "127.0.0.1", 11113),
            local: EndpointConfig::new("RADIANT", "0.0.0.0", 11114),
            migration: RunConfig::default(),
            network: NetworkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            study_date: None,
            settle_timeout_secs: 10,
            drain_grace_secs: 3,
            use_completion_signal: true,
            context_cap: 50,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            dimse_timeout_secs: 60,
            release_timeout_secs: 5,
            max_pdu_length: 16384,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("log.txt".to_string()),
            console: true,
        }
    }
}

impl MigrationConfig {
    /// 加载配置；给定的文件必须存在
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&Self::default()).context("Failed to build default configuration")?);
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(Path::new(path)));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("PACS_MIGRATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        let config: MigrationConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        match config_path {
            Some(path) => info!("Configuration loaded from: {}", path),
            None => info!("Configuration loaded from defaults and environment"),
        }
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

/// 配置验证器
#[derive(Debug)]
pub struct ConfigValidator {
    validation_rules: Vec<ValidationRule>,
}

#[derive(Debug)]
struct ValidationRule {
    field_path: &'static str,
    validator: fn(&MigrationConfig) -> Result<()>,
}

fn check_endpoint(endpoint: &EndpointConfig) -> Result<()> {
    if endpoint.port == 0 {
        anyhow::bail!("port cannot be 0");
    }
    if !is_valid_ae_title(&endpoint.ae_title) {
        anyhow::bail!("invalid AE title '{}'", endpoint.ae_title);
    }
    Ok(())
}

impl ConfigValidator {
    pub fn new() -> Self {
        let validation_rules = vec![
            ValidationRule {
                field_path: "source",
                validator: |config| check_endpoint(&config.source),
            },
            ValidationRule {
                field_path: "destination",
                validator: |config| check_endpoint(&config.destination),
            },
            ValidationRule {
                field_path: "local",
                validator: |config| check_endpoint(&config.local),
            },
            ValidationRule {
                field_path: "migration.study_date",
                validator: |config| match &config.migration.study_date {
                    Some(date) => parse_dicom_date(date).map(|_| ()).map_err(anyhow::Error::from),
                    None => Ok(()),
                },
            },
            ValidationRule {
                field_path: "migration.context_cap",
                validator: |config| {
                    if config.migration.context_cap == 0 {
                        Err(anyhow::anyhow!("context cap must be at least 1"))
                    } else {
                        Ok(())
                    }
                },
            },
            ValidationRule {
                field_path: "network.max_pdu_length",
                validator: |config| {
                    if config.network.max_pdu_length == 0 {
                        Err(anyhow::anyhow!("max PDU length cannot be 0"))
                    } else {
                        Ok(())
                    }
                },
            },
        ];

        Self { validation_rules }
    }

    /// 验证配置，报告第一个失败的规则
    pub fn validate(&self, config: &MigrationConfig) -> Result<()> {
        for rule in &self.validation_rules {
            if let Err(e) = (rule.validator)(config) {
                error!("Configuration validation failed for {}: {}", rule.field_path, e);
                return Err(e.context(format!("Invalid configuration: {}", rule.field_path)));
            }
        }
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MigrationConfig::load(None).unwrap();
        assert_eq!(config.source.ae_title, "DCM4CHEE");
        assert_eq!(config.local.port, 11114);
        assert!(ConfigValidator::new().validate(&config).is_ok());
    }

    #[test]
    fn test_file_overrides_single_fields() {
        let path = std::env::temp_dir().join(format!("pacs-migrate-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "[source]\nport = 4242\n\n[migration]\nstudy_date = \"20240131\"\nsettle_timeout_secs = 2\n",
        )
        .unwrap();

        let config = MigrationConfig::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.source.port, 4242);
        assert_eq!(config.source.ae_title, "DCM4CHEE");
        assert_eq!(config.migration.study_date.as_deref(), Some("20240131"));
        assert_eq!(config.migration.settle_timeout(), Duration::from_secs(2));
        assert_eq!(config.migration.drain_grace(), Duration::from_secs(3));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(MigrationConfig::load(Some("/nonexistent/pacs-migrate.toml")).is_err());
    }

    #[test]
    fn test_validation_rules() {
        let validator = ConfigValidator::new();

        let mut config = MigrationConfig::default();
        config.destination.port = 0;
        assert!(validator.validate(&config).is_err());

        let mut config = MigrationConfig::default();
        config.local.ae_title = "A_VERY_LONG_AE_TITLE".to_string();
        assert!(validator.validate(&config).is_err());

        let mut config = MigrationConfig::default();
        config.migration.study_date = Some("2024-01-31".to_string());
        assert!(validator.validate(&config).is_err());

        let mut config = MigrationConfig::default();
        config.migration.context_cap = 0;
        assert!(validator.validate(&config).is_err());
    }

    #[test]
    fn test_to_toml_lists_sections() {
        let rendered = MigrationConfig::default().to_toml().unwrap();
        for section in ["[source]", "[destination]", "[local]", "[migration]", "[network]", "[logging]"] {
            assert!(rendered.contains(section), "missing {}", section);
        }
        assert!(rendered.contains("ae_title = \"ORTHANC\""));
    }
}
