//! # PACS管理模块
//!
//! 迁移工具的配置加载、验证与日志初始化

pub mod config;
pub mod logging;

pub use config::{ConfigValidator, EndpointConfig, LoggingConfig, MigrationConfig, NetworkConfig, RunConfig};
pub use logging::init_logging;
