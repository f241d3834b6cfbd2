//! # PACS Core
//!
//! 迁移系统的核心模块，提供基础数据结构、SOP类目录、错误定义和通用工具。

pub mod error;
pub mod models;
pub mod sop_class;
pub mod utils;

pub use error::{PacsError, Result};
pub use models::*;
pub use sop_class::{SopClass, SopClassKind};
