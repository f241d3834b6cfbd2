//! # DICOM网络模块
//!
//! 基于 `dicom_ul` 上层协议的关联协商（含SCP/SCU角色选择）、DIMSE命令，
//! 以及 C-ECHO / C-FIND / C-GET / C-STORE 的SCU与存储SCP。

pub mod association;
pub mod client;
pub mod dimse;
pub mod network;
pub mod server;
pub mod services;
pub mod transfer_syntax;

pub use association::{RoleSelection, DEFAULT_MAX_PDU_LENGTH};
pub use dimse::{DimseStatus, SubOperationCounts};
pub use network::TcpDicomNetwork;
pub use services::*;
