//! 错误定义模块

use thiserror::Error;

/// 迁移系统统一错误类型
#[derive(Error, Debug)]
pub enum PacsError {
    #[error("DICOM处理错误: {0}")]
    Dicom(String),

    #[error("网络错误: {0}")]
    Network(#[from] std::io::Error),

    #[error("关联被拒绝: result={result}, source={source_code}, reason={reason}")]
    AssociationRejected {
        result: u8,
        source_code: u8,
        reason: u8,
    },

    #[error("关联已中止: {0}")]
    AssociationAborted(String),

    #[error("关联协商失败: {0}")]
    Negotiation(String),

    #[error("协议错误: {0}")]
    Protocol(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("监听器错误: {0}")]
    Listener(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("系统内部错误: {0}")]
    Internal(String),

    #[error("无效状态转换: 从 {from} 到 {event}")]
    InvalidStateTransition { from: String, event: String },
}

/// 统一结果类型
pub type Result<T> = std::result::Result<T, PacsError>;
