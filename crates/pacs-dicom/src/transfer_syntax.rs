//! DICOM传输语法支持模块
//!
//! 协商时提供的传输语法列表，以及在未压缩传输语法之间转码所需的查找。

use dicom_encoding::transfer_syntax::{TransferSyntax, TransferSyntaxIndex};
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use pacs_core::{utils::trim_dicom_value, PacsError, Result};

/// 常用的传输语法UID常量
pub mod transfer_syntax_uids {
    /// 隐式VR Little Endian (默认传输语法)
    pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";

    /// 显式VR Little Endian
    pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";

    /// 显式VR Big Endian
    pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";

    /// JPEG Baseline (Process 1)
    pub const JPEG_BASELINE: &str = "1.2.840.10008.1.2.4.50";

    /// JPEG Lossless, Non-Hierarchical, First-Order Prediction
    pub const JPEG_LOSSLESS_SV1: &str = "1.2.840.10008.1.2.4.70";

    /// JPEG 2000 Image Compression (Lossless Only)
    pub const JPEG_2000_LOSSLESS: &str = "1.2.840.10008.1.2.4.90";

    /// RLE Lossless
    pub const RLE_LOSSLESS: &str = "1.2.840.10008.1.2.5";
}

use transfer_syntax_uids::*;

static REGISTRY: TransferSyntaxRegistry = TransferSyntaxRegistry;

/// 两个基线传输语法，每个存储上下文都会提供
pub const BASELINE_TRANSFER_SYNTAXES: &[&str] = &[IMPLICIT_VR_LITTLE_ENDIAN, EXPLICIT_VR_LITTLE_ENDIAN];

/// 作为请求方时默认提供的传输语法（与常见工具包默认值一致）
pub const DEFAULT_TRANSFER_SYNTAXES: &[&str] = &[
    IMPLICIT_VR_LITTLE_ENDIAN,
    EXPLICIT_VR_LITTLE_ENDIAN,
    EXPLICIT_VR_BIG_ENDIAN,
];

/// 是否为未压缩的原生传输语法（可在彼此之间直接转码）
pub fn is_native_uncompressed(uid: &str) -> bool {
    matches!(
        trim_dicom_value(uid),
        IMPLICIT_VR_LITTLE_ENDIAN | EXPLICIT_VR_LITTLE_ENDIAN | EXPLICIT_VR_BIG_ENDIAN
    )
}

/// 从注册表解析传输语法
pub fn resolve(uid: &str) -> Result<&'static TransferSyntax> {
    let uid = trim_dicom_value(uid);
    REGISTRY
        .get(uid)
        .ok_or_else(|| PacsError::Dicom(format!("不支持的传输语法: {}", uid)))
}

/// 传输语法的名称
pub fn name_of(uid: &str) -> String {
    match trim_dicom_value(uid) {
        IMPLICIT_VR_LITTLE_ENDIAN => "Implicit VR Little Endian".to_string(),
        EXPLICIT_VR_LITTLE_ENDIAN => "Explicit VR Little Endian".to_string(),
        EXPLICIT_VR_BIG_ENDIAN => "Explicit VR Big Endian".to_string(),
        JPEG_BASELINE => "JPEG Baseline (Process 1)".to_string(),
        JPEG_LOSSLESS_SV1 => "JPEG Lossless, Non-Hierarchical, First-Order Prediction".to_string(),
        JPEG_2000_LOSSLESS => "JPEG 2000 Image Compression (Lossless Only)".to_string(),
        RLE_LOSSLESS => "RLE Lossless".to_string(),
        other => format!("Unknown Transfer Syntax ({})", other),
    }
}
