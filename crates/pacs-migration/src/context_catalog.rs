//! 存储表示上下文目录
//!
//! 对端在协商时可能静默丢弃超出内部上限的上下文，因此最重要的模态必须占据最靠前的位置。
//! 目录构造规则：
//! - 关键SOP类按固定顺序排在最前；
//! - 随后按参考目录的自然顺序补充常用白名单中的SOP类，跳过已包含的；
//! - 总数不超过上限。

use pacs_core::sop_class::{SopClass, COMMON_STORAGE_SOP_CLASSES, CRITICAL_STORAGE_SOP_CLASSES, STORAGE_SOP_CLASSES};
use pacs_dicom::{transfer_syntax::BASELINE_TRANSFER_SYNTAXES, ContextRequest};

/// 一次协商提议的存储上下文上限
pub const DEFAULT_CONTEXT_CAP: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextCatalog {
    entries: Vec<&'static SopClass>,
    critical_count: usize,
    cap: usize,
}

impl ContextCatalog {
    pub fn build(cap: usize) -> Self {
        // 关键条目本身超过上限时只截断关键条目
        let mut entries: Vec<&'static SopClass> = CRITICAL_STORAGE_SOP_CLASSES.iter().take(cap).collect();
        let critical_count = entries.len();

        for sop_class in STORAGE_SOP_CLASSES {
            if entries.len() >= cap {
                break;
            }
            if COMMON_STORAGE_SOP_CLASSES.contains(&sop_class.uid)
                && !entries.iter().any(|entry| entry.uid == sop_class.uid)
            {
                entries.push(sop_class);
            }
        }

        Self {
            entries,
            critical_count,
            cap,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn critical_count(&self) -> usize {
        self.critical_count
    }

    pub fn sop_classes(&self) -> &[&'static SopClass] {
        &self.entries
    }

    /// 每个SOP类以两个基线传输语法提议
    pub fn contexts(&self) -> Vec<ContextRequest> {
        self.entries
            .iter()
            .map(|sop_class| ContextRequest::new(sop_class.uid, BASELINE_TRANSFER_SYNTAXES))
            .collect()
    }
}

impl Default for ContextCatalog {
    fn default() -> Self {
        Self::build(DEFAULT_CONTEXT_CAP)
    }
}
