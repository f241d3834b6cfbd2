//! 迁移计划：源端存在而目的端不存在的研究

use pacs_core::StudyRecord;
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    studies: Vec<StudyRecord>,
    source_count: usize,
    destination_count: usize,
}

impl MigrationPlan {
    /// 按 Study Instance UID 去重，保留源端查询顺序。
    /// 目的端结果为空时不做过滤，避免把失败的查询当成“全部已迁移”。
    pub fn compute(source: &[StudyRecord], destination: &[StudyRecord]) -> Self {
        let studies = if destination.is_empty() {
            source.to_vec()
        } else {
            let migrated: HashSet<&str> = destination.iter().map(|s| s.study_uid.as_str()).collect();
            source
                .iter()
                .filter(|study| !migrated.contains(study.study_uid.as_str()))
                .cloned()
                .collect()
        };

        Self {
            studies,
            source_count: source.len(),
            destination_count: destination.len(),
        }
    }

    pub fn studies(&self) -> &[StudyRecord] {
        &self.studies
    }

    pub fn len(&self) -> usize {
        self.studies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.studies.is_empty()
    }

    pub fn source_count(&self) -> usize {
        self.source_count
    }

    pub fn destination_count(&self) -> usize {
        self.destination_count
    }

    /// 已存在于目的端而被跳过的数量
    pub fn skipped(&self) -> usize {
        self.source_count - self.studies.len()
    }
}
