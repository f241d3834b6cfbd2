//! 核心数据模型定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 端点角色
///
/// 角色在进程启动时确定，按控制流划分：`Source` 为查询/检索目标，
/// `Destination` 为转发目标，`Local` 为本地存储监听器。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EndpointRole {
    Source,
    Destination,
    Local,
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointRole::Source => write!(f, "source"),
            EndpointRole::Destination => write!(f, "destination"),
            EndpointRole::Local => write!(f, "local"),
        }
    }
}

/// DICOM应用实体端点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub ae_title: String, // 应用实体标题
    pub host: String,
    pub port: u16,
    pub role: EndpointRole,
}

impl Endpoint {
    pub fn new(ae_title: impl Into<String>, host: impl Into<String>, port: u16, role: EndpointRole) -> Self {
        Self {
            ae_title: ae_title.into(),
            host: host.into(),
            port,
            role,
        }
    }

    /// `host:port` 形式的地址
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{} ({})", self.ae_title, self.host, self.port, self.role)
    }
}

/// C-FIND 返回的检查记录
///
/// 同一端点内 `study_uid` 唯一标识一个检查；记录不做持久化。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StudyRecord {
    pub study_uid: String,                   // Study Instance UID
    pub patient_name: Option<String>,        // 患者姓名
    pub patient_id: Option<String>,          // 患者ID
    pub accession_number: Option<String>,    // 检查号
    pub description: Option<String>,         // 检查描述
}

impl StudyRecord {
    pub fn new(study_uid: impl Into<String>) -> Self {
        Self {
            study_uid: study_uid.into(),
            patient_name: None,
            patient_id: None,
            accession_number: None,
            description: None,
        }
    }

    /// 日志用的简短描述
    pub fn summary(&self) -> String {
        format!(
            "{} ({}) - {}",
            self.patient_name.as_deref().unwrap_or("N/A"),
            self.patient_id.as_deref().unwrap_or("N/A"),
            self.description.as_deref().unwrap_or("N/A"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_display() {
        let endpoint = Endpoint::new("DCM4CHEE", "10.0.0.5", 11112, EndpointRole::Source);
        assert_eq!(endpoint.address(), "10.0.0.5:11112");
        assert_eq!(endpoint.to_string(), "DCM4CHEE@10.0.0.5:11112 (source)");
    }

    #[test]
    fn test_study_summary_defaults() {
        let mut study = StudyRecord::new("1.2.3");
        assert_eq!(study.summary(), "N/A (N/A) - N/A");

        study.patient_name = Some("DOE^JOHN".to_string());
        study.patient_id = Some("P001".to_string());
        assert_eq!(study.summary(), "DOE^JOHN (P001) - N/A");
    }
}
