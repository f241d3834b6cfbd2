//! 本地AE发起关联时的公共参数

use pacs_core::Endpoint;
use pacs_dicom::{AssociationRequest, AssociationTimeouts, ContextRequest};

#[derive(Debug, Clone)]
pub struct AssociationProfile {
    pub calling_ae_title: String,
    pub timeouts: AssociationTimeouts,
    pub max_pdu_length: u32,
}

impl AssociationProfile {
    pub fn new(calling_ae_title: impl Into<String>, timeouts: AssociationTimeouts, max_pdu_length: u32) -> Self {
        Self {
            calling_ae_title: calling_ae_title.into(),
            timeouts,
            max_pdu_length,
        }
    }

    /// 以本地AE身份向 `endpoint` 请求给定的表示上下文
    pub fn request(&self, endpoint: &Endpoint, contexts: Vec<ContextRequest>) -> AssociationRequest {
        AssociationRequest::new(endpoint.clone(), &self.calling_ae_title, contexts)
            .with_timeouts(self.timeouts)
            .with_max_pdu_length(self.max_pdu_length)
    }
}
