//! 能力探测：确认对端确实接受优先级最高的存储SOP类。仅用于诊断，结果只记录日志。

use crate::profile::AssociationProfile;
use pacs_core::{sop_class::SopClass, Endpoint};
use pacs_dicom::{
    transfer_syntax::DEFAULT_TRANSFER_SYNTAXES, ContextRequest, DicomNetwork,
};
use std::sync::Arc;
use tracing::{info, warn};

pub struct CapabilityProbe {
    network: Arc<dyn DicomNetwork>,
    profile: AssociationProfile,
    sop_class: SopClass,
}

impl CapabilityProbe {
    pub fn new(network: Arc<dyn DicomNetwork>, profile: AssociationProfile) -> Self {
        Self {
            network,
            profile,
            sop_class: SopClass::COMPUTED_RADIOGRAPHY,
        }
    }

    /// 对端是否接受探测SOP类；任何关联或协商失败都视为“不接受”
    pub async fn probe(&self, endpoint: &Endpoint) -> bool {
        let contexts = vec![ContextRequest::new(self.sop_class.uid, DEFAULT_TRANSFER_SYNTAXES)];

        let mut association = match self.network.associate(self.profile.request(endpoint, contexts)).await {
            Ok(association) => association,
            Err(e) => {
                warn!("探测 {} 失败: {}", endpoint, e);
                return false;
            }
        };

        let accepted: Vec<String> = association
            .accepted_contexts()
            .iter()
            .filter(|context| context.abstract_syntax == self.sop_class.uid)
            .map(|context| context.transfer_syntax.clone())
            .collect();
        if let Err(e) = association.release().await {
            warn!("释放探测关联失败: {}", e);
        }

        if accepted.is_empty() {
            warn!("{} 不接受 {}", endpoint, self.sop_class);
            false
        } else {
            info!("{} 接受 {}，传输语法: {}", endpoint, self.sop_class, accepted.join(", "));
            true
        }
    }
}
