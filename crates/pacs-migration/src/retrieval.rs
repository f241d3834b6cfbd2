//! 研究检索编排
//!
//! 对每个研究建立带扩展角色协商的关联，使源端可以在同一关联内把影像以
//! C-STORE 子操作推送回来，然后发送研究级 C-GET 并解释子操作状态。
//! C-GET 的最终状态只说明源端已完成投递尝试，嵌套投递何时真正转发完毕由调用方另行等待。

use crate::{context_catalog::ContextCatalog, profile::AssociationProfile};
use dicom::object::InMemDicomObject;
use dicom_core::{dicom_value, DataElement, VR};
use dicom_dictionary_std::tags;
use pacs_core::{
    sop_class::{SopClass, STORAGE_SOP_CLASSES},
    Endpoint, Result,
};
use pacs_dicom::{
    transfer_syntax::DEFAULT_TRANSFER_SYNTAXES, Association, AssociationRequest, ContextRequest,
    DicomNetwork, DimseStatus, RoleSelection, StoreHandler, SubOperationCounts,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 三种查询/检索信息模型
const RETRIEVE_MODELS: [SopClass; 3] = [
    SopClass::STUDY_ROOT_GET,
    SopClass::PATIENT_ROOT_GET,
    SopClass::PATIENT_STUDY_ONLY_GET,
];

/// 单个研究的检索结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalOutcome {
    /// 是否观察到最终成功状态
    pub success: bool,
    pub final_status: Option<DimseStatus>,
    pub sub_operations: SubOperationCounts,
}

impl RetrievalOutcome {
    pub fn failed() -> Self {
        Self {
            success: false,
            final_status: None,
            sub_operations: SubOperationCounts::default(),
        }
    }

    /// 源端报告已投递的影像数，用作完成信号
    pub fn expected_deliveries(&self) -> Option<u32> {
        if self.success {
            self.sub_operations.delivered()
        } else {
            None
        }
    }
}

/// 针对一个研究打开的检索关联
pub struct RetrievalSession {
    association: Box<dyn Association>,
    study_uid: String,
}

impl RetrievalSession {
    pub async fn retrieve(&mut self) -> Result<RetrievalOutcome> {
        let query = retrieve_query(&self.study_uid);
        let responses = self.association.get(&query, SopClass::STUDY_ROOT_GET.uid).await?;

        let mut outcome = RetrievalOutcome::failed();
        for response in responses {
            let counts = response.sub_operations;
            match response.status {
                DimseStatus::Success => {
                    info!(
                        study = %self.study_uid,
                        "C-GET 完成: completed={:?}, failed={:?}, warning={:?}",
                        counts.completed, counts.failed, counts.warning
                    );
                    outcome.success = true;
                }
                status if status.is_pending() => {
                    debug!(
                        study = %self.study_uid,
                        "C-GET 进行中: remaining={:?}, completed={:?}",
                        counts.remaining, counts.completed
                    );
                }
                status => warn!(study = %self.study_uid, "C-GET 状态 {}", status),
            }
            if !response.status.is_pending() {
                outcome.final_status = Some(response.status);
                outcome.sub_operations = counts;
            }
        }
        Ok(outcome)
    }

    /// 释放关联，不论检索结果如何
    pub async fn close(mut self) {
        if let Err(e) = self.association.release().await {
            warn!(study = %self.study_uid, "释放检索关联失败: {}", e);
        }
    }
}

pub struct RetrievalOrchestrator {
    network: Arc<dyn DicomNetwork>,
    source: Endpoint,
    profile: AssociationProfile,
    catalog: ContextCatalog,
    handler: Arc<dyn StoreHandler>,
}

impl RetrievalOrchestrator {
    pub fn new(
        network: Arc<dyn DicomNetwork>,
        source: Endpoint,
        profile: AssociationProfile,
        catalog: ContextCatalog,
        handler: Arc<dyn StoreHandler>,
    ) -> Self {
        Self {
            network,
            source,
            profile,
            catalog,
            handler,
        }
    }

    /// 检索模型 + 存储目录，外加对所有存储类请求本地SCP角色
    pub fn association_request(&self) -> AssociationRequest {
        let mut contexts: Vec<ContextRequest> = RETRIEVE_MODELS
            .iter()
            .map(|model| ContextRequest::new(model.uid, DEFAULT_TRANSFER_SYNTAXES))
            .collect();
        contexts.extend(self.catalog.contexts());

        let role_selections = STORAGE_SOP_CLASSES
            .iter()
            .map(|sop_class| RoleSelection {
                sop_class_uid: sop_class.uid.to_string(),
                scu_role: false,
                scp_role: true,
            })
            .collect();

        self.profile
            .request(&self.source, contexts)
            .with_role_selections(role_selections)
            .with_store_handler(Arc::clone(&self.handler))
    }

    pub async fn open_session(&self, study_uid: &str) -> Result<RetrievalSession> {
        let association = self.network.associate(self.association_request()).await?;
        debug!(
            study = %study_uid,
            "检索关联 {} 已建立, {} 个上下文被接受",
            association.id(),
            association.accepted_contexts().len()
        );
        Ok(RetrievalSession {
            association,
            study_uid: study_uid.to_string(),
        })
    }

    /// 检索一个研究；任何错误都记录并视为失败
    pub async fn retrieve_study(&self, study_uid: &str) -> RetrievalOutcome {
        let mut session = match self.open_session(study_uid).await {
            Ok(session) => session,
            Err(e) => {
                error!(study = %study_uid, "无法与源端 {} 建立检索关联: {}", self.source, e);
                return RetrievalOutcome::failed();
            }
        };

        let result = session.retrieve().await;
        session.close().await;

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(study = %study_uid, "检索失败: {}", e);
                RetrievalOutcome::failed()
            }
        }
    }
}

/// 研究级检索标识
pub fn retrieve_query(study_uid: &str) -> InMemDicomObject {
    let mut query = InMemDicomObject::new_empty();
    query.put(DataElement::new(tags::QUERY_RETRIEVE_LEVEL, VR::CS, dicom_value!(Str, "STUDY")));
    query.put(DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, dicom_value!(Str, study_uid)));
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        counters::TransferCounters,
        forwarder::ForwardingStoreHandler,
        testing::{ct_instance, Call, GetScript, MockNetwork, MockPeer},
    };
    use pacs_core::EndpointRole;
    use pacs_dicom::AssociationTimeouts;

    fn build(network: MockNetwork) -> (RetrievalOrchestrator, Arc<TransferCounters>) {
        let network: Arc<dyn DicomNetwork> = Arc::new(network);
        let profile = AssociationProfile::new("RADIANT", AssociationTimeouts::default(), 16384);
        let counters = Arc::new(TransferCounters::new());
        let handler = ForwardingStoreHandler::new(
            network.clone(),
            Endpoint::new("ORTHANC", "127.0.0.1", 11113, EndpointRole::Destination),
            profile.clone(),
            counters.clone(),
        );
        let orchestrator = RetrievalOrchestrator::new(
            network,
            Endpoint::new("DCM4CHEE", "127.0.0.1", 11112, EndpointRole::Source),
            profile,
            ContextCatalog::default(),
            Arc::new(handler),
        );
        (orchestrator, counters)
    }

    #[test]
    fn test_association_request_shape() {
        let (orchestrator, _) = build(MockNetwork::new());
        let request = orchestrator.association_request();

        let models: Vec<&str> = request.contexts[..3].iter().map(|c| c.abstract_syntax.as_str()).collect();
        assert_eq!(
            models,
            vec![
                SopClass::STUDY_ROOT_GET.uid,
                SopClass::PATIENT_ROOT_GET.uid,
                SopClass::PATIENT_STUDY_ONLY_GET.uid
            ]
        );
        assert_eq!(request.contexts.len(), 3 + ContextCatalog::default().len());
        assert_eq!(request.role_selections.len(), STORAGE_SOP_CLASSES.len());
        assert!(request.role_selections.iter().all(|r| r.scp_role && !r.scu_role));
        assert!(request.store_handler.is_some());
    }

    #[tokio::test]
    async fn test_nested_deliveries_are_forwarded() {
        let source = MockPeer::with_studies(&["1.1"])
            .with_get("1.1", GetScript::success(vec![ct_instance("1.1.1"), ct_instance("1.1.2")]));
        let network = MockNetwork::new()
            .with_peer("DCM4CHEE", source)
            .with_peer("ORTHANC", MockPeer::default());
        let (orchestrator, counters) = build(network.clone());

        let outcome = orchestrator.retrieve_study("1.1").await;
        assert!(outcome.success);
        assert_eq!(outcome.expected_deliveries(), Some(2));
        assert_eq!(counters.snapshot().forwarded, 2);
        assert_eq!(network.retrieved_studies(), vec!["1.1".to_string()]);
        assert!(network.calls().contains(&Call::Release { ae_title: "DCM4CHEE".to_string() }));
    }

    #[tokio::test]
    async fn test_failure_status_and_unreachable_source() {
        let source = MockPeer::default().with_get("1.2", GetScript::failure(0xC000));
        let network = MockNetwork::new().with_peer("DCM4CHEE", source);
        let (orchestrator, _) = build(network.clone());

        let outcome = orchestrator.retrieve_study("1.2").await;
        assert!(!outcome.success);
        assert_eq!(outcome.final_status, Some(DimseStatus::Failure(0xC000)));
        assert_eq!(outcome.expected_deliveries(), None);
        assert!(network.calls().contains(&Call::Release { ae_title: "DCM4CHEE".to_string() }));

        let (unreachable, _) = build(MockNetwork::new().with_peer("DCM4CHEE", MockPeer::unreachable()));
        assert_eq!(unreachable.retrieve_study("1.3").await, RetrievalOutcome::failed());
    }
}
