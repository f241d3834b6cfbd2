//! 转发存储处理器
//!
//! 每个入站影像都会调用一次，无论来自独立监听器还是 C-GET 关联内的嵌套子操作。
//! 影像通过一个新的短期关联转发到目的端。转发结果只体现在计数器和日志中：
//! 对入站投递总是回复成功，只有处理数据集时的内部异常才回复 0xA700。

use crate::{counters::TransferCounters, profile::AssociationProfile};
use async_trait::async_trait;
use dicom_dictionary_std::tags;
use pacs_core::{sop_class::keyword_of, Endpoint, PacsError, Result};
use pacs_dicom::{
    dimse,
    transfer_syntax::{self, DEFAULT_TRANSFER_SYNTAXES},
    ContextRequest, DicomNetwork, DimseStatus, StoreEvent, StoreHandler, StoreInstance,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct ForwardingStoreHandler {
    network: Arc<dyn DicomNetwork>,
    destination: Endpoint,
    profile: AssociationProfile,
    counters: Arc<TransferCounters>,
}

impl ForwardingStoreHandler {
    pub fn new(
        network: Arc<dyn DicomNetwork>,
        destination: Endpoint,
        profile: AssociationProfile,
        counters: Arc<TransferCounters>,
    ) -> Self {
        Self {
            network,
            destination,
            profile,
            counters,
        }
    }

    pub fn counters(&self) -> &Arc<TransferCounters> {
        &self.counters
    }

    /// 以入站时协商的抽象语法转发到目的端，成功返回 true
    async fn forward(&self, mut instance: StoreInstance, abstract_syntax: String) -> bool {
        if instance.sop_class_uid != abstract_syntax {
            debug!(
                sop_instance = %instance.sop_instance_uid,
                "数据集SOP类 {} 与入站上下文 {} 不一致，按上下文转发",
                keyword_of(&instance.sop_class_uid),
                keyword_of(&abstract_syntax)
            );
            instance.sop_class_uid = abstract_syntax;
        }

        let mut offered = vec![instance.transfer_syntax.as_str()];
        if transfer_syntax::is_native_uncompressed(&instance.transfer_syntax) {
            offered.extend(
                DEFAULT_TRANSFER_SYNTAXES
                    .iter()
                    .copied()
                    .filter(|ts| *ts != instance.transfer_syntax),
            );
        }
        let contexts = vec![ContextRequest::new(&instance.sop_class_uid, &offered)];

        let mut association = match self.network.associate(self.profile.request(&self.destination, contexts)).await {
            Ok(association) => association,
            Err(e) => {
                error!(
                    sop_instance = %instance.sop_instance_uid,
                    "无法与目的端 {} 建立关联: {}", self.destination, e
                );
                return false;
            }
        };

        let result = association.store(&instance).await;
        if let Err(e) = association.release().await {
            warn!("释放转发关联失败: {}", e);
        }

        match result {
            Ok(status) if status.is_success() => {
                debug!(sop_instance = %instance.sop_instance_uid, "已转发到 {}", self.destination.ae_title);
                true
            }
            Ok(status) => {
                error!(
                    sop_instance = %instance.sop_instance_uid,
                    "目的端 {} 拒绝存储: {}", self.destination.ae_title, status
                );
                false
            }
            Err(e) => {
                error!(sop_instance = %instance.sop_instance_uid, "转发失败: {}", e);
                false
            }
        }
    }
}

/// 解析入站数据集并补全实例标识
fn inspect(event: &StoreEvent) -> Result<StoreInstance> {
    let object = dimse::decode_dataset(&event.instance.data, &event.instance.transfer_syntax)?;
    let mut instance = event.instance.clone();
    if instance.sop_instance_uid.is_empty() {
        instance.sop_instance_uid = dimse::element_str(&object, tags::SOP_INSTANCE_UID)
            .ok_or_else(|| PacsError::Dicom("数据集缺少 SOPInstanceUID".to_string()))?;
    }
    if instance.sop_class_uid.is_empty() {
        instance.sop_class_uid = dimse::element_str(&object, tags::SOP_CLASS_UID)
            .unwrap_or_else(|| event.context.abstract_syntax.clone());
    }
    Ok(instance)
}

#[async_trait]
impl StoreHandler for ForwardingStoreHandler {
    async fn handle_store(&self, event: StoreEvent) -> DimseStatus {
        let received = self.counters.record_received();

        let instance = match inspect(&event) {
            Ok(instance) => instance,
            Err(e) => {
                error!("处理来自 {} 的入站影像失败: {}", event.calling_ae_title, e);
                self.counters.record_handled(false);
                return DimseStatus::out_of_resources();
            }
        };
        info!(
            "接收影像 #{} {} ({}) 来自 {}",
            received,
            instance.sop_instance_uid,
            keyword_of(&instance.sop_class_uid),
            event.calling_ae_title
        );

        let handler = self.clone();
        let abstract_syntax = if event.context.abstract_syntax.is_empty() {
            instance.sop_class_uid.clone()
        } else {
            event.context.abstract_syntax.clone()
        };
        let outcome = tokio::spawn(async move { handler.forward(instance, abstract_syntax).await }).await;

        match outcome {
            Ok(forwarded) => {
                self.counters.record_handled(forwarded);
                DimseStatus::Success
            }
            Err(e) => {
                error!("转发任务异常结束: {}", e);
                self.counters.record_handled(false);
                DimseStatus::out_of_resources()
            }
        }
    }
}
