//! DICOM网络服务接口
//!
//! 迁移引擎只依赖这里定义的特征：建立关联、在关联上执行 C-FIND / C-GET / C-STORE，
//! 以及启动存储监听器。`TcpDicomNetwork` 提供基于TCP的实现，测试中可替换为模拟实现。

use crate::{
    association::{RoleSelection, DEFAULT_MAX_PDU_LENGTH},
    dimse::{self, DimseStatus, SubOperationCounts},
    transfer_syntax,
};
use async_trait::async_trait;
use dicom::object::InMemDicomObject;
use pacs_core::{Endpoint, PacsError, Result};
use std::{net::SocketAddr, sync::Arc, time::Duration};

/// 请求的表示上下文（抽象语法 + 候选传输语法）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextRequest {
    pub abstract_syntax: String,
    pub transfer_syntaxes: Vec<String>,
}

impl ContextRequest {
    pub fn new(abstract_syntax: &str, transfer_syntaxes: &[&str]) -> Self {
        Self {
            abstract_syntax: abstract_syntax.to_string(),
            transfer_syntaxes: transfer_syntaxes.iter().map(|ts| ts.to_string()).collect(),
        }
    }
}

/// 协商后被接受的表示上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedContext {
    pub id: u8,
    pub abstract_syntax: String,
    pub transfer_syntax: String,
}

/// 关联级别的超时设置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociationTimeouts {
    pub connect: Duration,
    pub dimse: Duration,
    pub release: Duration,
}

impl Default for AssociationTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            dimse: Duration::from_secs(60),
            release: Duration::from_secs(5),
        }
    }
}

/// 建立关联所需的全部参数
#[derive(Clone)]
pub struct AssociationRequest {
    pub endpoint: Endpoint,
    pub calling_ae_title: String,
    pub contexts: Vec<ContextRequest>,
    pub role_selections: Vec<RoleSelection>,
    /// 关联内嵌套 C-STORE 子操作的处理器
    pub store_handler: Option<Arc<dyn StoreHandler>>,
    pub timeouts: AssociationTimeouts,
    pub max_pdu_length: u32,
}

impl AssociationRequest {
    pub fn new(endpoint: Endpoint, calling_ae_title: &str, contexts: Vec<ContextRequest>) -> Self {
        Self {
            endpoint,
            calling_ae_title: calling_ae_title.to_string(),
            contexts,
            role_selections: Vec::new(),
            store_handler: None,
            timeouts: AssociationTimeouts::default(),
            max_pdu_length: DEFAULT_MAX_PDU_LENGTH,
        }
    }

    pub fn with_role_selections(mut self, role_selections: Vec<RoleSelection>) -> Self {
        self.role_selections = role_selections;
        self
    }

    pub fn with_store_handler(mut self, handler: Arc<dyn StoreHandler>) -> Self {
        self.store_handler = Some(handler);
        self
    }

    pub fn with_timeouts(mut self, timeouts: AssociationTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_max_pdu_length(mut self, max_pdu_length: u32) -> Self {
        self.max_pdu_length = max_pdu_length;
        self
    }
}

/// C-FIND 的一条响应
#[derive(Debug, Clone)]
pub struct FindResponse {
    pub status: DimseStatus,
    pub identifier: Option<InMemDicomObject>,
}

/// C-GET 的一条响应
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetResponse {
    pub status: DimseStatus,
    pub sub_operations: SubOperationCounts,
}

/// 待发送或已接收的一个SOP实例
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInstance {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    pub transfer_syntax: String,
    pub data: Vec<u8>,
}

impl StoreInstance {
    /// 在未压缩传输语法之间重新编码
    pub fn transcode(&self, target_transfer_syntax: &str) -> Result<StoreInstance> {
        if !transfer_syntax::is_native_uncompressed(&self.transfer_syntax)
            || !transfer_syntax::is_native_uncompressed(target_transfer_syntax)
        {
            return Err(PacsError::Dicom(format!(
                "无法从 {} 转码到 {}",
                transfer_syntax::name_of(&self.transfer_syntax),
                transfer_syntax::name_of(target_transfer_syntax)
            )));
        }

        let object = dimse::decode_dataset(&self.data, &self.transfer_syntax)?;
        Ok(StoreInstance {
            sop_class_uid: self.sop_class_uid.clone(),
            sop_instance_uid: self.sop_instance_uid.clone(),
            transfer_syntax: target_transfer_syntax.to_string(),
            data: dimse::encode_dataset(&object, target_transfer_syntax)?,
        })
    }
}

/// 一次入站 C-STORE 事件
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub instance: StoreInstance,
    pub context: AcceptedContext,
    pub calling_ae_title: String,
}

/// 入站存储事件处理器
#[async_trait]
pub trait StoreHandler: Send + Sync {
    /// 返回给对端的DIMSE状态
    async fn handle_store(&self, event: StoreEvent) -> DimseStatus;
}

/// 已建立的DICOM关联
#[async_trait]
pub trait Association: Send {
    fn id(&self) -> &str;

    fn accepted_contexts(&self) -> &[AcceptedContext];

    async fn echo(&mut self) -> Result<DimseStatus>;

    /// 发送 C-FIND，收集所有响应（含最终状态）
    async fn find(&mut self, query: &InMemDicomObject, model: &str) -> Result<Vec<FindResponse>>;

    /// 发送 C-GET；嵌套的 C-STORE 子操作交给关联上的存储处理器
    async fn get(&mut self, query: &InMemDicomObject, model: &str) -> Result<Vec<GetResponse>>;

    async fn store(&mut self, instance: &StoreInstance) -> Result<DimseStatus>;

    /// 释放关联，重复调用无副作用
    async fn release(&mut self) -> Result<()>;
}

/// 存储监听器配置
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub ae_title: String,
    pub bind_host: String,
    pub port: u16,
    pub contexts: Vec<ContextRequest>,
    pub max_pdu_length: u32,
    pub timeouts: AssociationTimeouts,
}

/// 后台运行的监听器句柄
#[async_trait]
pub trait ListenerHandle: Send + Sync {
    fn local_addr(&self) -> SocketAddr;

    async fn shutdown(&mut self) -> Result<()>;
}

/// DICOM网络
#[async_trait]
pub trait DicomNetwork: Send + Sync {
    async fn associate(&self, request: AssociationRequest) -> Result<Box<dyn Association>>;

    async fn start_listener(
        &self,
        config: ListenerConfig,
        handler: Arc<dyn StoreHandler>,
    ) -> Result<Box<dyn ListenerHandle>>;
}
