//! DICOM客户端关联（SCU）

use crate::{
    association::{self, ChannelEvent, DimseChannel, PduStream, PduTransport},
    dimse::{self, CommandField, CommandSet, DimseMessage, DimseStatus},
    services::{
        AcceptedContext, Association, AssociationRequest, FindResponse, GetResponse, StoreEvent,
        StoreHandler, StoreInstance,
    },
    transfer_syntax,
};
use async_trait::async_trait;
use dicom::object::InMemDicomObject;
use dicom_ul::Pdu;
use pacs_core::{sop_class::SopClass, Endpoint, PacsError, Result};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// 主动发起的DICOM关联
pub struct ClientAssociation {
    id: String,
    endpoint: Endpoint,
    calling_ae_title: String,
    channel: DimseChannel<PduStream>,
    contexts: Vec<AcceptedContext>,
    store_handler: Option<Arc<dyn StoreHandler>>,
    release_timeout: Duration,
    next_message_id: u16,
    released: bool,
}

impl ClientAssociation {
    /// 连接对端并完成关联协商
    pub async fn connect(request: AssociationRequest) -> Result<Self> {
        let rq = association::build_associate_rq(&request)?;
        let address = request.endpoint.address();

        let stream = tokio::time::timeout(request.timeouts.connect, TcpStream::connect(&address))
            .await
            .map_err(|_| PacsError::Timeout(format!("连接 {} 超过 {:?}", address, request.timeouts.connect)))??;
        let mut link = PduStream::new(stream, request.max_pdu_length);

        debug!("向 {} 提议 {} 个表示上下文", request.endpoint, rq.presentation_contexts.len());
        link.send(&Pdu::AssociationRQ(rq.clone())).await?;

        let reply = tokio::time::timeout(request.timeouts.dimse, link.receive())
            .await
            .map_err(|_| PacsError::Timeout(format!("等待 {} 的关联应答超时", request.endpoint)))??;

        let ac = match reply {
            Some(Pdu::AssociationAC(ac)) => ac,
            Some(Pdu::AssociationRJ(rj)) => return Err(association::rejection(&rj)),
            Some(Pdu::AbortRQ { source }) => {
                return Err(PacsError::AssociationAborted(format!("协商期间被中止: {:?}", source)));
            }
            Some(other) => {
                return Err(PacsError::Protocol(format!("期望关联应答，收到 {}", other.short_description())));
            }
            None => return Err(PacsError::AssociationAborted(format!("{} 关闭了连接", request.endpoint))),
        };

        let peer_max_pdu_length = association::peer_max_pdu_length(&ac.user_variables);
        let mut channel = DimseChannel::new(link, peer_max_pdu_length, request.timeouts.dimse);
        let contexts = association::accepted_contexts(&rq.presentation_contexts, &ac.presentation_contexts);
        if contexts.is_empty() {
            if let Err(e) = channel.abort().await {
                warn!("中止与 {} 的关联失败: {}", request.endpoint, e);
            }
            return Err(PacsError::Negotiation(format!("{} 未接受任何表示上下文", request.endpoint)));
        }

        let id = uuid::Uuid::new_v4().to_string();
        info!(
            association = %id,
            "与 {} 建立关联, 接受 {}/{} 个上下文",
            request.endpoint,
            contexts.len(),
            rq.presentation_contexts.len()
        );

        Ok(Self {
            id,
            endpoint: request.endpoint,
            calling_ae_title: request.calling_ae_title,
            channel,
            contexts,
            store_handler: request.store_handler,
            release_timeout: request.timeouts.release,
            next_message_id: 1,
            released: false,
        })
    }

    fn message_id(&mut self) -> u16 {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1).max(1);
        id
    }

    fn context_for(&self, abstract_syntax: &str) -> Result<AcceptedContext> {
        self.contexts
            .iter()
            .find(|context| context.abstract_syntax == abstract_syntax)
            .cloned()
            .ok_or_else(|| PacsError::Negotiation(format!("{} 未接受抽象语法 {}", self.endpoint, abstract_syntax)))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.released {
            return Err(PacsError::AssociationAborted(format!("与 {} 的关联已释放", self.endpoint)));
        }
        Ok(())
    }

    /// 选择存储上下文：优先同一传输语法，其次可转码的未压缩传输语法
    fn store_context(&self, instance: &StoreInstance) -> Result<(AcceptedContext, Option<StoreInstance>)> {
        let candidates: Vec<&AcceptedContext> = self
            .contexts
            .iter()
            .filter(|context| context.abstract_syntax == instance.sop_class_uid)
            .collect();

        if let Some(context) = candidates
            .iter()
            .find(|context| context.transfer_syntax == instance.transfer_syntax)
        {
            return Ok(((*context).clone(), None));
        }

        if transfer_syntax::is_native_uncompressed(&instance.transfer_syntax) {
            if let Some(context) = candidates
                .iter()
                .find(|context| transfer_syntax::is_native_uncompressed(&context.transfer_syntax))
            {
                debug!(
                    "转码 {} 从 {} 到 {}",
                    instance.sop_instance_uid,
                    transfer_syntax::name_of(&instance.transfer_syntax),
                    transfer_syntax::name_of(&context.transfer_syntax)
                );
                let transcoded = instance.transcode(&context.transfer_syntax)?;
                return Ok(((*context).clone(), Some(transcoded)));
            }
        }

        Err(PacsError::Negotiation(format!(
            "{} 未接受 {} 在 {} 下的存储",
            self.endpoint,
            instance.sop_class_uid,
            transfer_syntax::name_of(&instance.transfer_syntax)
        )))
    }

    async fn receive_message(&mut self) -> Result<DimseMessage> {
        match self.channel.receive().await? {
            ChannelEvent::Message(message) => Ok(message),
            ChannelEvent::ReleaseRequested => {
                if let Err(e) = self.channel.send_pdu(Pdu::ReleaseRP).await {
                    warn!(association = %self.id, "回复 A-RELEASE-RP 失败: {}", e);
                }
                self.released = true;
                Err(PacsError::AssociationAborted(format!("{} 提前请求释放关联", self.endpoint)))
            }
            ChannelEvent::Aborted(source) => {
                self.released = true;
                Err(PacsError::AssociationAborted(format!("{} 中止关联: {:?}", self.endpoint, source)))
            }
            ChannelEvent::Closed => {
                self.released = true;
                Err(PacsError::AssociationAborted(format!("{} 关闭了连接", self.endpoint)))
            }
        }
    }

    async fn expect_response(&mut self, field: CommandField) -> Result<DimseMessage> {
        let message = self.receive_message().await?;
        if message.command.field != field {
            return Err(PacsError::Protocol(format!(
                "期望 0x{:04X}，收到 0x{:04X}",
                field.code(),
                message.command.field.code()
            )));
        }
        Ok(message)
    }

    /// 处理 C-GET 期间对端推送的 C-STORE 子操作
    async fn handle_nested_store(&mut self, message: DimseMessage) -> Result<()> {
        let context = self.contexts.iter().find(|context| context.id == message.context_id).cloned();
        let status = match (&self.store_handler, context, message.data) {
            (Some(handler), Some(context), Some(data)) => {
                let event = StoreEvent {
                    instance: StoreInstance {
                        sop_class_uid: message
                            .command
                            .affected_sop_class_uid
                            .clone()
                            .unwrap_or_else(|| context.abstract_syntax.clone()),
                        sop_instance_uid: message.command.affected_sop_instance_uid.clone().unwrap_or_default(),
                        transfer_syntax: context.transfer_syntax.clone(),
                        data,
                    },
                    context,
                    calling_ae_title: self.endpoint.ae_title.clone(),
                };
                handler.handle_store(event).await
            }
            (None, _, _) => {
                warn!("关联 {} 未配置存储处理器，拒绝子操作", self.id);
                DimseStatus::Failure(DimseStatus::SOP_CLASS_NOT_SUPPORTED)
            }
            (_, None, _) => {
                warn!("子操作使用了未协商的上下文 {}", message.context_id);
                DimseStatus::Failure(DimseStatus::SOP_CLASS_NOT_SUPPORTED)
            }
            (_, _, None) => DimseStatus::Failure(DimseStatus::PROCESSING_FAILURE),
        };

        let response = CommandSet::response_to(&message.command, status);
        self.channel.send_message(message.context_id, &response, None).await
    }
}

#[async_trait]
impl Association for ClientAssociation {
    fn id(&self) -> &str {
        &self.id
    }

    fn accepted_contexts(&self) -> &[AcceptedContext] {
        &self.contexts
    }

    async fn echo(&mut self) -> Result<DimseStatus> {
        self.ensure_open()?;
        let context = self.context_for(SopClass::VERIFICATION.uid)?;
        let message_id = self.message_id();
        let command = CommandSet::c_echo_rq(message_id, SopClass::VERIFICATION.uid);
        self.channel.send_message(context.id, &command, None).await?;

        let response = self.expect_response(CommandField::CEchoRsp).await?;
        Ok(response.command.dimse_status().unwrap_or(DimseStatus::Failure(DimseStatus::PROCESSING_FAILURE)))
    }

    async fn find(&mut self, query: &InMemDicomObject, model: &str) -> Result<Vec<FindResponse>> {
        self.ensure_open()?;
        let context = self.context_for(model)?;
        let message_id = self.message_id();
        let identifier = dimse::encode_dataset(query, &context.transfer_syntax)?;
        let command = CommandSet::c_find_rq(message_id, model);
        self.channel.send_message(context.id, &command, Some(&identifier)).await?;

        let mut responses = Vec::new();
        loop {
            let message = self.expect_response(CommandField::CFindRsp).await?;
            let status = message
                .command
                .dimse_status()
                .ok_or_else(|| PacsError::Protocol("C-FIND-RSP 缺少状态".to_string()))?;
            let identifier = match &message.data {
                Some(data) => Some(dimse::decode_dataset(data, &context.transfer_syntax)?),
                None => None,
            };
            responses.push(FindResponse { status, identifier });
            if !status.is_pending() {
                break;
            }
        }
        Ok(responses)
    }

    async fn get(&mut self, query: &InMemDicomObject, model: &str) -> Result<Vec<GetResponse>> {
        self.ensure_open()?;
        let context = self.context_for(model)?;
        let message_id = self.message_id();
        let identifier = dimse::encode_dataset(query, &context.transfer_syntax)?;
        let command = CommandSet::c_get_rq(message_id, model);
        self.channel.send_message(context.id, &command, Some(&identifier)).await?;

        let mut responses = Vec::new();
        loop {
            let message = self.receive_message().await?;
            match message.command.field {
                CommandField::CStoreRq => self.handle_nested_store(message).await?,
                CommandField::CGetRsp => {
                    let status = message
                        .command
                        .dimse_status()
                        .ok_or_else(|| PacsError::Protocol("C-GET-RSP 缺少状态".to_string()))?;
                    responses.push(GetResponse {
                        status,
                        sub_operations: message.command.sub_operations,
                    });
                    if !status.is_pending() {
                        break;
                    }
                }
                other => warn!("C-GET 期间忽略命令 0x{:04X}", other.code()),
            }
        }
        Ok(responses)
    }

    async fn store(&mut self, instance: &StoreInstance) -> Result<DimseStatus> {
        self.ensure_open()?;
        let (context, transcoded) = self.store_context(instance)?;
        let instance = transcoded.as_ref().unwrap_or(instance);
        let message_id = self.message_id();
        let command = CommandSet::c_store_rq(message_id, &instance.sop_class_uid, &instance.sop_instance_uid);
        self.channel.send_message(context.id, &command, Some(&instance.data)).await?;

        let response = self.expect_response(CommandField::CStoreRsp).await?;
        response
            .command
            .dimse_status()
            .ok_or_else(|| PacsError::Protocol("C-STORE-RSP 缺少状态".to_string()))
    }

    async fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        debug!(association = %self.id, "释放与 {} 的关联 ({})", self.endpoint, self.calling_ae_title);
        self.channel.release(self.release_timeout).await
    }
}
