//! DICOM关联管理
//!
//! PDU的编解码交给 `dicom_ul`。这里负责请求方的 A-ASSOCIATE-RQ 构造（含SCP/SCU角色选择子项）、
//! 应答结果到 `AcceptedContext` 的映射，以及在已建立关联上收发DIMSE消息的通道。

use crate::{
    dimse::{CommandSet, DimseMessage},
    services::{AcceptedContext, AssociationRequest},
};
use async_trait::async_trait;
use bytes::BytesMut;
use dicom_ul::{
    association::{read_pdu_from_wire_async, server::AsyncServerAssociation, Error as UlError},
    pdu::{
        AbortRQSource, AssociationRJ, AssociationRJServiceProviderASCEReason,
        AssociationRJServiceProviderPresentationReason, AssociationRJServiceUserReason, AssociationRJSource,
        AssociationRQ, PDataValue, PDataValueType, PresentationContextNegotiated, PresentationContextProposed,
        PresentationContextResult, PresentationContextResultReason, UserVariableItem, MINIMUM_PDU_SIZE,
    },
    Pdu, IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME,
};
use pacs_core::{PacsError, Result};
use std::{collections::VecDeque, time::Duration};
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tracing::{debug, warn};

pub const APPLICATION_CONTEXT_NAME: &str = "1.2.840.10008.3.1.1.1";

/// 本地默认可接收的最大PDU长度
pub const DEFAULT_MAX_PDU_LENGTH: u32 = 16384;

/// 一次关联最多可提议的表示上下文数量（ID为1..=255的奇数）
pub const MAX_PRESENTATION_CONTEXTS: usize = 128;

/// PDV项头部：长度(4) + 上下文ID(1) + 消息控制头(1)
const PDV_HEADER_LENGTH: usize = 6;

const SUB_ITEM_ROLE_SELECTION: u8 = 0x54;

/// SCP/SCU 角色选择子项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSelection {
    pub sop_class_uid: String,
    pub scu_role: bool,
    pub scp_role: bool,
}

impl RoleSelection {
    /// `dicom_ul` 没有角色选择的专用变体，按原始子项内容携带
    pub fn to_user_variable(&self) -> UserVariableItem {
        let uid = self.sop_class_uid.as_bytes();
        let mut data = Vec::with_capacity(uid.len() + 4);
        data.extend_from_slice(&(uid.len() as u16).to_be_bytes());
        data.extend_from_slice(uid);
        data.push(self.scu_role as u8);
        data.push(self.scp_role as u8);
        UserVariableItem::Unknown(SUB_ITEM_ROLE_SELECTION, data)
    }
}

/// 为请求方构造 A-ASSOCIATE-RQ，上下文ID依次为 1, 3, 5 ...
pub fn build_associate_rq(request: &AssociationRequest) -> Result<AssociationRQ> {
    if request.contexts.is_empty() {
        return Err(PacsError::Negotiation("未提供任何表示上下文".to_string()));
    }
    if request.contexts.len() > MAX_PRESENTATION_CONTEXTS {
        return Err(PacsError::Negotiation(format!(
            "表示上下文数量 {} 超过上限 {}",
            request.contexts.len(),
            MAX_PRESENTATION_CONTEXTS
        )));
    }

    let presentation_contexts = request
        .contexts
        .iter()
        .enumerate()
        .map(|(index, context)| PresentationContextProposed {
            id: (2 * index + 1) as u8,
            abstract_syntax: context.abstract_syntax.clone(),
            transfer_syntaxes: context.transfer_syntaxes.clone(),
        })
        .collect();

    let mut user_variables = vec![
        UserVariableItem::MaxLength(request.max_pdu_length),
        UserVariableItem::ImplementationClassUID(IMPLEMENTATION_CLASS_UID.to_string()),
    ];
    user_variables.extend(request.role_selections.iter().map(RoleSelection::to_user_variable));
    user_variables.push(UserVariableItem::ImplementationVersionName(
        IMPLEMENTATION_VERSION_NAME.to_string(),
    ));

    Ok(AssociationRQ {
        protocol_version: 1,
        calling_ae_title: request.calling_ae_title.clone(),
        called_ae_title: request.endpoint.ae_title.clone(),
        application_context_name: APPLICATION_CONTEXT_NAME.to_string(),
        presentation_contexts,
        user_variables,
    })
}

/// 按ID把接受方的答复与请求的上下文对应起来，只保留被接受的
pub fn accepted_contexts(
    proposed: &[PresentationContextProposed],
    results: &[PresentationContextResult],
) -> Vec<AcceptedContext> {
    results
        .iter()
        .filter(|result| result.reason == PresentationContextResultReason::Acceptance)
        .filter_map(|result| {
            proposed
                .iter()
                .find(|context| context.id == result.id)
                .map(|context| AcceptedContext {
                    id: result.id,
                    abstract_syntax: context.abstract_syntax.clone(),
                    transfer_syntax: result.transfer_syntax.clone(),
                })
        })
        .collect()
}

/// 接受方视角下已协商的上下文
pub fn negotiated_contexts(negotiated: &[PresentationContextNegotiated]) -> Vec<AcceptedContext> {
    negotiated
        .iter()
        .filter(|context| context.reason == PresentationContextResultReason::Acceptance)
        .map(|context| AcceptedContext {
            id: context.id,
            abstract_syntax: context.abstract_syntax.clone(),
            transfer_syntax: context.transfer_syntax.clone(),
        })
        .collect()
}

/// 对端在用户信息中声明的最大PDU长度，0表示不限
pub fn peer_max_pdu_length(user_variables: &[UserVariableItem]) -> u32 {
    match user_variables.iter().find_map(|item| match item {
        UserVariableItem::MaxLength(length) => Some(*length),
        _ => None,
    }) {
        Some(0) => u32::MAX,
        Some(length) => length,
        None => DEFAULT_MAX_PDU_LENGTH,
    }
}

/// 把 A-ASSOCIATE-RJ 还原为标准的 result/source/reason 编码
pub fn rejection(rj: &AssociationRJ) -> PacsError {
    let (source_code, reason) = match &rj.source {
        AssociationRJSource::ServiceUser(reason) => (
            1,
            match reason {
                AssociationRJServiceUserReason::NoReasonGiven => 1,
                AssociationRJServiceUserReason::ApplicationContextNameNotSupported => 2,
                AssociationRJServiceUserReason::CallingAETitleNotRecognized => 3,
                AssociationRJServiceUserReason::CalledAETitleNotRecognized => 7,
                AssociationRJServiceUserReason::Reserved(code) => *code,
            },
        ),
        AssociationRJSource::ServiceProviderASCE(reason) => (
            2,
            match reason {
                AssociationRJServiceProviderASCEReason::NoReasonGiven => 1,
                AssociationRJServiceProviderASCEReason::ProtocolVersionNotSupported => 2,
            },
        ),
        AssociationRJSource::ServiceProviderPresentation(reason) => (
            3,
            match reason {
                AssociationRJServiceProviderPresentationReason::TemporaryCongestion => 1,
                AssociationRJServiceProviderPresentationReason::LocalLimitExceeded => 2,
                AssociationRJServiceProviderPresentationReason::Reserved(code) => *code,
            },
        ),
    };
    PacsError::AssociationRejected {
        result: rj.result.clone() as u8,
        source_code,
        reason,
    }
}

/// `dicom_ul` 关联错误到统一错误类型
pub fn ul_error(error: UlError) -> PacsError {
    match error {
        UlError::Rejected { association_rj, .. } => rejection(&association_rj),
        UlError::Aborted { .. } => PacsError::AssociationAborted("对端中止了关联".to_string()),
        UlError::ConnectionClosed => PacsError::AssociationAborted("连接已关闭".to_string()),
        UlError::NoAcceptedPresentationContexts { .. } => {
            PacsError::Negotiation("未接受任何表示上下文".to_string())
        }
        timeout @ UlError::Timeout { .. } => PacsError::Timeout(timeout.to_string()),
        other => PacsError::Protocol(other.to_string()),
    }
}

/// PDU级的收发端
#[async_trait]
pub trait PduTransport: Send {
    async fn send(&mut self, pdu: &Pdu) -> Result<()>;

    /// 连接关闭时返回 `None`
    async fn receive(&mut self) -> Result<Option<Pdu>>;
}

/// 请求方的TCP连接，读写都走 `dicom_ul` 的PDU编解码
pub struct PduStream {
    socket: TcpStream,
    read_buffer: BytesMut,
    write_buffer: Vec<u8>,
    max_pdu_length: u32,
}

impl PduStream {
    pub fn new(socket: TcpStream, max_pdu_length: u32) -> Self {
        let max_pdu_length = max_pdu_length.max(MINIMUM_PDU_SIZE);
        Self {
            socket,
            read_buffer: BytesMut::with_capacity(max_pdu_length as usize),
            write_buffer: Vec::with_capacity(max_pdu_length as usize),
            max_pdu_length,
        }
    }
}

#[async_trait]
impl PduTransport for PduStream {
    async fn send(&mut self, pdu: &Pdu) -> Result<()> {
        self.write_buffer.clear();
        dicom_ul::write_pdu(&mut self.write_buffer, pdu)
            .map_err(|e| PacsError::Protocol(format!("PDU编码失败: {}", e)))?;
        self.socket.write_all(&self.write_buffer).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Pdu>> {
        match read_pdu_from_wire_async(&mut self.socket, &mut self.read_buffer, self.max_pdu_length, false).await {
            Ok(pdu) => Ok(Some(pdu)),
            Err(UlError::ConnectionClosed) => Ok(None),
            Err(e) => Err(ul_error(e)),
        }
    }
}

#[async_trait]
impl PduTransport for AsyncServerAssociation<TcpStream> {
    async fn send(&mut self, pdu: &Pdu) -> Result<()> {
        AsyncServerAssociation::send(self, pdu).await.map_err(ul_error)
    }

    async fn receive(&mut self) -> Result<Option<Pdu>> {
        match AsyncServerAssociation::receive(self).await {
            Ok(pdu) => Ok(Some(pdu)),
            Err(UlError::ConnectionClosed) => Ok(None),
            Err(e) => Err(ul_error(e)),
        }
    }
}

/// 通道上接收到的事件
#[derive(Debug)]
pub enum ChannelEvent {
    Message(DimseMessage),
    ReleaseRequested,
    Aborted(AbortRQSource),
    Closed,
}

/// 在已建立关联上收发DIMSE消息
pub struct DimseChannel<T> {
    transport: T,
    pending: VecDeque<PDataValue>,
    peer_max_pdu_length: u32,
    timeout: Duration,
}

impl<T: PduTransport> DimseChannel<T> {
    pub fn new(transport: T, peer_max_pdu_length: u32, timeout: Duration) -> Self {
        Self {
            transport,
            pending: VecDeque::new(),
            peer_max_pdu_length,
            timeout,
        }
    }

    pub async fn send_pdu(&mut self, pdu: Pdu) -> Result<()> {
        debug!("发送 {}", pdu.short_description());
        self.transport.send(&pdu).await
    }

    /// 接收下一个PDU；连接关闭时返回 `None`
    pub async fn next_pdu(&mut self) -> Result<Option<Pdu>> {
        tokio::time::timeout(self.timeout, self.transport.receive())
            .await
            .map_err(|_| PacsError::Timeout(format!("等待PDU超过 {:?}", self.timeout)))?
    }

    fn fragment_length(&self) -> usize {
        let max = if self.peer_max_pdu_length == 0 {
            DEFAULT_MAX_PDU_LENGTH
        } else {
            self.peer_max_pdu_length
        } as usize;
        max.saturating_sub(PDV_HEADER_LENGTH).max(1)
    }

    async fn send_fragments(&mut self, context_id: u8, value_type: PDataValueType, bytes: &[u8]) -> Result<()> {
        let fragment_length = self.fragment_length();
        let mut chunks = bytes.chunks(fragment_length).peekable();
        if chunks.peek().is_none() {
            return self
                .send_pdu(Pdu::PData {
                    data: vec![PDataValue {
                        presentation_context_id: context_id,
                        value_type,
                        is_last: true,
                        data: Vec::new(),
                    }],
                })
                .await;
        }
        while let Some(chunk) = chunks.next() {
            let is_last = chunks.peek().is_none();
            self.send_pdu(Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id: context_id,
                    value_type: value_type.clone(),
                    is_last,
                    data: chunk.to_vec(),
                }],
            })
            .await?;
        }
        Ok(())
    }

    /// 发送命令集及可选的数据集，按对端最大PDU长度分片
    pub async fn send_message(&mut self, context_id: u8, command: &CommandSet, data: Option<&[u8]>) -> Result<()> {
        let command_bytes = command.encode()?;
        self.send_fragments(context_id, PDataValueType::Command, &command_bytes).await?;
        if let Some(data) = data {
            self.send_fragments(context_id, PDataValueType::Data, data).await?;
        }
        Ok(())
    }

    async fn next_pdv(&mut self) -> Result<std::result::Result<PDataValue, ChannelEvent>> {
        loop {
            if let Some(pdv) = self.pending.pop_front() {
                return Ok(Ok(pdv));
            }
            match self.next_pdu().await? {
                Some(Pdu::PData { data }) => self.pending.extend(data),
                Some(Pdu::ReleaseRQ) => return Ok(Err(ChannelEvent::ReleaseRequested)),
                Some(Pdu::AbortRQ { source }) => return Ok(Err(ChannelEvent::Aborted(source))),
                Some(other) => {
                    return Err(PacsError::Protocol(format!("关联中收到意外的 {}", other.short_description())));
                }
                None => return Ok(Err(ChannelEvent::Closed)),
            }
        }
    }

    /// 接收一条完整的DIMSE消息（命令集加可选数据集）
    pub async fn receive(&mut self) -> Result<ChannelEvent> {
        let mut command_bytes = Vec::new();
        let context_id = loop {
            let pdv = match self.next_pdv().await? {
                Ok(pdv) => pdv,
                Err(event) => return Ok(event),
            };
            if pdv.value_type != PDataValueType::Command {
                return Err(PacsError::Protocol("期望命令片段，收到数据片段".to_string()));
            }
            command_bytes.extend_from_slice(&pdv.data);
            if pdv.is_last {
                break pdv.presentation_context_id;
            }
        };

        let command = CommandSet::decode(&command_bytes)?;
        let data = if command.has_data_set {
            let mut data = Vec::new();
            loop {
                let pdv = match self.next_pdv().await? {
                    Ok(pdv) => pdv,
                    Err(event) => return Ok(event),
                };
                if pdv.value_type != PDataValueType::Data {
                    return Err(PacsError::Protocol("期望数据片段，收到命令片段".to_string()));
                }
                data.extend_from_slice(&pdv.data);
                if pdv.is_last {
                    break;
                }
            }
            Some(data)
        } else {
            None
        };

        Ok(ChannelEvent::Message(DimseMessage {
            context_id,
            command,
            data,
        }))
    }

    /// 请求释放关联并等待 A-RELEASE-RP
    pub async fn release(&mut self, timeout: Duration) -> Result<()> {
        self.send_pdu(Pdu::ReleaseRQ).await?;
        let wait = async {
            loop {
                match self.transport.receive().await? {
                    Some(Pdu::ReleaseRP) => return Ok(()),
                    Some(Pdu::AbortRQ { source }) => {
                        return Err(PacsError::AssociationAborted(format!("释放过程中被中止: {:?}", source)));
                    }
                    Some(other) => warn!("释放过程中忽略 {}", other.short_description()),
                    None => return Ok(()),
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| PacsError::Timeout(format!("等待 A-RELEASE-RP 超过 {:?}", timeout)))?
    }

    pub async fn abort(&mut self) -> Result<()> {
        self.send_pdu(Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{services::ContextRequest, transfer_syntax::transfer_syntax_uids::*};
    use dicom_ul::pdu::{AssociationRJResult, PDU_HEADER_SIZE};
    use pacs_core::{Endpoint, EndpointRole};

    fn request_with(contexts: Vec<ContextRequest>) -> AssociationRequest {
        AssociationRequest::new(
            Endpoint::new("DCM4CHEE", "127.0.0.1", 11112, EndpointRole::Source),
            "RADIANT",
            contexts,
        )
    }

    #[test]
    fn test_context_ids_are_odd_and_ordered() {
        let rq = build_associate_rq(&request_with(vec![
            ContextRequest::new("1.2.840.10008.5.1.4.1.1.1", &[IMPLICIT_VR_LITTLE_ENDIAN]),
            ContextRequest::new("1.2.840.10008.5.1.4.1.1.2", &[IMPLICIT_VR_LITTLE_ENDIAN]),
            ContextRequest::new("1.2.840.10008.5.1.4.1.1.4", &[IMPLICIT_VR_LITTLE_ENDIAN]),
        ]))
        .unwrap();
        let ids: Vec<u8> = rq.presentation_contexts.iter().map(|pc| pc.id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
        assert_eq!(rq.called_ae_title, "DCM4CHEE");
        assert_eq!(rq.calling_ae_title, "RADIANT");
    }

    #[test]
    fn test_too_many_contexts_rejected_locally() {
        let contexts = (0..=MAX_PRESENTATION_CONTEXTS)
            .map(|i| ContextRequest::new(&format!("1.2.3.{}", i), &[IMPLICIT_VR_LITTLE_ENDIAN]))
            .collect();
        assert!(matches!(
            build_associate_rq(&request_with(contexts)),
            Err(PacsError::Negotiation(_))
        ));
    }

    #[test]
    fn test_role_selection_survives_pdu_encoding() {
        let rq = build_associate_rq(
            &request_with(vec![ContextRequest::new("1.2.840.10008.5.1.4.1.1.2", &[IMPLICIT_VR_LITTLE_ENDIAN])])
                .with_role_selections(vec![RoleSelection {
                    sop_class_uid: "1.2.840.10008.5.1.4.1.1.2".to_string(),
                    scu_role: false,
                    scp_role: true,
                }]),
        )
        .unwrap();

        let mut bytes = Vec::new();
        dicom_ul::write_pdu(&mut bytes, &Pdu::AssociationRQ(rq)).unwrap();
        let decoded = dicom_ul::read_pdu(&bytes[..], DEFAULT_MAX_PDU_LENGTH, true).unwrap();

        let Some(Pdu::AssociationRQ(decoded)) = decoded else {
            panic!("expected A-ASSOCIATE-RQ, got {:?}", decoded);
        };
        let role = decoded.user_variables.iter().find_map(|item| match item {
            UserVariableItem::Unknown(SUB_ITEM_ROLE_SELECTION, data) => Some(data.clone()),
            _ => None,
        });
        let mut expected = vec![0x00, 25];
        expected.extend_from_slice(b"1.2.840.10008.5.1.4.1.1.2");
        expected.extend_from_slice(&[0, 1]);
        assert_eq!(role, Some(expected));
        assert!(decoded.user_variables.contains(&UserVariableItem::MaxLength(DEFAULT_MAX_PDU_LENGTH)));
        assert!(bytes.len() > PDU_HEADER_SIZE as usize);
    }

    #[test]
    fn test_accepted_contexts_keeps_only_acceptances() {
        let proposed = vec![
            PresentationContextProposed {
                id: 1,
                abstract_syntax: "1.2.840.10008.1.1".to_string(),
                transfer_syntaxes: vec![IMPLICIT_VR_LITTLE_ENDIAN.to_string()],
            },
            PresentationContextProposed {
                id: 3,
                abstract_syntax: "1.2.840.10008.5.1.4.1.1.2".to_string(),
                transfer_syntaxes: vec![JPEG_BASELINE.to_string()],
            },
        ];
        let results = vec![
            PresentationContextResult {
                id: 1,
                reason: PresentationContextResultReason::Acceptance,
                transfer_syntax: IMPLICIT_VR_LITTLE_ENDIAN.to_string(),
            },
            PresentationContextResult {
                id: 3,
                reason: PresentationContextResultReason::TransferSyntaxesNotSupported,
                transfer_syntax: IMPLICIT_VR_LITTLE_ENDIAN.to_string(),
            },
        ];

        let accepted = accepted_contexts(&proposed, &results);
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].abstract_syntax, "1.2.840.10008.1.1");
    }

    #[test]
    fn test_peer_max_pdu_length() {
        assert_eq!(peer_max_pdu_length(&[UserVariableItem::MaxLength(32768)]), 32768);
        assert_eq!(peer_max_pdu_length(&[UserVariableItem::MaxLength(0)]), u32::MAX);
        assert_eq!(peer_max_pdu_length(&[]), DEFAULT_MAX_PDU_LENGTH);
    }

    #[test]
    fn test_rejection_codes() {
        let error = rejection(&AssociationRJ {
            result: AssociationRJResult::Permanent,
            source: AssociationRJSource::ServiceUser(AssociationRJServiceUserReason::CalledAETitleNotRecognized),
        });
        assert!(matches!(
            error,
            PacsError::AssociationRejected {
                result: 1,
                source_code: 1,
                reason: 7
            }
        ));
    }
}
