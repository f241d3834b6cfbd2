//! 测试用的模拟DICOM网络：按AE标题脚本化的对端，并记录所有调用

use async_trait::async_trait;
use dicom::object::InMemDicomObject;
use dicom_core::{dicom_value, DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use pacs_core::{sop_class::SopClass, PacsError, Result, StudyRecord};
use pacs_dicom::{
    dimse, transfer_syntax::transfer_syntax_uids::IMPLICIT_VR_LITTLE_ENDIAN, AcceptedContext, Association,
    AssociationRequest, DicomNetwork, DimseStatus, FindResponse, GetResponse, ListenerConfig, ListenerHandle,
    StoreEvent, StoreHandler, StoreInstance, SubOperationCounts,
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Associate {
        ae_title: String,
        contexts: usize,
        roles: usize,
        with_handler: bool,
    },
    Find { ae_title: String },
    Get { ae_title: String, study_uid: String },
    Store { ae_title: String, sop_instance_uid: String },
    Release { ae_title: String },
    ListenerStart { port: u16, contexts: usize },
    ListenerShutdown,
}

/// 某个研究的 C-GET 脚本
#[derive(Debug, Clone)]
pub struct GetScript {
    pub deliveries: Vec<StoreInstance>,
    pub final_status: DimseStatus,
    /// 在最终响应之后才投递影像
    pub deliver_late: Option<Duration>,
    pub report_counts: bool,
}

impl GetScript {
    pub fn success(deliveries: Vec<StoreInstance>) -> Self {
        Self {
            deliveries,
            final_status: DimseStatus::Success,
            deliver_late: None,
            report_counts: true,
        }
    }

    pub fn failure(code: u16) -> Self {
        Self {
            deliveries: Vec::new(),
            final_status: DimseStatus::Failure(code),
            deliver_late: None,
            report_counts: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockPeer {
    pub studies: Vec<StudyRecord>,
    pub find_fails: bool,
    pub unreachable: bool,
    pub rejected_syntaxes: Vec<String>,
    pub gets: HashMap<String, GetScript>,
    pub store_status: Option<DimseStatus>,
    /// C-GET 处理过程中直接 panic
    pub get_panics: bool,
}

impl MockPeer {
    pub fn with_studies(uids: &[&str]) -> Self {
        Self {
            studies: uids.iter().map(|uid| study(uid)).collect(),
            ..Self::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn with_get(mut self, study_uid: &str, script: GetScript) -> Self {
        self.gets.insert(study_uid.to_string(), script);
        self
    }
}

#[derive(Default)]
struct MockState {
    peers: Mutex<HashMap<String, MockPeer>>,
    calls: Mutex<Vec<Call>>,
    proposed: Mutex<Vec<(String, Vec<String>)>>,
    stored: Mutex<Vec<StoreInstance>>,
    listener_fails: Mutex<bool>,
}

impl MockState {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn peer(&self, ae_title: &str) -> Option<MockPeer> {
        self.peers.lock().unwrap().get(ae_title).cloned()
    }
}

#[derive(Clone, Default)]
pub struct MockNetwork {
    state: Arc<MockState>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_peer(self, ae_title: &str, peer: MockPeer) -> Self {
        self.state.peers.lock().unwrap().insert(ae_title.to_string(), peer);
        self
    }

    pub fn failing_listener(self) -> Self {
        *self.state.listener_fails.lock().unwrap() = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().unwrap().clone()
    }

    /// 按顺序列出 C-GET 请求的研究UID
    pub fn retrieved_studies(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Get { study_uid, .. } => Some(study_uid),
                _ => None,
            })
            .collect()
    }

    pub fn listener_starts(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::ListenerStart { .. }))
            .count()
    }

    pub fn listener_shutdowns(&self) -> usize {
        self.calls().iter().filter(|call| **call == Call::ListenerShutdown).count()
    }

    /// 向某个AE提议过的抽象语法，按关联顺序展开
    pub fn proposed_syntaxes(&self, ae_title: &str) -> Vec<String> {
        self.state
            .proposed
            .lock()
            .unwrap()
            .iter()
            .filter(|(title, _)| title == ae_title)
            .flat_map(|(_, syntaxes)| syntaxes.clone())
            .collect()
    }

    pub fn stored(&self) -> Vec<StoreInstance> {
        self.state.stored.lock().unwrap().clone()
    }
}

#[async_trait]
impl DicomNetwork for MockNetwork {
    async fn associate(&self, request: AssociationRequest) -> Result<Box<dyn Association>> {
        let ae_title = request.endpoint.ae_title.clone();
        self.state.record(Call::Associate {
            ae_title: ae_title.clone(),
            contexts: request.contexts.len(),
            roles: request.role_selections.len(),
            with_handler: request.store_handler.is_some(),
        });
        self.state.proposed.lock().unwrap().push((
            ae_title.clone(),
            request.contexts.iter().map(|context| context.abstract_syntax.clone()).collect(),
        ));

        let peer = match self.state.peer(&ae_title) {
            Some(peer) if !peer.unreachable => peer,
            _ => {
                return Err(PacsError::Network(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    format!("{} 不可达", request.endpoint),
                )));
            }
        };

        let contexts: Vec<AcceptedContext> = request
            .contexts
            .iter()
            .enumerate()
            .filter(|(_, context)| !peer.rejected_syntaxes.contains(&context.abstract_syntax))
            .map(|(index, context)| AcceptedContext {
                id: (2 * index + 1) as u8,
                abstract_syntax: context.abstract_syntax.clone(),
                transfer_syntax: context.transfer_syntaxes[0].clone(),
            })
            .collect();
        if contexts.is_empty() {
            return Err(PacsError::Negotiation(format!("{} 未接受任何表示上下文", ae_title)));
        }

        Ok(Box::new(MockAssociation {
            ae_title,
            state: self.state.clone(),
            contexts,
            handler: request.store_handler,
            released: false,
        }))
    }

    async fn start_listener(
        &self,
        config: ListenerConfig,
        _handler: Arc<dyn StoreHandler>,
    ) -> Result<Box<dyn ListenerHandle>> {
        self.state.record(Call::ListenerStart {
            port: config.port,
            contexts: config.contexts.len(),
        });
        if *self.state.listener_fails.lock().unwrap() {
            return Err(PacsError::Listener("地址已被占用".to_string()));
        }
        Ok(Box::new(MockListener {
            state: self.state.clone(),
            addr: SocketAddr::from(([127, 0, 0, 1], config.port)),
            stopped: false,
        }))
    }
}

struct MockListener {
    state: Arc<MockState>,
    addr: SocketAddr,
    stopped: bool,
}

#[async_trait]
impl ListenerHandle for MockListener {
    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn shutdown(&mut self) -> Result<()> {
        if !self.stopped {
            self.stopped = true;
            self.state.record(Call::ListenerShutdown);
        }
        Ok(())
    }
}

struct MockAssociation {
    ae_title: String,
    state: Arc<MockState>,
    contexts: Vec<AcceptedContext>,
    handler: Option<Arc<dyn StoreHandler>>,
    released: bool,
}

async fn deliver(
    handler: &Option<Arc<dyn StoreHandler>>,
    contexts: &[AcceptedContext],
    ae_title: &str,
    instance: StoreInstance,
) -> DimseStatus {
    let Some(handler) = handler else {
        return DimseStatus::Failure(DimseStatus::SOP_CLASS_NOT_SUPPORTED);
    };
    let context = contexts
        .iter()
        .find(|context| context.abstract_syntax == instance.sop_class_uid)
        .cloned()
        .unwrap_or(AcceptedContext {
            id: 1,
            abstract_syntax: instance.sop_class_uid.clone(),
            transfer_syntax: instance.transfer_syntax.clone(),
        });
    handler
        .handle_store(StoreEvent {
            instance,
            context,
            calling_ae_title: ae_title.to_string(),
        })
        .await
}

#[async_trait]
impl Association for MockAssociation {
    fn id(&self) -> &str {
        &self.ae_title
    }

    fn accepted_contexts(&self) -> &[AcceptedContext] {
        &self.contexts
    }

    async fn echo(&mut self) -> Result<DimseStatus> {
        Ok(DimseStatus::Success)
    }

    async fn find(&mut self, _query: &InMemDicomObject, _model: &str) -> Result<Vec<FindResponse>> {
        self.state.record(Call::Find {
            ae_title: self.ae_title.clone(),
        });
        let peer = self.state.peer(&self.ae_title).unwrap_or_default();
        if peer.find_fails {
            return Err(PacsError::AssociationAborted("查询期间连接中断".to_string()));
        }

        let mut responses: Vec<FindResponse> = peer
            .studies
            .iter()
            .map(|record| FindResponse {
                status: DimseStatus::Pending(DimseStatus::PENDING),
                identifier: Some(identifier_of(record)),
            })
            .collect();
        responses.push(FindResponse {
            status: DimseStatus::Success,
            identifier: None,
        });
        Ok(responses)
    }

    async fn get(&mut self, query: &InMemDicomObject, _model: &str) -> Result<Vec<GetResponse>> {
        let study_uid = dimse::element_str(query, tags::STUDY_INSTANCE_UID).unwrap_or_default();
        self.state.record(Call::Get {
            ae_title: self.ae_title.clone(),
            study_uid: study_uid.clone(),
        });
        let peer = self.state.peer(&self.ae_title).unwrap_or_default();
        if peer.get_panics {
            panic!("C-GET 处理崩溃: {}", study_uid);
        }
        let script = peer
            .gets
            .get(&study_uid)
            .cloned()
            .unwrap_or_else(|| GetScript::success(Vec::new()));
        let total = script.deliveries.len() as u16;

        let mut responses = Vec::new();
        match script.deliver_late {
            None => {
                for (index, instance) in script.deliveries.into_iter().enumerate() {
                    deliver(&self.handler, &self.contexts, &self.ae_title, instance).await;
                    responses.push(GetResponse {
                        status: DimseStatus::Pending(DimseStatus::PENDING),
                        sub_operations: SubOperationCounts {
                            remaining: Some(total - index as u16 - 1),
                            completed: Some(index as u16 + 1),
                            failed: Some(0),
                            warning: Some(0),
                        },
                    });
                }
            }
            Some(delay) => {
                let handler = self.handler.clone();
                let contexts = self.contexts.clone();
                let ae_title = self.ae_title.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    for instance in script.deliveries {
                        deliver(&handler, &contexts, &ae_title, instance).await;
                    }
                });
            }
        }

        let sub_operations = if script.report_counts {
            SubOperationCounts {
                remaining: Some(0),
                completed: Some(total),
                failed: Some(0),
                warning: Some(0),
            }
        } else {
            SubOperationCounts::default()
        };
        responses.push(GetResponse {
            status: script.final_status,
            sub_operations,
        });
        Ok(responses)
    }

    async fn store(&mut self, instance: &StoreInstance) -> Result<DimseStatus> {
        self.state.record(Call::Store {
            ae_title: self.ae_title.clone(),
            sop_instance_uid: instance.sop_instance_uid.clone(),
        });
        self.state.stored.lock().unwrap().push(instance.clone());
        let peer = self.state.peer(&self.ae_title).unwrap_or_default();
        Ok(peer.store_status.unwrap_or(DimseStatus::Success))
    }

    async fn release(&mut self) -> Result<()> {
        if !self.released {
            self.released = true;
            self.state.record(Call::Release {
                ae_title: self.ae_title.clone(),
            });
        }
        Ok(())
    }
}

fn identifier_of(record: &StudyRecord) -> InMemDicomObject {
    let mut object = InMemDicomObject::new_empty();
    object.put(DataElement::new(
        tags::STUDY_INSTANCE_UID,
        VR::UI,
        dicom_value!(Str, record.study_uid.as_str()),
    ));
    let optional = [
        (tags::PATIENT_NAME, VR::PN, &record.patient_name),
        (tags::PATIENT_ID, VR::LO, &record.patient_id),
        (tags::ACCESSION_NUMBER, VR::SH, &record.accession_number),
        (tags::STUDY_DESCRIPTION, VR::LO, &record.description),
    ];
    for (tag, vr, value) in optional {
        if let Some(value) = value {
            object.put(DataElement::new(tag, vr, dicom_value!(Str, value.as_str())));
        }
    }
    object
}

pub fn study(uid: &str) -> StudyRecord {
    let mut record = StudyRecord::new(uid);
    record.patient_name = Some(format!("PATIENT^{}", uid));
    record.patient_id = Some(format!("PID-{}", uid));
    record
}

/// 隐式VR Little Endian编码的CT实例
pub fn ct_instance(sop_instance_uid: &str) -> StoreInstance {
    let mut object = InMemDicomObject::new_empty();
    object.put(DataElement::new(tags::SOP_CLASS_UID, VR::UI, dicom_value!(Str, SopClass::CT_IMAGE.uid)));
    object.put(DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, dicom_value!(Str, sop_instance_uid)));
    object.put(DataElement::new(tags::PIXEL_DATA, VR::OB, PrimitiveValue::U8(vec![1u8; 64].into())));
    StoreInstance {
        sop_class_uid: SopClass::CT_IMAGE.uid.to_string(),
        sop_instance_uid: sop_instance_uid.to_string(),
        transfer_syntax: IMPLICIT_VR_LITTLE_ENDIAN.to_string(),
        data: dimse::encode_dataset(&object, IMPLICIT_VR_LITTLE_ENDIAN).expect("encode test instance"),
    }
}
