//! 研究目录：对某个端点按检查日期执行研究级 C-FIND

use crate::profile::AssociationProfile;
use dicom::object::InMemDicomObject;
use dicom_core::{dicom_value, DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use pacs_core::{sop_class::SopClass, Endpoint, Result, StudyRecord};
use pacs_dicom::{dimse, transfer_syntax::DEFAULT_TRANSFER_SYNTAXES, ContextRequest, DicomNetwork};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct StudyCatalog {
    network: Arc<dyn DicomNetwork>,
    profile: AssociationProfile,
}

impl StudyCatalog {
    pub fn new(network: Arc<dyn DicomNetwork>, profile: AssociationProfile) -> Self {
        Self { network, profile }
    }

    /// 查询 `study_date` 当天的研究。失败时记录错误并返回空列表。
    pub async fn find_studies(&self, endpoint: &Endpoint, study_date: &str) -> Vec<StudyRecord> {
        match self.query(endpoint, study_date).await {
            Ok(studies) => {
                info!("{} 在 {} 有 {} 个研究", endpoint, study_date, studies.len());
                studies
            }
            Err(e) => {
                error!("查询 {} 失败: {}", endpoint, e);
                Vec::new()
            }
        }
    }

    async fn query(&self, endpoint: &Endpoint, study_date: &str) -> Result<Vec<StudyRecord>> {
        let model = SopClass::STUDY_ROOT_FIND.uid;
        let contexts = vec![ContextRequest::new(model, DEFAULT_TRANSFER_SYNTAXES)];
        let mut association = self.network.associate(self.profile.request(endpoint, contexts)).await?;

        let result = association.find(&study_query(study_date), model).await;
        if let Err(e) = association.release().await {
            warn!("释放查询关联失败: {}", e);
        }

        let mut studies = Vec::new();
        for response in result? {
            if response.status.is_pending() {
                match response.identifier.as_ref().and_then(record_from) {
                    Some(record) => {
                        debug!("找到研究 {}", record.summary());
                        studies.push(record);
                    }
                    None => warn!("{} 返回的结果缺少 StudyInstanceUID", endpoint),
                }
            } else if !response.status.is_success() {
                warn!("{} 的 C-FIND 以 {} 结束", endpoint, response.status);
            }
        }
        Ok(studies)
    }
}

/// 研究级查询：按检查日期匹配，其余属性留空由对端返回
pub fn study_query(study_date: &str) -> InMemDicomObject {
    let mut query = InMemDicomObject::new_empty();
    query.put(DataElement::new(tags::QUERY_RETRIEVE_LEVEL, VR::CS, dicom_value!(Str, "STUDY")));
    query.put(DataElement::new(tags::STUDY_DATE, VR::DA, dicom_value!(Str, study_date)));
    for (tag, vr) in [
        (tags::STUDY_INSTANCE_UID, VR::UI),
        (tags::PATIENT_NAME, VR::PN),
        (tags::PATIENT_ID, VR::LO),
        (tags::ACCESSION_NUMBER, VR::SH),
        (tags::STUDY_DESCRIPTION, VR::LO),
    ] {
        query.put(DataElement::new(tag, vr, PrimitiveValue::Empty));
    }
    query
}

fn record_from(identifier: &InMemDicomObject) -> Option<StudyRecord> {
    let mut record = StudyRecord::new(dimse::element_str(identifier, tags::STUDY_INSTANCE_UID)?);
    record.patient_name = dimse::element_str(identifier, tags::PATIENT_NAME);
    record.patient_id = dimse::element_str(identifier, tags::PATIENT_ID);
    record.accession_number = dimse::element_str(identifier, tags::ACCESSION_NUMBER);
    record.description = dimse::element_str(identifier, tags::STUDY_DESCRIPTION);
    Some(record)
}
