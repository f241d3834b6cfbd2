//! DIMSE消息处理
//!
//! 命令集总是以隐式VR Little Endian编码；数据集按协商得到的传输语法编码。

use crate::transfer_syntax;
use dicom::object::InMemDicomObject;
use dicom_core::{dicom_value, DataElement, VR};
use dicom_dictionary_std::tags;
use dicom_encoding::transfer_syntax::TransferSyntax;
use dicom_transfer_syntax_registry::entries;
use pacs_core::{utils::trim_dicom_value, PacsError, Result};
use std::fmt;

/// 命令数据集类型：无数据集
const NO_DATA_SET: u16 = 0x0101;
/// 命令数据集类型：有数据集（除0x0101外任意值）
const DATA_SET_PRESENT: u16 = 0x0000;
const PRIORITY_MEDIUM: u16 = 0x0000;

/// DICOM命令字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandField {
    CStoreRq,
    CStoreRsp,
    CGetRq,
    CGetRsp,
    CFindRq,
    CFindRsp,
    CEchoRq,
    CEchoRsp,
    CCancelRq,
    Unknown(u16),
}

impl CommandField {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0001 => CommandField::CStoreRq,
            0x8001 => CommandField::CStoreRsp,
            0x0010 => CommandField::CGetRq,
            0x8010 => CommandField::CGetRsp,
            0x0020 => CommandField::CFindRq,
            0x8020 => CommandField::CFindRsp,
            0x0030 => CommandField::CEchoRq,
            0x8030 => CommandField::CEchoRsp,
            0x0FFF => CommandField::CCancelRq,
            other => CommandField::Unknown(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            CommandField::CStoreRq => 0x0001,
            CommandField::CStoreRsp => 0x8001,
            CommandField::CGetRq => 0x0010,
            CommandField::CGetRsp => 0x8010,
            CommandField::CFindRq => 0x0020,
            CommandField::CFindRsp => 0x8020,
            CommandField::CEchoRq => 0x0030,
            CommandField::CEchoRsp => 0x8030,
            CommandField::CCancelRq => 0x0FFF,
            CommandField::Unknown(code) => code,
        }
    }

    pub fn is_response(self) -> bool {
        self.code() & 0x8000 != 0
    }
}

/// DIMSE状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimseStatus {
    Success,
    Warning(u16),
    Failure(u16),
    Pending(u16),
    Cancel,
}

impl DimseStatus {
    pub const SUCCESS: u16 = 0x0000;
    pub const PENDING: u16 = 0xFF00;
    pub const PENDING_WARNING: u16 = 0xFF01;
    pub const CANCEL: u16 = 0xFE00;
    pub const OUT_OF_RESOURCES: u16 = 0xA700;
    pub const SOP_CLASS_NOT_SUPPORTED: u16 = 0x0122;
    pub const PROCESSING_FAILURE: u16 = 0x0110;

    pub fn from_code(code: u16) -> Self {
        match code {
            Self::SUCCESS => DimseStatus::Success,
            Self::PENDING | Self::PENDING_WARNING => DimseStatus::Pending(code),
            Self::CANCEL => DimseStatus::Cancel,
            0x0001 | 0x0107 | 0x0116 | 0xB000..=0xBFFF => DimseStatus::Warning(code),
            other => DimseStatus::Failure(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            DimseStatus::Success => Self::SUCCESS,
            DimseStatus::Cancel => Self::CANCEL,
            DimseStatus::Warning(code) | DimseStatus::Failure(code) | DimseStatus::Pending(code) => code,
        }
    }

    pub fn out_of_resources() -> Self {
        DimseStatus::Failure(Self::OUT_OF_RESOURCES)
    }

    pub fn is_success(self) -> bool {
        self == DimseStatus::Success
    }

    pub fn is_pending(self) -> bool {
        matches!(self, DimseStatus::Pending(_))
    }
}

impl fmt::Display for DimseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DimseStatus::Success => "Success",
            DimseStatus::Warning(_) => "Warning",
            DimseStatus::Failure(_) => "Failure",
            DimseStatus::Pending(_) => "Pending",
            DimseStatus::Cancel => "Cancel",
        };
        write!(f, "{} (0x{:04X})", label, self.code())
    }
}

/// C-GET 子操作计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubOperationCounts {
    pub remaining: Option<u16>,
    pub completed: Option<u16>,
    pub failed: Option<u16>,
    pub warning: Option<u16>,
}

impl SubOperationCounts {
    /// 对端报告已送达（成功或警告）的子操作数
    pub fn delivered(&self) -> Option<u32> {
        match (self.completed, self.warning) {
            (None, None) => None,
            (completed, warning) => Some(completed.unwrap_or(0) as u32 + warning.unwrap_or(0) as u32),
        }
    }
}

/// DICOM命令集
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSet {
    pub field: CommandField,
    pub message_id: Option<u16>,
    pub message_id_responded_to: Option<u16>,
    pub affected_sop_class_uid: Option<String>,
    pub affected_sop_instance_uid: Option<String>,
    pub priority: Option<u16>,
    pub status: Option<u16>,
    pub has_data_set: bool,
    pub sub_operations: SubOperationCounts,
}

impl CommandSet {
    fn new(field: CommandField) -> Self {
        Self {
            field,
            message_id: None,
            message_id_responded_to: None,
            affected_sop_class_uid: None,
            affected_sop_instance_uid: None,
            priority: None,
            status: None,
            has_data_set: false,
            sub_operations: SubOperationCounts::default(),
        }
    }

    fn request(field: CommandField, message_id: u16, sop_class_uid: &str) -> Self {
        Self {
            message_id: Some(message_id),
            affected_sop_class_uid: Some(sop_class_uid.to_string()),
            ..Self::new(field)
        }
    }

    pub fn c_echo_rq(message_id: u16, sop_class_uid: &str) -> Self {
        Self::request(CommandField::CEchoRq, message_id, sop_class_uid)
    }

    pub fn c_find_rq(message_id: u16, sop_class_uid: &str) -> Self {
        Self {
            priority: Some(PRIORITY_MEDIUM),
            has_data_set: true,
            ..Self::request(CommandField::CFindRq, message_id, sop_class_uid)
        }
    }

    pub fn c_get_rq(message_id: u16, sop_class_uid: &str) -> Self {
        Self {
            priority: Some(PRIORITY_MEDIUM),
            has_data_set: true,
            ..Self::request(CommandField::CGetRq, message_id, sop_class_uid)
        }
    }

    pub fn c_store_rq(message_id: u16, sop_class_uid: &str, sop_instance_uid: &str) -> Self {
        Self {
            affected_sop_instance_uid: Some(sop_instance_uid.to_string()),
            priority: Some(PRIORITY_MEDIUM),
            has_data_set: true,
            ..Self::request(CommandField::CStoreRq, message_id, sop_class_uid)
        }
    }

    /// 构造对请求的无数据集响应
    pub fn response_to(request: &CommandSet, status: DimseStatus) -> Self {
        let field = match request.field {
            CommandField::CStoreRq => CommandField::CStoreRsp,
            CommandField::CEchoRq => CommandField::CEchoRsp,
            CommandField::CFindRq => CommandField::CFindRsp,
            CommandField::CGetRq => CommandField::CGetRsp,
            other => CommandField::Unknown(other.code() | 0x8000),
        };
        Self {
            message_id_responded_to: request.message_id,
            affected_sop_class_uid: request.affected_sop_class_uid.clone(),
            affected_sop_instance_uid: request.affected_sop_instance_uid.clone(),
            status: Some(status.code()),
            ..Self::new(field)
        }
    }

    pub fn dimse_status(&self) -> Option<DimseStatus> {
        self.status.map(DimseStatus::from_code)
    }

    /// 编码为隐式VR Little Endian字节流
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut elements = vec![
            DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [self.field.code()])),
            DataElement::new(
                tags::COMMAND_DATA_SET_TYPE,
                VR::US,
                dicom_value!(U16, [if self.has_data_set { DATA_SET_PRESENT } else { NO_DATA_SET }]),
            ),
        ];

        let u16_fields = [
            (tags::MESSAGE_ID, self.message_id),
            (tags::MESSAGE_ID_BEING_RESPONDED_TO, self.message_id_responded_to),
            (tags::PRIORITY, self.priority),
            (tags::STATUS, self.status),
            (tags::NUMBER_OF_REMAINING_SUBOPERATIONS, self.sub_operations.remaining),
            (tags::NUMBER_OF_COMPLETED_SUBOPERATIONS, self.sub_operations.completed),
            (tags::NUMBER_OF_FAILED_SUBOPERATIONS, self.sub_operations.failed),
            (tags::NUMBER_OF_WARNING_SUBOPERATIONS, self.sub_operations.warning),
        ];
        for (tag, value) in u16_fields {
            if let Some(value) = value {
                elements.push(DataElement::new(tag, VR::US, dicom_value!(U16, [value])));
            }
        }

        if let Some(uid) = &self.affected_sop_class_uid {
            elements.push(DataElement::new(tags::AFFECTED_SOP_CLASS_UID, VR::UI, dicom_value!(Str, uid.as_str())));
        }
        if let Some(uid) = &self.affected_sop_instance_uid {
            elements.push(DataElement::new(
                tags::AFFECTED_SOP_INSTANCE_UID,
                VR::UI,
                dicom_value!(Str, uid.as_str()),
            ));
        }

        let command = InMemDicomObject::command_from_element_iter(elements);
        let mut bytes = Vec::new();
        command
            .write_dataset_with_ts(&mut bytes, &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased())
            .map_err(|e| PacsError::Dicom(format!("编码命令集失败: {}", e)))?;
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let command = InMemDicomObject::read_dataset_with_ts(bytes, &entries::IMPLICIT_VR_LITTLE_ENDIAN.erased())
            .map_err(|e| PacsError::Dicom(format!("解析命令集失败: {}", e)))?;

        let read_u16 = |tag| command.element(tag).ok().and_then(|e| e.uint16().ok());
        let read_str = |tag| {
            command
                .element(tag)
                .ok()
                .and_then(|e| e.to_str().ok().map(|s| trim_dicom_value(&s).to_string()))
        };

        let field = read_u16(tags::COMMAND_FIELD)
            .map(CommandField::from_code)
            .ok_or_else(|| PacsError::Protocol("命令集缺少 CommandField".to_string()))?;

        Ok(Self {
            field,
            message_id: read_u16(tags::MESSAGE_ID),
            message_id_responded_to: read_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO),
            affected_sop_class_uid: read_str(tags::AFFECTED_SOP_CLASS_UID),
            affected_sop_instance_uid: read_str(tags::AFFECTED_SOP_INSTANCE_UID),
            priority: read_u16(tags::PRIORITY),
            status: read_u16(tags::STATUS),
            has_data_set: read_u16(tags::COMMAND_DATA_SET_TYPE).map_or(false, |v| v != NO_DATA_SET),
            sub_operations: SubOperationCounts {
                remaining: read_u16(tags::NUMBER_OF_REMAINING_SUBOPERATIONS),
                completed: read_u16(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS),
                failed: read_u16(tags::NUMBER_OF_FAILED_SUBOPERATIONS),
                warning: read_u16(tags::NUMBER_OF_WARNING_SUBOPERATIONS),
            },
        })
    }
}

/// 一条完整的DIMSE消息
#[derive(Debug, Clone)]
pub struct DimseMessage {
    pub context_id: u8,
    pub command: CommandSet,
    pub data: Option<Vec<u8>>,
}

fn lookup(ts_uid: &str) -> Result<&'static TransferSyntax> {
    transfer_syntax::resolve(ts_uid)
}

/// 按给定传输语法编码数据集
pub fn encode_dataset(object: &InMemDicomObject, ts_uid: &str) -> Result<Vec<u8>> {
    let ts = lookup(ts_uid)?;
    let mut bytes = Vec::new();
    object
        .write_dataset_with_ts(&mut bytes, ts)
        .map_err(|e| PacsError::Dicom(format!("编码数据集失败: {}", e)))?;
    Ok(bytes)
}

/// 按给定传输语法解析数据集
pub fn decode_dataset(bytes: &[u8], ts_uid: &str) -> Result<InMemDicomObject> {
    let ts = lookup(ts_uid)?;
    InMemDicomObject::read_dataset_with_ts(bytes, ts)
        .map_err(|e| PacsError::Dicom(format!("解析数据集失败: {}", e)))
}

/// 读取字符串属性，去除填充
pub fn element_str(object: &InMemDicomObject, tag: dicom_core::Tag) -> Option<String> {
    object
        .element(tag)
        .ok()
        .and_then(|e| e.to_str().ok().map(|s| trim_dicom_value(&s).to_string()))
        .filter(|s| !s.is_empty())
}
