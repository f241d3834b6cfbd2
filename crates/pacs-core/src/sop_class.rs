//! SOP类目录
//!
//! 以数据而非分支的形式描述迁移所需的SOP类：关键存储类（按临床优先级手工排序）、
//! 常用存储类白名单，以及完整的存储SOP类参考目录。

use std::fmt;

/// SOP类的服务类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SopClassKind {
    Storage,
    QueryRetrieve,
    Verification,
}

/// 带稳定标识符的SOP类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SopClass {
    pub uid: &'static str,
    pub keyword: &'static str,
    pub kind: SopClassKind,
}

impl SopClass {
    const fn storage(uid: &'static str, keyword: &'static str) -> Self {
        Self { uid, keyword, kind: SopClassKind::Storage }
    }

    const fn query_retrieve(uid: &'static str, keyword: &'static str) -> Self {
        Self { uid, keyword, kind: SopClassKind::QueryRetrieve }
    }

    pub const VERIFICATION: SopClass = SopClass {
        uid: "1.2.840.10008.1.1",
        keyword: "Verification",
        kind: SopClassKind::Verification,
    };

    pub const STUDY_ROOT_FIND: SopClass = SopClass::query_retrieve(
        "1.2.840.10008.5.1.4.1.2.2.1",
        "StudyRootQueryRetrieveInformationModelFind",
    );
    pub const STUDY_ROOT_GET: SopClass = SopClass::query_retrieve(
        "1.2.840.10008.5.1.4.1.2.2.3",
        "StudyRootQueryRetrieveInformationModelGet",
    );
    pub const PATIENT_ROOT_GET: SopClass = SopClass::query_retrieve(
        "1.2.840.10008.5.1.4.1.2.1.3",
        "PatientRootQueryRetrieveInformationModelGet",
    );
    pub const PATIENT_STUDY_ONLY_GET: SopClass = SopClass::query_retrieve(
        "1.2.840.10008.5.1.4.1.2.3.3",
        "PatientStudyOnlyQueryRetrieveInformationModelGet",
    );

    pub const COMPUTED_RADIOGRAPHY: SopClass =
        SopClass::storage("1.2.840.10008.5.1.4.1.1.1", "ComputedRadiographyImageStorage");
    pub const DIGITAL_XRAY_PRESENTATION: SopClass = SopClass::storage(
        "1.2.840.10008.5.1.4.1.1.1.1",
        "DigitalXRayImageStorageForPresentation",
    );
    pub const DIGITAL_XRAY_PROCESSING: SopClass = SopClass::storage(
        "1.2.840.10008.5.1.4.1.1.1.1.1",
        "DigitalXRayImageStorageForProcessing",
    );
    pub const CT_IMAGE: SopClass = SopClass::storage("1.2.840.10008.5.1.4.1.1.2", "CTImageStorage");
    pub const MR_IMAGE: SopClass = SopClass::storage("1.2.840.10008.5.1.4.1.1.4", "MRImageStorage");
    pub const ULTRASOUND_IMAGE: SopClass =
        SopClass::storage("1.2.840.10008.5.1.4.1.1.6.1", "UltrasoundImageStorage");
    pub const SECONDARY_CAPTURE_IMAGE: SopClass =
        SopClass::storage("1.2.840.10008.5.1.4.1.1.7", "SecondaryCaptureImageStorage");

    pub fn is_storage(&self) -> bool {
        self.kind == SopClassKind::Storage
    }
}

impl fmt::Display for SopClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.keyword, self.uid)
    }
}

/// 关键存储类，按优先级排序，协商时必须占据最前面的位置
pub const CRITICAL_STORAGE_SOP_CLASSES: &[SopClass] = &[
    SopClass::COMPUTED_RADIOGRAPHY,
    SopClass::DIGITAL_XRAY_PRESENTATION,
    SopClass::DIGITAL_XRAY_PROCESSING,
    SopClass::CT_IMAGE,
    SopClass::MR_IMAGE,
    SopClass::ULTRASOUND_IMAGE,
    SopClass::SECONDARY_CAPTURE_IMAGE,
];

/// 常用SOP类白名单，用于在关键类之后填充剩余的协商位置
pub const COMMON_STORAGE_SOP_CLASSES: &[&str] = &[
    "1.2.840.10008.5.1.4.1.2.2.3",
    "1.2.840.10008.5.1.4.1.1.88.22",
    "1.2.840.10008.5.1.4.1.1.9.2.1",
    "1.2.840.10008.5.1.4.1.1.77.1.4",
    "1.2.840.10008.5.1.4.1.1.1.2",
    "1.2.840.10008.5.1.4.1.1.6.2",
    "1.2.840.10008.5.1.4.1.1.130",
    "1.2.840.10008.5.1.4.1.1.9.3.1",
    "1.2.840.10008.5.1.4.1.1.128",
    "1.2.840.10008.5.1.4.1.1.4.2",
    "1.2.840.10008.5.1.4.1.1.88.67",
    "1.2.840.10008.5.1.4.1.1.1.3",
    "1.2.840.10008.5.1.4.1.1.77.1.4.1",
    "1.2.840.10008.5.1.4.1.1.3.1",
    "1.2.840.10008.5.1.4.1.1.1.2.1",
    "1.2.840.10008.5.1.4.1.1.88.59",
    "1.2.840.10008.5.1.4.1.1.1.1",
    "1.2.840.10008.5.1.4.1.1.1.1.1",
    "1.2.840.10008.5.1.4.1.1.77.1.6",
    "1.2.840.10008.5.1.4.1.1.6.1",
    "1.2.840.10008.5.1.4.1.1.2",
    "1.2.840.10008.5.1.4.1.1.104.3",
    "1.2.840.10008.5.1.4.1.1.2.1",
    "1.2.840.10008.5.1.4.1.1.12.1.1",
    "1.2.840.10008.5.1.4.1.1.11.1",
    "1.2.840.10008.5.1.4.1.1.104.1",
    "1.2.840.10008.5.1.4.1.1.7",
    "1.2.840.10008.5.1.4.1.1.9.1.2",
    "1.2.840.10008.5.1.4.1.1.1.3.1",
    "1.2.840.10008.5.1.4.1.1.88.11",
    "1.2.840.10008.5.1.4.1.1.9.1.1",
    "1.2.840.10008.5.1.4.1.1.12.2.1",
    "1.2.840.10008.5.1.4.1.1.20",
    "1.2.840.10008.5.1.4.1.1.1",
    "1.2.840.10008.5.1.4.1.1.9.1.3",
    "1.2.840.10008.5.1.4.1.1.13.1.1",
    "1.2.840.10008.5.1.4.1.1.12.2",
    "1.2.840.10008.5.1.4.1.1.4",
    "1.2.840.10008.5.1.4.1.1.104.2",
    "1.2.840.10008.5.1.4.1.1.4.1",
    "1.2.840.10008.5.1.4.1.1.12.1",
];

/// 存储SOP类参考目录（自然顺序）
pub const STORAGE_SOP_CLASSES: &[SopClass] = &[
    SopClass::COMPUTED_RADIOGRAPHY,
    SopClass::DIGITAL_XRAY_PRESENTATION,
    SopClass::DIGITAL_XRAY_PROCESSING,
    SopClass::storage("1.2.840.10008.5.1.4.1.1.1.2", "DigitalMammographyXRayImageStorageForPresentation"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.1.2.1", "DigitalMammographyXRayImageStorageForProcessing"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.1.3", "DigitalIntraOralXRayImageStorageForPresentation"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.1.3.1", "DigitalIntraOralXRayImageStorageForProcessing"),
    SopClass::CT_IMAGE,
    SopClass::storage("1.2.840.10008.5.1.4.1.1.2.1", "EnhancedCTImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.2.2", "LegacyConvertedEnhancedCTImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.3.1", "UltrasoundMultiFrameImageStorage"),
    SopClass::MR_IMAGE,
    SopClass::storage("1.2.840.10008.5.1.4.1.1.4.1", "EnhancedMRImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.4.2", "MRSpectroscopyStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.4.3", "EnhancedMRColorImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.4.4", "LegacyConvertedEnhancedMRImageStorage"),
    SopClass::ULTRASOUND_IMAGE,
    SopClass::storage("1.2.840.10008.5.1.4.1.1.6.2", "EnhancedUSVolumeStorage"),
    SopClass::SECONDARY_CAPTURE_IMAGE,
    SopClass::storage("1.2.840.10008.5.1.4.1.1.7.1", "MultiFrameSingleBitSecondaryCaptureImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.7.2", "MultiFrameGrayscaleByteSecondaryCaptureImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.7.3", "MultiFrameGrayscaleWordSecondaryCaptureImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.7.4", "MultiFrameTrueColorSecondaryCaptureImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.9.1.1", "TwelveLeadECGWaveformStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.9.1.2", "GeneralECGWaveformStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.9.1.3", "AmbulatoryECGWaveformStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.9.2.1", "HemodynamicWaveformStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.9.3.1", "CardiacElectrophysiologyWaveformStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.9.4.1", "BasicVoiceAudioWaveformStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.9.4.2", "GeneralAudioWaveformStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.9.5.1", "ArterialPulseWaveformStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.9.6.1", "RespiratoryWaveformStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.11.1", "GrayscaleSoftcopyPresentationStateStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.11.2", "ColorSoftcopyPresentationStateStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.11.3", "PseudoColorSoftcopyPresentationStateStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.11.4", "BlendingSoftcopyPresentationStateStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.11.5", "XAXRFGrayscaleSoftcopyPresentationStateStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.12.1", "XRayAngiographicImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.12.1.1", "EnhancedXAImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.12.2", "XRayRadiofluoroscopicImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.12.2.1", "EnhancedXRFImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.13.1.1", "XRay3DAngiographicImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.13.1.2", "XRay3DCraniofacialImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.13.1.3", "BreastTomosynthesisImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.14.1", "IntravascularOpticalCoherenceTomographyImageStorageForPresentation"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.14.2", "IntravascularOpticalCoherenceTomographyImageStorageForProcessing"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.20", "NuclearMedicineImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.66", "RawDataStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.66.1", "SpatialRegistrationStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.66.2", "SpatialFiducialsStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.66.3", "DeformableSpatialRegistrationStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.66.4", "SegmentationStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.66.5", "SurfaceSegmentationStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.67", "RealWorldValueMappingStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.68.1", "SurfaceScanMeshStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.68.2", "SurfaceScanPointCloudStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.77.1.1", "VLEndoscopicImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.77.1.1.1", "VideoEndoscopicImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.77.1.2", "VLMicroscopicImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.77.1.2.1", "VideoMicroscopicImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.77.1.3", "VLSlideCoordinatesMicroscopicImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.77.1.4", "VLPhotographicImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.77.1.4.1", "VideoPhotographicImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.77.1.5.1", "OphthalmicPhotography8BitImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.77.1.5.2", "OphthalmicPhotography16BitImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.77.1.5.3", "StereometricRelationshipStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.77.1.5.4", "OphthalmicTomographyImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.77.1.6", "VLWholeSlideMicroscopyImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.78.1", "LensometryMeasurementsStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.78.2", "AutorefractionMeasurementsStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.78.3", "KeratometryMeasurementsStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.78.4", "SubjectiveRefractionMeasurementsStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.78.5", "VisualAcuityMeasurementsStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.79.1", "MacularGridThicknessAndVolumeReportStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.81.1", "OphthalmicAxialMeasurementsStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.88.11", "BasicTextSRStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.88.22", "EnhancedSRStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.88.33", "ComprehensiveSRStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.88.34", "Comprehensive3DSRStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.88.40", "ProcedureLogStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.88.50", "MammographyCADSRStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.88.59", "KeyObjectSelectionDocumentStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.88.65", "ChestCADSRStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.88.67", "XRayRadiationDoseSRStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.88.69", "ColonCADSRStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.88.70", "ImplantationPlanSRStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.104.1", "EncapsulatedPDFStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.104.2", "EncapsulatedCDAStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.104.3", "EncapsulatedSTLStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.128", "PositronEmissionTomographyImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.128.1", "LegacyConvertedEnhancedPETImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.130", "EnhancedPETImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.131", "BasicStructuredDisplayStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.481.1", "RTImageStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.481.2", "RTDoseStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.481.3", "RTStructureSetStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.481.4", "RTBeamsTreatmentRecordStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.481.5", "RTPlanStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.481.6", "RTBrachyTreatmentRecordStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.481.7", "RTTreatmentSummaryRecordStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.481.8", "RTIonPlanStorage"),
    SopClass::storage("1.2.840.10008.5.1.4.1.1.481.9", "RTIonBeamsTreatmentRecordStorage"),
];

/// 按UID查找存储SOP类
pub fn lookup_storage(uid: &str) -> Option<&'static SopClass> {
    STORAGE_SOP_CLASSES.iter().find(|class| class.uid == uid)
}

/// SOP类的可读名称，未知UID原样返回
pub fn keyword_of(uid: &str) -> &str {
    lookup_storage(uid).map(|class| class.keyword).unwrap_or(uid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_storage_catalog_is_unique() {
        let uids: HashSet<_> = STORAGE_SOP_CLASSES.iter().map(|c| c.uid).collect();
        assert_eq!(uids.len(), STORAGE_SOP_CLASSES.len());
        assert!(STORAGE_SOP_CLASSES.iter().all(|c| c.is_storage()));
    }

    #[test]
    fn test_critical_classes_are_in_catalog() {
        for class in CRITICAL_STORAGE_SOP_CLASSES {
            assert!(lookup_storage(class.uid).is_some(), "{} missing", class);
        }
        assert_eq!(CRITICAL_STORAGE_SOP_CLASSES[0], SopClass::COMPUTED_RADIOGRAPHY);
    }

    #[test]
    fn test_keyword_lookup() {
        assert_eq!(keyword_of("1.2.840.10008.5.1.4.1.1.2"), "CTImageStorage");
        assert_eq!(keyword_of("1.2.3.4"), "1.2.3.4");
        assert!(!SopClass::STUDY_ROOT_GET.is_storage());
    }
}
