//! 迁移主流程
//!
//! 探测两端能力，比较研究列表，启动监听器后逐个研究串行检索，
//! 每个研究之后等待嵌套投递落地，最后留出收尾时间并无条件停止监听器。
//!
//! 运行结论沿用最后一个被处理研究的检索结果，而不是所有研究的汇总。

use crate::{
    context_catalog::{ContextCatalog, DEFAULT_CONTEXT_CAP},
    counters::{CounterSnapshot, TransferCounters},
    forwarder::ForwardingStoreHandler,
    listener::ListenerManager,
    plan::MigrationPlan,
    probe::CapabilityProbe,
    profile::AssociationProfile,
    retrieval::RetrievalOrchestrator,
    state_machine::{RunEvent, RunState, RunStateMachine},
    study_catalog::StudyCatalog,
};
use pacs_core::{utils::today_dicom_date, Endpoint, EndpointRole, StudyRecord};
use pacs_dicom::{AssociationTimeouts, DicomNetwork, DimseStatus, DEFAULT_MAX_PDU_LENGTH};
use futures::FutureExt;
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

/// 一次迁移运行的参数
#[derive(Debug, Clone)]
pub struct MigrationSettings {
    /// 查询与检索的对象
    pub source: Endpoint,
    /// 转发的目标
    pub destination: Endpoint,
    /// 本地AE与监听地址
    pub local: Endpoint,
    /// 检查日期，缺省为当天
    pub study_date: Option<String>,
    pub settle_timeout: Duration,
    pub drain_grace: Duration,
    /// 使用 C-GET 子操作计数提前结束等待
    pub use_completion_signal: bool,
    pub context_cap: usize,
    pub timeouts: AssociationTimeouts,
    pub max_pdu_length: u32,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            source: Endpoint::new("DCM4CHEE", "127.0.0.1", 11112, EndpointRole::Source),
            destination: Endpoint::new("ORTHANC", "127.0.0.1", 11113, EndpointRole::Destination),
            local: Endpoint::new("RADIANT", "0.0.0.0", 11114, EndpointRole::Local),
            study_date: None,
            settle_timeout: Duration::from_secs(10),
            drain_grace: Duration::from_secs(3),
            use_completion_signal: true,
            context_cap: DEFAULT_CONTEXT_CAP,
            timeouts: AssociationTimeouts::default(),
            max_pdu_length: DEFAULT_MAX_PDU_LENGTH,
        }
    }
}

/// 单个研究的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyOutcome {
    pub study_uid: String,
    pub summary: String,
    pub retrieved: bool,
    pub final_status: Option<DimseStatus>,
    /// 源端报告的投递数
    pub expected_images: Option<u32>,
    /// 该研究窗口内的计数增量
    pub images: CounterSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub study_date: String,
    pub source_studies: usize,
    pub destination_studies: usize,
    pub planned: usize,
    pub studies: Vec<StudyOutcome>,
    pub totals: CounterSnapshot,
    pub listener_started: bool,
    pub final_state: RunState,
    pub success: bool,
}

impl MigrationReport {
    fn new(study_date: &str) -> Self {
        Self {
            study_date: study_date.to_string(),
            source_studies: 0,
            destination_studies: 0,
            planned: 0,
            studies: Vec::new(),
            totals: CounterSnapshot::default(),
            listener_started: false,
            final_state: RunState::Init,
            success: false,
        }
    }

    /// 决定运行结论的研究，即最后处理的那一个
    pub fn verdict_source(&self) -> Option<&str> {
        self.studies.last().map(|outcome| outcome.study_uid.as_str())
    }

    pub fn summary(&self) -> String {
        let retrieved = self.studies.iter().filter(|outcome| outcome.retrieved).count();
        format!(
            "{}: 源端 {} 个研究, 目的端 {} 个, 计划 {} 个, 检索成功 {}/{}; 影像 接收 {} 转发 {}; 结果 {}",
            self.study_date,
            self.source_studies,
            self.destination_studies,
            self.planned,
            retrieved,
            self.studies.len(),
            self.totals.received,
            self.totals.forwarded,
            if self.success { "成功" } else { "失败" }
        )
    }
}

pub struct MigrationRunner {
    settings: MigrationSettings,
    counters: Arc<TransferCounters>,
    probe: CapabilityProbe,
    catalog: StudyCatalog,
    listener: ListenerManager,
    retrieval: RetrievalOrchestrator,
    state_machine: RunStateMachine,
}

impl MigrationRunner {
    pub fn new(network: Arc<dyn DicomNetwork>, settings: MigrationSettings) -> Self {
        let contexts = ContextCatalog::build(settings.context_cap);
        info!(
            "存储上下文目录: {} 项 (关键 {} 项, 上限 {})",
            contexts.len(),
            contexts.critical_count(),
            contexts.cap()
        );

        let profile = AssociationProfile::new(
            settings.local.ae_title.clone(),
            settings.timeouts,
            settings.max_pdu_length,
        );
        let counters = Arc::new(TransferCounters::new());
        let handler = Arc::new(ForwardingStoreHandler::new(
            network.clone(),
            settings.destination.clone(),
            profile.clone(),
            counters.clone(),
        ));

        let listener = ListenerManager::new(
            network.clone(),
            handler.clone(),
            &settings.local,
            &contexts,
            settings.timeouts,
            settings.max_pdu_length,
        );
        let retrieval = RetrievalOrchestrator::new(
            network.clone(),
            settings.source.clone(),
            profile.clone(),
            contexts,
            handler,
        );

        Self {
            probe: CapabilityProbe::new(network.clone(), profile.clone()),
            catalog: StudyCatalog::new(network, profile),
            counters,
            listener,
            retrieval,
            state_machine: RunStateMachine::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &MigrationSettings {
        &self.settings
    }

    pub fn counters(&self) -> &Arc<TransferCounters> {
        &self.counters
    }

    fn study_date(&self) -> String {
        self.settings.study_date.clone().unwrap_or_else(today_dicom_date)
    }

    fn advance(&self, state: &mut RunState, event: RunEvent) {
        match self.state_machine.transition(*state, event) {
            Ok(next) => {
                debug!("运行状态 {:?} -> {:?}", state, next);
                *state = next;
            }
            Err(e) => error!("{}", e),
        }
    }

    async fn probe_endpoints(&self) {
        self.probe.probe(&self.settings.source).await;
        self.probe.probe(&self.settings.destination).await;
    }

    async fn diff(&self, study_date: &str) -> MigrationPlan {
        let source = self.catalog.find_studies(&self.settings.source, study_date).await;
        let destination = self.catalog.find_studies(&self.settings.destination, study_date).await;
        let plan = MigrationPlan::compute(&source, &destination);
        info!(
            "迁移计划: {} 个研究待迁移, {} 个已存在于目的端",
            plan.len(),
            plan.skipped()
        );
        plan
    }

    /// 只探测和比较，不启动监听器也不检索
    pub async fn plan(&self) -> MigrationPlan {
        self.probe_endpoints().await;
        self.diff(&self.study_date()).await
    }

    /// 执行完整迁移
    pub async fn run(&self) -> MigrationReport {
        let study_date = self.study_date();
        let mut report = MigrationReport::new(&study_date);
        let mut state = RunState::Init;
        self.counters.reset();
        info!(
            "开始迁移 {}: {} -> {}",
            study_date, self.settings.source, self.settings.destination
        );

        self.advance(&mut state, RunEvent::Start);
        self.probe_endpoints().await;
        self.advance(&mut state, RunEvent::Probed);

        let plan = self.diff(&study_date).await;
        report.source_studies = plan.source_count();
        report.destination_studies = plan.destination_count();
        report.planned = plan.len();

        if plan.is_empty() {
            info!("没有需要迁移的研究");
            self.advance(&mut state, RunEvent::PlanEmpty);
            self.advance(&mut state, RunEvent::Stop);
            report.success = true;
            report.final_state = state;
            return report;
        }
        self.advance(&mut state, RunEvent::PlanReady);

        if let Err(e) = self.listener.start().await {
            error!("无法启动存储监听器: {}", e);
            self.advance(&mut state, RunEvent::Failed);
            self.listener.stop().await;
            report.final_state = state;
            return report;
        }
        report.listener_started = true;
        self.advance(&mut state, RunEvent::ListenerStarted);

        let transferred = AssertUnwindSafe(self.transfer(&plan, &mut report, &mut state))
            .catch_unwind()
            .await;
        self.listener.stop().await;
        if let Err(panic) = transferred {
            error!("迁移过程异常中止，监听器已停止");
            self.advance(&mut state, RunEvent::Failed);
            std::panic::resume_unwind(panic);
        }
        self.advance(&mut state, RunEvent::Stop);

        report.totals = self.counters.snapshot();
        report.success = report.studies.last().map_or(false, |outcome| outcome.retrieved);
        report.final_state = state;
        if let Some(study_uid) = report.verdict_source() {
            info!(study = %study_uid, "运行结论取自最后一个研究的检索结果");
        }
        info!("{}", report.summary());
        report
    }

    /// 逐个研究检索，然后留出收尾时间
    async fn transfer(&self, plan: &MigrationPlan, report: &mut MigrationReport, state: &mut RunState) {
        for (index, study) in plan.studies().iter().enumerate() {
            info!(study = %study.study_uid, "[{}/{}] 迁移 {}", index + 1, plan.len(), study.summary());
            report.studies.push(self.process_study(study).await);
        }
        self.advance(state, RunEvent::StudiesProcessed);

        tokio::time::sleep(self.settings.drain_grace).await;
        self.advance(state, RunEvent::Drained);
    }

    async fn process_study(&self, study: &StudyRecord) -> StudyOutcome {
        let before = self.counters.snapshot();
        let outcome = self.retrieval.retrieve_study(&study.study_uid).await;
        let expected = outcome.expected_deliveries();

        self.settle(&before, expected).await;

        let images = self.counters.snapshot().since(&before);
        if images.received == 0 {
            warn!(study = %study.study_uid, "未收到任何影像");
        } else {
            info!(
                study = %study.study_uid,
                "收到 {} 个影像, 转发 {} 个", images.received, images.forwarded
            );
        }

        StudyOutcome {
            study_uid: study.study_uid.clone(),
            summary: study.summary(),
            retrieved: outcome.success,
            final_status: outcome.final_status,
            expected_images: expected,
            images,
        }
    }

    /// 等待嵌套投递处理完毕；没有可信计数时等满整个窗口
    async fn settle(&self, before: &CounterSnapshot, expected: Option<u32>) {
        let timeout = self.settings.settle_timeout;
        match expected.filter(|_| self.settings.use_completion_signal) {
            Some(count) => {
                let target = before.handled + u64::from(count);
                if !self.counters.wait_for_handled(target, timeout).await {
                    warn!("等待 {} 个投递超时 ({:?})", count, timeout);
                }
            }
            None => tokio::time::sleep(timeout).await,
        }
    }

    /// 中断时的清理
    pub async fn shutdown(&self) {
        self.listener.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ct_instance, Call, GetScript, MockNetwork, MockPeer};

    fn settings() -> MigrationSettings {
        MigrationSettings {
            study_date: Some("20240131".to_string()),
            settle_timeout: Duration::from_millis(500),
            drain_grace: Duration::from_millis(10),
            ..MigrationSettings::default()
        }
    }

    fn runner(network: &MockNetwork, settings: MigrationSettings) -> MigrationRunner {
        MigrationRunner::new(Arc::new(network.clone()), settings)
    }

    fn images(uid: &str, count: usize) -> Vec<pacs_dicom::StoreInstance> {
        (1..=count).map(|i| ct_instance(&format!("{}.{}", uid, i))).collect()
    }

    #[tokio::test]
    async fn test_only_missing_studies_are_retrieved() {
        let source = MockPeer::with_studies(&["1.1", "1.2", "1.3"])
            .with_get("1.1", GetScript::success(images("1.1", 2)))
            .with_get("1.3", GetScript::success(images("1.3", 1)));
        let network = MockNetwork::new()
            .with_peer("DCM4CHEE", source)
            .with_peer("ORTHANC", MockPeer::with_studies(&["1.2"]));

        let report = runner(&network, settings()).run().await;

        assert_eq!(network.retrieved_studies(), vec!["1.1".to_string(), "1.3".to_string()]);
        assert!(report.success);
        assert_eq!((report.source_studies, report.destination_studies, report.planned), (3, 1, 2));
        assert_eq!(report.totals, CounterSnapshot { received: 3, forwarded: 3, handled: 3 });
        assert_eq!(report.studies[0].images.received, 2);
        assert_eq!(report.studies[1].expected_images, Some(1));
        assert_eq!(report.final_state, RunState::Stopped);
        assert_eq!(network.listener_starts(), 1);
        assert_eq!(network.listener_shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_empty_plan_finishes_without_listener() {
        let network = MockNetwork::new()
            .with_peer("DCM4CHEE", MockPeer::default())
            .with_peer("ORTHANC", MockPeer::with_studies(&["1.1"]));

        let report = runner(&network, settings()).run().await;

        assert!(report.success);
        assert!(!report.listener_started);
        assert_eq!(report.final_state, RunState::Stopped);
        assert_eq!(network.listener_starts(), 0);
        assert!(network.retrieved_studies().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_destination_retrieves_everything() {
        let source = MockPeer::with_studies(&["1.1"]).with_get("1.1", GetScript::success(images("1.1", 2)));
        let network = MockNetwork::new()
            .with_peer("DCM4CHEE", source)
            .with_peer("ORTHANC", MockPeer::unreachable());

        let report = runner(&network, settings()).run().await;

        assert!(report.success);
        assert_eq!(report.totals, CounterSnapshot { received: 2, forwarded: 0, handled: 2 });
    }

    #[tokio::test]
    async fn test_zero_images_is_not_fatal() {
        let network = MockNetwork::new()
            .with_peer("DCM4CHEE", MockPeer::with_studies(&["1.1", "1.2"]))
            .with_peer("ORTHANC", MockPeer::default());

        let report = runner(&network, settings()).run().await;

        assert!(report.success);
        assert_eq!(report.studies.len(), 2);
        assert!(report.studies.iter().all(|outcome| outcome.images.received == 0));
    }

    #[tokio::test]
    async fn test_verdict_follows_last_study() {
        let last_fails = MockPeer::with_studies(&["1.1", "1.2"]).with_get("1.2", GetScript::failure(0xC000));
        let network = MockNetwork::new()
            .with_peer("DCM4CHEE", last_fails)
            .with_peer("ORTHANC", MockPeer::default());
        let report = runner(&network, settings()).run().await;
        assert!(!report.success);
        assert_eq!(report.verdict_source(), Some("1.2"));
        assert_eq!(network.retrieved_studies().len(), 2);

        let first_fails = MockPeer::with_studies(&["1.1", "1.2"]).with_get("1.1", GetScript::failure(0xC000));
        let network = MockNetwork::new()
            .with_peer("DCM4CHEE", first_fails)
            .with_peer("ORTHANC", MockPeer::default());
        let report = runner(&network, settings()).run().await;
        assert!(report.success);
        assert!(!report.studies[0].retrieved);
    }

    #[tokio::test]
    async fn test_listener_failure_aborts_run() {
        let network = MockNetwork::new()
            .with_peer("DCM4CHEE", MockPeer::with_studies(&["1.1"]))
            .with_peer("ORTHANC", MockPeer::default())
            .failing_listener();

        let report = runner(&network, settings()).run().await;

        assert!(!report.success);
        assert!(!report.listener_started);
        assert_eq!(report.final_state, RunState::Stopped);
        assert!(network.retrieved_studies().is_empty());
    }

    #[tokio::test]
    async fn test_completion_signal_waits_for_late_deliveries() {
        let mut script = GetScript::success(images("1.1", 3));
        script.deliver_late = Some(Duration::from_millis(50));
        let source = MockPeer::with_studies(&["1.1"]).with_get("1.1", script);
        let network = MockNetwork::new()
            .with_peer("DCM4CHEE", source)
            .with_peer("ORTHANC", MockPeer::default());
        let settings = MigrationSettings {
            settle_timeout: Duration::from_secs(5),
            ..settings()
        };

        let started = tokio::time::Instant::now();
        let report = runner(&network, settings).run().await;

        assert_eq!(report.studies[0].images.handled, 3);
        assert_eq!(report.studies[0].images.forwarded, 3);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_fixed_window_without_counts() {
        let mut script = GetScript::success(images("1.1", 1));
        script.report_counts = false;
        let source = MockPeer::with_studies(&["1.1"]).with_get("1.1", script);
        let network = MockNetwork::new()
            .with_peer("DCM4CHEE", source)
            .with_peer("ORTHANC", MockPeer::default());
        let settings = MigrationSettings {
            settle_timeout: Duration::from_millis(50),
            ..settings()
        };

        let started = tokio::time::Instant::now();
        let report = runner(&network, settings).run().await;

        assert_eq!(report.studies[0].expected_images, None);
        assert_eq!(report.studies[0].images.received, 1);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_dry_run_and_shutdown() {
        let network = MockNetwork::new()
            .with_peer("DCM4CHEE", MockPeer::with_studies(&["1.1", "1.2"]))
            .with_peer("ORTHANC", MockPeer::with_studies(&["1.1"]));
        let runner = runner(&network, settings());

        let plan = runner.plan().await;
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.studies()[0].study_uid, "1.2");

        runner.shutdown().await;
        assert_eq!(network.listener_starts(), 0);
        assert!(network
            .calls()
            .iter()
            .all(|call| !matches!(call, Call::Get { .. } | Call::ListenerShutdown)));
    }

    #[tokio::test]
    async fn test_listener_stopped_when_retrieval_panics() {
        let source = MockPeer { get_panics: true, ..MockPeer::with_studies(&["1.1"]) };
        let network = MockNetwork::new()
            .with_peer("DCM4CHEE", source)
            .with_peer("ORTHANC", MockPeer::default());
        let runner = runner(&network, settings());

        let outcome = tokio::spawn(async move { runner.run().await }).await;

        assert!(outcome.unwrap_err().is_panic());
        assert_eq!(network.listener_starts(), 1);
        assert_eq!(network.listener_shutdowns(), 1);
    }
}
