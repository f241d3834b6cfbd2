//! # PACS 迁移引擎
//!
//! 把某一检查日期的研究从源PACS搬到目的PACS：
//! 比较两端的研究列表，对缺失的研究发起 C-GET，
//! 并在本地存储处理器中把收到的每个影像转发到目的端。

pub mod context_catalog;
pub mod counters;
pub mod forwarder;
pub mod listener;
pub mod plan;
pub mod probe;
pub mod profile;
pub mod retrieval;
pub mod runner;
pub mod state_machine;
pub mod study_catalog;

#[cfg(test)]
mod testing;

pub use context_catalog::ContextCatalog;
pub use counters::{CounterSnapshot, TransferCounters};
pub use forwarder::ForwardingStoreHandler;
pub use listener::ListenerManager;
pub use plan::MigrationPlan;
pub use profile::AssociationProfile;
pub use retrieval::{RetrievalOrchestrator, RetrievalOutcome};
pub use runner::{MigrationReport, MigrationRunner, MigrationSettings, StudyOutcome};
pub use state_machine::{RunEvent, RunState, RunStateMachine};
