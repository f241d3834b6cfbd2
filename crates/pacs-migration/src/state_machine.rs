//! 迁移运行状态机
//!
//! 一次运行的阶段转换表。空计划直接结束，不启动监听器；
//! 任何阶段失败都进入 `Stopped`，确保监听器清理总会执行。

use pacs_core::{PacsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 运行阶段
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RunState {
    Init,
    Probing,
    Diffing,
    EmptyDone,
    Listening,
    Processing,
    Draining,
    Done,
    Stopped,
}

/// 阶段转换事件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RunEvent {
    Start,
    Probed,
    PlanEmpty,
    PlanReady,
    ListenerStarted,
    StudiesProcessed,
    Drained,
    Stop,
    Failed,
}

#[derive(Debug)]
pub struct RunStateMachine {
    transitions: HashMap<(RunState, RunEvent), RunState>,
}

impl RunStateMachine {
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        transitions.insert((RunState::Init, RunEvent::Start), RunState::Probing);
        transitions.insert((RunState::Probing, RunEvent::Probed), RunState::Diffing);
        transitions.insert((RunState::Diffing, RunEvent::PlanEmpty), RunState::EmptyDone);
        transitions.insert((RunState::Diffing, RunEvent::PlanReady), RunState::Listening);
        transitions.insert((RunState::Listening, RunEvent::ListenerStarted), RunState::Processing);
        transitions.insert((RunState::Processing, RunEvent::StudiesProcessed), RunState::Draining);
        transitions.insert((RunState::Draining, RunEvent::Drained), RunState::Done);
        transitions.insert((RunState::Done, RunEvent::Stop), RunState::Stopped);
        transitions.insert((RunState::EmptyDone, RunEvent::Stop), RunState::Stopped);

        for state in [
            RunState::Init,
            RunState::Probing,
            RunState::Diffing,
            RunState::Listening,
            RunState::Processing,
            RunState::Draining,
        ] {
            transitions.insert((state, RunEvent::Failed), RunState::Stopped);
        }

        Self { transitions }
    }

    pub fn can_transition(&self, from: RunState, event: RunEvent) -> bool {
        self.transitions.contains_key(&(from, event))
    }

    /// 执行状态转换
    pub fn transition(&self, from: RunState, event: RunEvent) -> Result<RunState> {
        self.transitions
            .get(&(from, event))
            .copied()
            .ok_or_else(|| PacsError::InvalidStateTransition {
                from: format!("{:?}", from),
                event: format!("{:?}", event),
            })
    }

    /// 某状态下可触发的事件
    pub fn possible_events(&self, current: RunState) -> Vec<RunEvent> {
        self.transitions
            .keys()
            .filter(|(state, _)| *state == current)
            .map(|(_, event)| *event)
            .collect()
    }
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
