//! 传输计数器
//!
//! 前台流程读取、后台存储处理器写入的唯一共享状态。三个计数器放在同一把锁后，
//! forwarded 与 handled 在一次加锁内同时递增，因此任意快照都满足
//! `forwarded <= handled <= received`。

use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};
use tokio::sync::Notify;
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub received: u64,
    pub forwarded: u64,
    /// 处理已结束的入站影像（无论是否转发成功）
    pub handled: u64,
}

impl CounterSnapshot {
    /// 相对于更早快照的增量
    pub fn since(&self, earlier: &CounterSnapshot) -> CounterSnapshot {
        CounterSnapshot {
            received: self.received.saturating_sub(earlier.received),
            forwarded: self.forwarded.saturating_sub(earlier.forwarded),
            handled: self.handled.saturating_sub(earlier.handled),
        }
    }
}

#[derive(Debug, Default)]
pub struct TransferCounters {
    counts: Mutex<CounterSnapshot>,
    handled_changed: Notify,
}

impl TransferCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn counts(&self) -> MutexGuard<'_, CounterSnapshot> {
        // 临界区内只有整数加法，中毒时数据仍然完整
        self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 返回递增后的接收总数
    pub fn record_received(&self) -> u64 {
        let mut counts = self.counts();
        counts.received += 1;
        counts.received
    }

    /// 一个入站影像处理结束，`forwarded` 表示是否已送达目的端
    pub fn record_handled(&self, forwarded: bool) {
        {
            let mut counts = self.counts();
            counts.handled += 1;
            if forwarded {
                counts.forwarded += 1;
            }
        }
        self.handled_changed.notify_waiters();
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        *self.counts()
    }

    /// 新一轮迁移开始前清零
    pub fn reset(&self) {
        *self.counts() = CounterSnapshot::default();
    }

    /// 等待 handled 达到 `target`，超时返回 false
    pub async fn wait_for_handled(&self, target: u64, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.handled_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.snapshot().handled >= target {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.snapshot().handled >= target;
            }
        }
    }
}
