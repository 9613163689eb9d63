//! 核心性能/行为指标
//!
//! 原子计数器，所有工作线程以 `Relaxed` 写入，`snapshot()`
//! 读出一份一致性要求不高的观测值，供 CLI 退出时打印与测试断言。

use std::sync::atomic::{AtomicU64, Ordering};

/// 编排核心指标（各管理器共享一份）
#[derive(Debug, Default)]
pub struct CoreMetrics {
    /// 成功推入出站队列的传感器读数
    pub readings_emitted: AtomicU64,
    /// 出站队列满被丢弃的读数（预期稳态，非错误）
    pub readings_dropped: AtomicU64,
    /// 成功应用到驱动的执行器命令
    pub commands_applied: AtomicU64,
    /// 因序号重复/倒退被丢弃的命令
    pub commands_discarded: AtomicU64,
    /// 在待重试槽中被更新命令顶替的命令
    pub commands_superseded: AtomicU64,
    /// 写到外部链路的帧
    pub frames_sent: AtomicU64,
    /// 从外部链路完整解出的帧
    pub frames_received: AtomicU64,
    /// 入站帧解析失败
    pub parse_failures: AtomicU64,
    /// 驱动调用失败
    pub driver_faults: AtomicU64,
    /// 链路读写故障
    pub link_faults: AtomicU64,
}

impl CoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// 读出当前计数快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            readings_emitted: self.readings_emitted.load(Ordering::Relaxed),
            readings_dropped: self.readings_dropped.load(Ordering::Relaxed),
            commands_applied: self.commands_applied.load(Ordering::Relaxed),
            commands_discarded: self.commands_discarded.load(Ordering::Relaxed),
            commands_superseded: self.commands_superseded.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            driver_faults: self.driver_faults.load(Ordering::Relaxed),
            link_faults: self.link_faults.load(Ordering::Relaxed),
        }
    }
}

/// 某一时刻的指标读数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub readings_emitted: u64,
    pub readings_dropped: u64,
    pub commands_applied: u64,
    pub commands_discarded: u64,
    pub commands_superseded: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub parse_failures: u64,
    pub driver_faults: u64,
    pub link_faults: u64,
}
