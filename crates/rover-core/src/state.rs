//! 共享状态快照
//!
//! 执行器工作线程每次成功应用命令后发布一份不可变快照，
//! 读取方（编排器、CLI、测试）通过 `ArcSwap` 无锁读取最新值，
//! 不与工作线程产生任何阻塞耦合。

use arc_swap::ArcSwap;
use rover_protocol::clock::monotonic_us;
use std::sync::Arc;

/// 执行器最新状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActuatorState {
    /// 最后一次成功应用的命令序号（0 表示尚未应用任何命令）
    pub last_seq: u64,
    /// 最后应用的目标位置（步数）
    pub position: i32,
    /// 最后应用的速度（步/秒）
    pub velocity: u32,
    /// 最近一次命令是否为 Halt
    pub halted: bool,
    /// 快照发布时间（单调微秒）
    pub timestamp_us: u64,
}

impl ActuatorState {
    /// 以当前时间戳构造快照
    pub fn now(last_seq: u64, position: i32, velocity: u32, halted: bool) -> Self {
        Self {
            last_seq,
            position,
            velocity,
            halted,
            timestamp_us: monotonic_us(),
        }
    }
}

/// 工作线程与读取方共享的状态槽
pub type SharedActuatorState = Arc<ArcSwap<ActuatorState>>;

/// 创建初始（未应用任何命令）状态槽
pub fn new_actuator_state() -> SharedActuatorState {
    Arc::new(ArcSwap::from_pointee(ActuatorState::default()))
}
