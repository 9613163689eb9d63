//! 编排核心配置
//!
//! 纯数据结构加 `Default`，由 [`ControllerBuilder`](crate::controller::ControllerBuilder)
//! 链式定制后注入各管理器。

use crate::queue::OverflowPolicy;
use std::time::Duration;

/// 队列容量配置
///
/// # Example
///
/// ```
/// use rover_core::config::QueueConfig;
///
/// // 默认容量（100 条传输队列）
/// let config = QueueConfig::default();
/// assert_eq!(config.transport_capacity, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// 管理器与通信管理器之间四条传输队列的容量
    pub transport_capacity: usize,
    /// 每个传感器的命令分发队列容量（命令稀疏，保持小）
    pub command_capacity: usize,
    /// 执行器管理循环与工作线程之间的小队列容量
    pub worker_capacity: usize,
    /// 传感器读数出站队列满时的背压策略
    ///
    /// 读数流与命令流的策略不对称（新鲜度 vs 最新意图），按队列显式可配。
    pub sensor_overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            transport_capacity: 100,
            command_capacity: 8,
            worker_capacity: 4,
            sensor_overflow: OverflowPolicy::DropNewest,
        }
    }
}

/// 循环节拍配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingConfig {
    /// 空轮询时的退避间隔（路由/管理/通信循环）
    pub poll_interval: Duration,
    /// 传感器默认采集节拍（可按传感器覆盖）
    pub default_cadence: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            default_cadence: Duration::from_millis(50),
        }
    }
}
