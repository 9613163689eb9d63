//! 进程单调时间戳
//!
//! 消息时间戳使用相对进程启动的单调微秒数，不受系统时钟回拨影响。

use std::sync::LazyLock;
use std::time::Instant;

static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

/// 当前单调时间戳（微秒）
///
/// 首次调用锚定进程纪元，之后严格单调不减。
pub fn monotonic_us() -> u64 {
    EPOCH.elapsed().as_micros() as u64
}
