//! 编排核心错误类型定义

use thiserror::Error;

/// 生命周期调用错误（IllegalState 族）
///
/// 这一类是编程错误：只令当前调用失败并上抛给编排方，
/// 不影响其他工作线程。
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// 未经 stop+join 就再次 start
    #[error("worker `{name}` already started")]
    AlreadyStarted { name: String },

    /// start 之前调用 stop
    #[error("worker `{name}` has not been started")]
    NotStarted { name: String },

    /// stop 之前调用 join（会无限阻塞，拒绝执行）
    #[error("worker `{name}` must be stopped before join")]
    NotStopped { name: String },

    /// Joined 为终态，不可再操作
    #[error("worker `{name}` already joined; workers cannot be restarted")]
    AlreadyJoined { name: String },

    /// 工作线程 panic（join 时发现）
    #[error("worker `{name}` panicked")]
    Panicked { name: String },

    /// 操作系统拒绝创建线程
    #[error("failed to spawn thread for `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// 管理器已启动后仍尝试修改其配置（如追加传感器）
    #[error("manager `{name}` is already started; {operation} is only valid before start")]
    SealedConfiguration {
        name: String,
        operation: &'static str,
    },

    /// 同一 `source_id` 注册了两次
    #[error("sensor `{id}` already registered")]
    DuplicateSource { id: String },
}
