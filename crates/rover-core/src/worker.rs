//! 工作线程生命周期
//!
//! 每个外设工作线程独占一个后台线程，通过原子运行标志协作停止：
//!
//! ```text
//! Idle --start()--> Running --stop()--> Stopping --join()--> Joined
//! ```
//!
//! `stop()` 只翻转标志（异步），循环在下一次迭代边界观察到并退出，
//! 停机延迟以一个循环周期为界；`join()` 是本核心中唯一的阻塞调用。
//! `Joined` 为终态，工作线程不可重启。

use crate::error::LifecycleError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::{error, trace};

/// 工作线程状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Stopping,
    Joined,
}

/// 拥有一个后台线程的生命周期句柄
///
/// 循环体以 `Arc<AtomicBool>` 接收运行标志，必须在每次迭代边界
/// 用 `Ordering::Acquire` 检查；句柄侧以 `Ordering::Release` 写入，
/// 保证标志翻转前的写入对循环可见。
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    state: WorkerState,
}

impl WorkerHandle {
    /// 构造空闲句柄（不创建线程）
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            state: WorkerState::Idle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// 启动循环线程：`Idle -> Running`
    ///
    /// 其他任何状态下调用都是 IllegalState，且不会产生新线程。
    pub fn start<F>(&mut self, body: F) -> Result<(), LifecycleError>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        match self.state {
            WorkerState::Idle => {
                // Release: 循环首次 Acquire 读到 true 时，之前的初始化已可见
                self.running.store(true, Ordering::Release);
                let running = self.running.clone();
                let thread = std::thread::Builder::new()
                    .name(self.name.clone())
                    .spawn(move || body(running))
                    .map_err(|source| {
                        self.running.store(false, Ordering::Release);
                        LifecycleError::Spawn {
                            name: self.name.clone(),
                            source,
                        }
                    })?;
                self.thread = Some(thread);
                self.state = WorkerState::Running;
                trace!(worker = %self.name, "worker started");
                Ok(())
            },
            WorkerState::Joined => Err(LifecycleError::AlreadyJoined {
                name: self.name.clone(),
            }),
            _ => Err(LifecycleError::AlreadyStarted {
                name: self.name.clone(),
            }),
        }
    }

    /// 请求停止：`Running -> Stopping`，只翻转标志，立即返回
    ///
    /// 对已处于 `Stopping` 的句柄重复调用无害。
    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        match self.state {
            WorkerState::Running => {
                // Release: 此前的写入对观察到 false 的循环线程可见
                self.running.store(false, Ordering::Release);
                self.state = WorkerState::Stopping;
                trace!(worker = %self.name, "stop requested");
                Ok(())
            },
            WorkerState::Stopping => Ok(()),
            WorkerState::Idle => Err(LifecycleError::NotStarted {
                name: self.name.clone(),
            }),
            WorkerState::Joined => Err(LifecycleError::AlreadyJoined {
                name: self.name.clone(),
            }),
        }
    }

    /// 等待线程退出：`Stopping -> Joined`
    ///
    /// stop 之后调用预期在一个循环周期内返回。未 stop 就 join
    /// 会无限阻塞，按 IllegalState 拒绝。
    pub fn join(&mut self) -> Result<(), LifecycleError> {
        match self.state {
            WorkerState::Stopping => {
                let thread = self.thread.take().expect("stopping worker owns a thread");
                // 无论 join 结果如何都进入终态
                self.state = WorkerState::Joined;
                match thread.join() {
                    Ok(()) => {
                        trace!(worker = %self.name, "worker joined");
                        Ok(())
                    },
                    Err(_) => {
                        error!(worker = %self.name, "worker thread panicked");
                        Err(LifecycleError::Panicked {
                            name: self.name.clone(),
                        })
                    },
                }
            },
            WorkerState::Running => Err(LifecycleError::NotStopped {
                name: self.name.clone(),
            }),
            WorkerState::Idle => Err(LifecycleError::NotStarted {
                name: self.name.clone(),
            }),
            WorkerState::Joined => Err(LifecycleError::AlreadyJoined {
                name: self.name.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn idle_loop(running: Arc<AtomicBool>) {
        while running.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// start/stop/join 在未交换任何消息的情况下有界终止
    #[test]
    fn test_start_stop_join_terminates() {
        let mut w = WorkerHandle::new("idle");
        w.start(idle_loop).unwrap();
        assert_eq!(w.state(), WorkerState::Running);
        w.stop().unwrap();
        assert_eq!(w.state(), WorkerState::Stopping);
        w.join().unwrap();
        assert_eq!(w.state(), WorkerState::Joined);
    }

    /// 二次 start 报 IllegalState，且只有一个线程在运行
    #[test]
    fn test_double_start_is_illegal_state() {
        let live = Arc::new(AtomicUsize::new(0));
        let mut w = WorkerHandle::new("once");

        let live_a = live.clone();
        w.start(move |running| {
            live_a.fetch_add(1, Ordering::SeqCst);
            idle_loop(running);
            live_a.fetch_sub(1, Ordering::SeqCst);
        })
        .unwrap();

        let live_b = live.clone();
        let err = w.start(move |running| {
            live_b.fetch_add(1, Ordering::SeqCst);
            idle_loop(running);
        });
        assert!(matches!(err, Err(LifecycleError::AlreadyStarted { .. })));

        // 给第一个线程足够时间进入循环
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(live.load(Ordering::SeqCst), 1);

        w.stop().unwrap();
        w.join().unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_before_start_is_illegal_state() {
        let mut w = WorkerHandle::new("cold");
        assert!(matches!(w.stop(), Err(LifecycleError::NotStarted { .. })));
    }

    #[test]
    fn test_join_before_stop_is_illegal_state() {
        let mut w = WorkerHandle::new("busy");
        w.start(idle_loop).unwrap();
        assert!(matches!(w.join(), Err(LifecycleError::NotStopped { .. })));
        w.stop().unwrap();
        w.join().unwrap();
    }

    #[test]
    fn test_joined_is_terminal() {
        let mut w = WorkerHandle::new("done");
        w.start(idle_loop).unwrap();
        w.stop().unwrap();
        w.join().unwrap();

        assert!(matches!(
            w.start(idle_loop),
            Err(LifecycleError::AlreadyJoined { .. })
        ));
        assert!(matches!(
            w.stop(),
            Err(LifecycleError::AlreadyJoined { .. })
        ));
        assert!(matches!(
            w.join(),
            Err(LifecycleError::AlreadyJoined { .. })
        ));
    }

    #[test]
    fn test_double_stop_is_harmless() {
        let mut w = WorkerHandle::new("twice");
        w.start(idle_loop).unwrap();
        w.stop().unwrap();
        w.stop().unwrap();
        w.join().unwrap();
    }

    /// 循环 panic 在 join 时上报
    #[test]
    fn test_panicked_worker_surfaces_on_join() {
        let mut w = WorkerHandle::new("explosive");
        w.start(|_running| panic!("boom")).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        w.stop().unwrap();
        assert!(matches!(w.join(), Err(LifecycleError::Panicked { .. })));
        assert_eq!(w.state(), WorkerState::Joined);
    }
}
