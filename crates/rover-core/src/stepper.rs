//! 步进电机管理器
//!
//! 恰好拥有一个执行器工作线程，外加一个管理循环。管理循环把
//! 入站命令搬运到工作线程的小队列；队列瞬时满时在**单槽**中
//! 保留最多一条待重试命令，下一个管理节拍重试；期间到达的更新
//! 命令直接顶替待决命令（最后命令胜出），绝不无界积压。
//!
//! 工作线程按 `seq` 保证幂等：序号不严格递增的命令被丢弃，
//! 防止停止/重启后的重复投递被二次执行。

use crate::config::TimingConfig;
use crate::driver::{DriverError, DriverErrorKind, StepperDriver};
use crate::error::LifecycleError;
use crate::metrics::CoreMetrics;
use crate::queue::BoundedQueue;
use crate::state::{ActuatorState, SharedActuatorState, new_actuator_state};
use crate::worker::{WorkerHandle, WorkerState};
use rover_protocol::{CommandAction, Message, Payload, Severity, SourceId, StatusCode};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{trace, warn};

const MANAGER_NAME: &str = "stepper-manager";

/// 步进电机管理器
pub struct StepperManager {
    id: SourceId,
    in_queue: BoundedQueue<Message>,
    out_queue: BoundedQueue<Message>,
    /// 管理循环 -> 工作线程的小队列
    worker_queue: BoundedQueue<Message>,
    driver: Option<Box<dyn StepperDriver>>,
    state: SharedActuatorState,
    metrics: Arc<CoreMetrics>,
    timing: TimingConfig,
    worker: WorkerHandle,
    admin: WorkerHandle,
    started: bool,
}

impl StepperManager {
    /// 创建管理器
    ///
    /// - `in_queue`: 通信管理器 -> 步进电机（命令）
    /// - `out_queue`: 步进电机 -> 通信管理器（确认/状态事件）
    pub fn new(
        id: impl Into<SourceId>,
        driver: Box<dyn StepperDriver>,
        in_queue: BoundedQueue<Message>,
        out_queue: BoundedQueue<Message>,
        metrics: Arc<CoreMetrics>,
        timing: TimingConfig,
        worker_capacity: usize,
    ) -> Self {
        Self {
            id: id.into(),
            in_queue,
            out_queue,
            worker_queue: BoundedQueue::new(worker_capacity),
            driver: Some(driver),
            state: new_actuator_state(),
            metrics,
            timing,
            worker: WorkerHandle::new("stepper-worker"),
            admin: WorkerHandle::new("stepper-admin"),
            started: false,
        }
    }

    /// 执行器最新状态快照的只读句柄
    pub fn actuator_state(&self) -> SharedActuatorState {
        self.state.clone()
    }

    /// 诊断：工作线程与管理循环的状态
    pub fn worker_states(&self) -> Vec<(String, WorkerState)> {
        vec![
            (self.worker.name().to_string(), self.worker.state()),
            (self.admin.name().to_string(), self.admin.state()),
        ]
    }

    /// 启动工作线程与管理循环
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        if self.started {
            return Err(LifecycleError::AlreadyStarted {
                name: MANAGER_NAME.to_string(),
            });
        }

        let id = self.id.clone();
        let driver = self.driver.take().expect("driver present before start");
        let worker_queue = self.worker_queue.clone();
        let out = self.out_queue.clone();
        let state = self.state.clone();
        let metrics = self.metrics.clone();
        let poll = self.timing.poll_interval;
        self.worker.start(move |running| {
            actuator_loop(id, driver, worker_queue, out, state, metrics, poll, running);
        })?;

        let in_queue = self.in_queue.clone();
        let worker_queue = self.worker_queue.clone();
        let metrics = self.metrics.clone();
        let poll = self.timing.poll_interval;
        self.admin.start(move |running| {
            admin_loop(in_queue, worker_queue, metrics, poll, running);
        })?;

        self.started = true;
        Ok(())
    }

    /// 向两个循环发出停止请求（异步）
    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        if !self.started {
            return Err(LifecycleError::NotStarted {
                name: MANAGER_NAME.to_string(),
            });
        }
        // 先停上游管理循环，再停工作线程
        self.admin.stop()?;
        self.worker.stop()
    }

    /// 等待两个循环退出
    pub fn join(&mut self) -> Result<(), LifecycleError> {
        self.admin.join()?;
        self.worker.join()
    }
}

/// 管理循环：入站命令搬运 + 单槽待重试（最后命令胜出）
fn admin_loop(
    in_queue: BoundedQueue<Message>,
    worker_queue: BoundedQueue<Message>,
    metrics: Arc<CoreMetrics>,
    poll: Duration,
    running: Arc<AtomicBool>,
) {
    let mut pending: Option<Message> = None;

    while running.load(Ordering::Acquire) {
        // 本节拍先重试待决命令
        if let Some(msg) = pending.take()
            && let Err(rejected) = worker_queue.push(msg)
        {
            pending = Some(rejected.into_inner());
        }

        if let Some(msg) = in_queue.pop() {
            if pending.is_some() {
                // 最新意图胜出：顶替待决命令
                trace!("pending command superseded by newer one");
                CoreMetrics::incr(&metrics.commands_superseded);
                pending = Some(msg);
            } else if let Err(rejected) = worker_queue.push(msg) {
                pending = Some(rejected.into_inner());
            }
        }

        spin_sleep::sleep(poll);
    }
    trace!("stepper admin loop exited");
}

/// 执行器工作循环：seq 幂等检查 -> 驱动调用 -> 确认/状态事件
#[allow(clippy::too_many_arguments)]
fn actuator_loop(
    id: SourceId,
    mut driver: Box<dyn StepperDriver>,
    worker_queue: BoundedQueue<Message>,
    out: BoundedQueue<Message>,
    state: SharedActuatorState,
    metrics: Arc<CoreMetrics>,
    poll: Duration,
    running: Arc<AtomicBool>,
) {
    let mut last_seq: u64 = 0;

    while running.load(Ordering::Acquire) {
        let Some(msg) = worker_queue.pop() else {
            spin_sleep::sleep(poll);
            continue;
        };
        let Payload::ActuatorCommand(cmd) = &msg.payload else {
            warn!(kind = msg.kind_name(), "non-command message on worker queue, dropped");
            continue;
        };

        // 幂等：序号必须严格递增，否则视为重复投递
        if cmd.seq <= last_seq {
            trace!(seq = cmd.seq, last_seq, "stale command discarded");
            CoreMetrics::incr(&metrics.commands_discarded);
            continue;
        }

        let result = match cmd.command {
            CommandAction::Move { position, velocity } => driver
                .apply(position, velocity)
                .map(|()| (position, velocity, false)),
            CommandAction::Halt => {
                let held = state.load().position;
                driver.halt().map(|()| (held, 0, true))
            },
            CommandAction::Capture => Err(DriverError::new(
                DriverErrorKind::Unsupported,
                "stepper cannot execute capture",
            )),
        };

        match result {
            Ok((position, velocity, halted)) => {
                last_seq = cmd.seq;
                state.store(Arc::new(ActuatorState::now(
                    last_seq, position, velocity, halted,
                )));
                CoreMetrics::incr(&metrics.commands_applied);
                if out.push(Message::ack(id.clone(), last_seq)).is_err() {
                    warn!(seq = last_seq, "out queue full, ack dropped");
                }
            },
            Err(e) => {
                warn!(seq = cmd.seq, error = %e, "stepper command failed");
                CoreMetrics::incr(&metrics.driver_faults);
                let event = Message::status_event(
                    id.clone(),
                    Severity::Error,
                    StatusCode::DriverFault,
                    e.to_string(),
                );
                if out.push(event).is_err() {
                    warn!("out queue full, status event dropped");
                }
            },
        }
    }
    trace!("actuator loop exited");
}
