//! 传感器管理器
//!
//! 拥有 N 个传感器工作线程，向系统其余部分只暴露一条聚合出站
//! 队列和一条入站命令队列。入站命令由一个路由循环按 `source_id`
//! 分发到对应传感器的私有命令队列；出站读数由各工作线程直接
//! 汇聚到同一条出站队列（多生产者）。
//!
//! 背压策略：读数重在新鲜度，出站队列满时直接丢弃（静默、预期
//! 稳态，仅计数），绝不阻塞传感器节拍。

use crate::config::{QueueConfig, TimingConfig};
use crate::driver::SensorDriver;
use crate::error::LifecycleError;
use crate::metrics::CoreMetrics;
use crate::queue::{BoundedQueue, OverflowPolicy, PushOutcome};
use crate::worker::{WorkerHandle, WorkerState};
use rover_protocol::{Message, Payload, Severity, SourceId, StatusCode};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{trace, warn};

const MANAGER_NAME: &str = "sensor-manager";

/// 单个受管传感器
struct SensorSlot {
    id: SourceId,
    /// start 时移交给工作线程
    driver: Option<Box<dyn SensorDriver>>,
    cadence: Duration,
    /// 路由循环 -> 本传感器的私有命令队列
    commands: BoundedQueue<Message>,
    worker: WorkerHandle,
}

/// 传感器集合的管理器
///
/// `add_sensor` 只允许在 `start()` 之前、由编排线程调用；启动后
/// 传感器集合在管理器生命周期内不可变，集合本身因此无需加锁。
pub struct SensorManager {
    in_queue: BoundedQueue<Message>,
    out_queue: BoundedQueue<Message>,
    metrics: Arc<CoreMetrics>,
    timing: TimingConfig,
    command_capacity: usize,
    overflow: OverflowPolicy,
    sensors: Vec<SensorSlot>,
    router: WorkerHandle,
    started: bool,
}

impl SensorManager {
    /// 创建管理器并接好两条邻接队列
    ///
    /// - `in_queue`: 通信管理器 -> 传感器（命令）
    /// - `out_queue`: 传感器 -> 通信管理器（读数/状态事件）
    pub fn new(
        in_queue: BoundedQueue<Message>,
        out_queue: BoundedQueue<Message>,
        metrics: Arc<CoreMetrics>,
        timing: TimingConfig,
        queues: QueueConfig,
    ) -> Self {
        Self {
            in_queue,
            out_queue,
            metrics,
            timing,
            command_capacity: queues.command_capacity,
            overflow: queues.sensor_overflow,
            sensors: Vec::new(),
            router: WorkerHandle::new("sensor-router"),
            started: false,
        }
    }

    /// 注册一个传感器（仅在 `start()` 之前有效）
    pub fn add_sensor(
        &mut self,
        id: impl Into<SourceId>,
        driver: Box<dyn SensorDriver>,
        cadence: Duration,
    ) -> Result<(), LifecycleError> {
        if self.started {
            return Err(LifecycleError::SealedConfiguration {
                name: MANAGER_NAME.to_string(),
                operation: "add_sensor",
            });
        }
        let id = id.into();
        if self.sensors.iter().any(|s| s.id == id) {
            return Err(LifecycleError::DuplicateSource {
                id: id.to_string(),
            });
        }
        let worker = WorkerHandle::new(format!("sensor-{id}"));
        self.sensors.push(SensorSlot {
            commands: BoundedQueue::new(self.command_capacity),
            driver: Some(driver),
            cadence,
            worker,
            id,
        });
        Ok(())
    }

    /// 当前注册的传感器数量
    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    /// 诊断：各工作线程（含路由循环）的状态，按注册顺序
    pub fn worker_states(&self) -> Vec<(String, WorkerState)> {
        self.sensors
            .iter()
            .map(|s| (s.worker.name().to_string(), s.worker.state()))
            .chain(std::iter::once((
                self.router.name().to_string(),
                self.router.state(),
            )))
            .collect()
    }

    /// 启动所有传感器工作线程与路由循环
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        if self.started {
            return Err(LifecycleError::AlreadyStarted {
                name: MANAGER_NAME.to_string(),
            });
        }

        for slot in &mut self.sensors {
            let id = slot.id.clone();
            let driver = slot.driver.take().expect("driver present before start");
            let commands = slot.commands.clone();
            let out = self.out_queue.clone();
            let metrics = self.metrics.clone();
            let cadence = slot.cadence;
            let overflow = self.overflow;
            slot.worker.start(move |running| {
                sensor_loop(id, driver, commands, out, metrics, cadence, overflow, running);
            })?;
        }

        let routes: HashMap<SourceId, BoundedQueue<Message>> = self
            .sensors
            .iter()
            .map(|s| (s.id.clone(), s.commands.clone()))
            .collect();
        let in_queue = self.in_queue.clone();
        let poll = self.timing.poll_interval;
        self.router.start(move |running| {
            route_loop(in_queue, routes, poll, running);
        })?;

        self.started = true;
        Ok(())
    }

    /// 向所有工作线程发出停止请求（异步，按注册顺序）
    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        if !self.started {
            return Err(LifecycleError::NotStarted {
                name: MANAGER_NAME.to_string(),
            });
        }
        for slot in &mut self.sensors {
            slot.worker.stop()?;
        }
        self.router.stop()
    }

    /// 等待所有工作线程退出（按注册顺序，路由循环最后）
    pub fn join(&mut self) -> Result<(), LifecycleError> {
        for slot in &mut self.sensors {
            slot.worker.join()?;
        }
        self.router.join()
    }
}

/// 传感器工作循环
///
/// 每轮：检查运行标志 -> 最多取一条命令（限定循环时延）->
/// 采集样本 -> 包装推入出站队列 -> 按节拍休眠。
#[allow(clippy::too_many_arguments)]
fn sensor_loop(
    id: SourceId,
    mut driver: Box<dyn SensorDriver>,
    commands: BoundedQueue<Message>,
    out: BoundedQueue<Message>,
    metrics: Arc<CoreMetrics>,
    cadence: Duration,
    overflow: OverflowPolicy,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Acquire) {
        // 每轮迭代最多应用一条命令
        if let Some(msg) = commands.pop()
            && let Payload::ActuatorCommand(cmd) = &msg.payload
            && let Err(e) = driver.handle_command(&cmd.command)
        {
            warn!(sensor = %id, error = %e, "sensor command failed");
            CoreMetrics::incr(&metrics.driver_faults);
            emit_status(&out, &id, StatusCode::DriverFault, e.to_string());
        }

        match driver.acquire() {
            Ok(value) => {
                let msg = Message::sensor_reading(id.clone(), value);
                match out.push_with(msg, overflow) {
                    PushOutcome::Accepted => CoreMetrics::incr(&metrics.readings_emitted),
                    PushOutcome::DroppedNewest => {
                        // 新鲜度优先：满则丢，稳态行为，仅计数
                        CoreMetrics::incr(&metrics.readings_dropped);
                        trace!(sensor = %id, "out queue full, reading dropped");
                    },
                    PushOutcome::SupersededOldest => {
                        CoreMetrics::incr(&metrics.readings_emitted);
                        CoreMetrics::incr(&metrics.readings_dropped);
                        trace!(sensor = %id, "out queue full, oldest reading evicted");
                    },
                }
            },
            Err(e) => {
                warn!(sensor = %id, error = %e, "sensor acquire failed");
                CoreMetrics::incr(&metrics.driver_faults);
                emit_status(&out, &id, StatusCode::DriverFault, e.to_string());
            },
        }

        spin_sleep::sleep(cadence);
    }
    trace!(sensor = %id, "sensor loop exited");
}

/// 入站命令路由循环：按 `source_id` 分发到对应传感器
fn route_loop(
    in_queue: BoundedQueue<Message>,
    routes: HashMap<SourceId, BoundedQueue<Message>>,
    poll: Duration,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Acquire) {
        match in_queue.pop() {
            Some(msg) => match routes.get(&msg.source_id) {
                Some(q) => {
                    if q.push(msg).is_err() {
                        warn!("sensor command queue full, command dropped");
                    }
                },
                None => {
                    warn!(source = %msg.source_id, "command for unknown sensor dropped");
                },
            },
            None => spin_sleep::sleep(poll),
        }
    }
    trace!("sensor router exited");
}

fn emit_status(out: &BoundedQueue<Message>, id: &SourceId, code: StatusCode, detail: String) {
    let msg = Message::status_event(id.clone(), Severity::Error, code, detail);
    if out.push(msg).is_err() {
        warn!(source = %id, "out queue full, status event dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverError, DriverErrorKind};
    use crate::sim::{SimColorSensor, SimDistanceSensor, SimIrSensor};
    use rover_protocol::{CommandAction, SensorValue};

    fn manager_pair(capacity: usize) -> (SensorManager, BoundedQueue<Message>, BoundedQueue<Message>) {
        let in_q = BoundedQueue::new(capacity);
        let out_q = BoundedQueue::new(capacity);
        let mgr = SensorManager::new(
            in_q.clone(),
            out_q.clone(),
            Arc::new(CoreMetrics::new()),
            TimingConfig::default(),
            QueueConfig::default(),
        );
        (mgr, in_q, out_q)
    }

    /// 始终失败的传感器驱动
    struct FaultySensor;

    impl SensorDriver for FaultySensor {
        fn acquire(&mut self) -> Result<SensorValue, DriverError> {
            Err(DriverError::new(DriverErrorKind::NoResponse, "bus timeout"))
        }
    }

    #[test]
    fn test_sensor_count() {
        let (mut mgr, _in_q, _out_q) = manager_pair(16);
        assert_eq!(mgr.sensor_count(), 0);
        mgr.add_sensor(
            "distance",
            Box::new(SimDistanceSensor::new()),
            Duration::from_millis(10),
        )
        .unwrap();
        assert_eq!(mgr.sensor_count(), 1);
    }

    #[test]
    fn test_duplicate_sensor_rejected() {
        let (mut mgr, _in_q, _out_q) = manager_pair(16);
        mgr.add_sensor(
            "color",
            Box::new(SimColorSensor::new()),
            Duration::from_millis(10),
        )
        .unwrap();
        let err = mgr.add_sensor(
            "color",
            Box::new(SimColorSensor::new()),
            Duration::from_millis(10),
        );
        assert!(matches!(err, Err(LifecycleError::DuplicateSource { .. })));
    }

    #[test]
    fn test_add_sensor_after_start_is_illegal() {
        let (mut mgr, _in_q, _out_q) = manager_pair(16);
        mgr.add_sensor(
            "distance",
            Box::new(SimDistanceSensor::new()),
            Duration::from_millis(10),
        )
        .unwrap();
        mgr.start().unwrap();
        let err = mgr.add_sensor(
            "color",
            Box::new(SimColorSensor::new()),
            Duration::from_millis(10),
        );
        assert!(matches!(
            err,
            Err(LifecycleError::SealedConfiguration { .. })
        ));
        mgr.stop().unwrap();
        mgr.join().unwrap();
    }

    /// 两个传感器各产出一条读数，在一个节拍内都出现在出站队列，各恰好一次
    #[test]
    fn test_two_sensors_one_reading_each() {
        let (mut mgr, _in_q, out_q) = manager_pair(32);
        let cadence = Duration::from_millis(300);
        mgr.add_sensor("distance", Box::new(SimDistanceSensor::new()), cadence)
            .unwrap();
        mgr.add_sensor("color", Box::new(SimColorSensor::new()), cadence)
            .unwrap();

        mgr.start().unwrap();
        // 首轮采集在启动后立即发生；远短于一个节拍的窗口内停止
        std::thread::sleep(Duration::from_millis(120));
        mgr.stop().unwrap();
        mgr.join().unwrap();

        let mut distance = 0;
        let mut color = 0;
        while let Some(msg) = out_q.pop() {
            if let Payload::SensorReading(_) = msg.payload {
                match msg.source_id.as_str() {
                    "distance" => distance += 1,
                    "color" => color += 1,
                    other => panic!("unexpected source {other}"),
                }
            }
        }
        assert_eq!(distance, 1);
        assert_eq!(color, 1);
    }

    /// Capture 命令按 source_id 路由到颜色传感器
    #[test]
    fn test_capture_command_routed_by_source_id() {
        let (mut mgr, in_q, _out_q) = manager_pair(32);
        let color = SimColorSensor::new();
        let captures = color.captures_handle();
        mgr.add_sensor("color", Box::new(color), Duration::from_millis(5))
            .unwrap();
        mgr.add_sensor(
            "ir",
            Box::new(SimIrSensor::new()),
            Duration::from_millis(5),
        )
        .unwrap();
        mgr.start().unwrap();

        in_q.push(Message::actuator_command("color", 1, CommandAction::Capture))
            .unwrap();
        // 未知传感器的命令被丢弃，不影响其余工作线程
        in_q.push(Message::actuator_command("gyro", 2, CommandAction::Capture))
            .unwrap();

        std::thread::sleep(Duration::from_millis(80));
        mgr.stop().unwrap();
        mgr.join().unwrap();

        assert_eq!(captures.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    /// 驱动失败产生 DriverFault 状态事件，循环继续运行
    #[test]
    fn test_driver_failure_emits_status_event() {
        let in_q = BoundedQueue::new(8);
        let out_q = BoundedQueue::new(64);
        let metrics = Arc::new(CoreMetrics::new());
        let mut mgr = SensorManager::new(
            in_q.clone(),
            out_q.clone(),
            metrics.clone(),
            TimingConfig::default(),
            QueueConfig::default(),
        );
        mgr.add_sensor("distance", Box::new(FaultySensor), Duration::from_millis(10))
            .unwrap();
        mgr.start().unwrap();
        std::thread::sleep(Duration::from_millis(60));
        mgr.stop().unwrap();
        mgr.join().unwrap();

        let mut fault_events = 0;
        while let Some(msg) = out_q.pop() {
            if let Payload::StatusEvent(ev) = &msg.payload {
                assert_eq!(ev.code, StatusCode::DriverFault);
                assert_eq!(msg.source_id.as_str(), "distance");
                fault_events += 1;
            }
        }
        assert!(fault_events >= 1);
        assert!(metrics.snapshot().driver_faults >= 1);
    }

    /// 三个工作线程的完整停机：按注册顺序全部 join，无线程残留
    #[test]
    fn test_shutdown_joins_all_workers_in_order() {
        let (mut mgr, _in_q, _out_q) = manager_pair(32);
        let cadence = Duration::from_millis(5);
        mgr.add_sensor("distance", Box::new(SimDistanceSensor::new()), cadence)
            .unwrap();
        mgr.add_sensor("color", Box::new(SimColorSensor::new()), cadence)
            .unwrap();
        mgr.add_sensor("ir", Box::new(SimIrSensor::new()), cadence)
            .unwrap();

        mgr.start().unwrap();
        for (_, state) in mgr.worker_states() {
            assert_eq!(state, WorkerState::Running);
        }

        mgr.stop().unwrap();
        mgr.join().unwrap();
        for (_, state) in mgr.worker_states() {
            assert_eq!(state, WorkerState::Joined);
        }

        // 终态：重复 join 是 IllegalState
        assert!(matches!(
            mgr.join(),
            Err(LifecycleError::AlreadyJoined { .. })
        ));
    }

    #[test]
    fn test_manager_double_start_is_illegal() {
        let (mut mgr, _in_q, _out_q) = manager_pair(16);
        mgr.add_sensor(
            "distance",
            Box::new(SimDistanceSensor::new()),
            Duration::from_millis(5),
        )
        .unwrap();
        mgr.start().unwrap();
        assert!(matches!(
            mgr.start(),
            Err(LifecycleError::AlreadyStarted { .. })
        ));
        mgr.stop().unwrap();
        mgr.join().unwrap();
    }
}
