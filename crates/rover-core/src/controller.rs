//! 顶层编排器
//!
//! 四条传输队列在这里显式构造（不存在进程级队列单例），以克隆
//! 句柄接线给各管理器；编排器独占所有管理器，按依赖顺序启动：
//! 传感器 -> 步进电机 -> 通信，停止与 join 按相反顺序执行，
//! 保证没有任何工作线程被遗弃。

use crate::comm::{CommManager, CommQueues};
use crate::config::{QueueConfig, TimingConfig};
use crate::driver::{SensorDriver, StepperDriver};
use crate::error::LifecycleError;
use crate::link::Link;
use crate::metrics::{CoreMetrics, MetricsSnapshot};
use crate::queue::BoundedQueue;
use crate::sensor::SensorManager;
use crate::state::{ActuatorState, SharedActuatorState};
use crate::stepper::StepperManager;
use crate::worker::WorkerState;
use rover_protocol::{Message, SourceId};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// 构建期错误
#[derive(Error, Debug)]
pub enum BuildError {
    /// 未配置外部链路
    #[error("no link configured; call with_link() before build()")]
    MissingLink,

    /// 未配置步进电机驱动
    #[error("no stepper driver configured; call with_stepper() before build()")]
    MissingStepper,

    /// 传感器注册失败（如重复 `source_id`）
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

struct SensorSpec {
    id: SourceId,
    driver: Box<dyn SensorDriver>,
    cadence: Option<Duration>,
}

/// 控制器 Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use rover_core::controller::ControllerBuilder;
/// use rover_core::link::LoopbackLink;
/// use rover_core::sim::{SimDistanceSensor, SimStepper};
///
/// let (link, _peer) = LoopbackLink::pair();
/// let mut controller = ControllerBuilder::new()
///     .with_sensor("distance", Box::new(SimDistanceSensor::new()))
///     .with_stepper("stepper", Box::new(SimStepper::new()))
///     .with_link(Box::new(link))
///     .build()
///     .unwrap();
/// controller.start().unwrap();
/// ```
pub struct ControllerBuilder {
    queue_config: QueueConfig,
    timing: TimingConfig,
    sensors: Vec<SensorSpec>,
    stepper: Option<(SourceId, Box<dyn StepperDriver>)>,
    link: Option<Box<dyn Link>>,
}

impl ControllerBuilder {
    pub fn new() -> Self {
        Self {
            queue_config: QueueConfig::default(),
            timing: TimingConfig::default(),
            sensors: Vec::new(),
            stepper: None,
            link: None,
        }
    }

    /// 覆盖队列容量配置
    pub fn queue_config(mut self, config: QueueConfig) -> Self {
        self.queue_config = config;
        self
    }

    /// 覆盖循环节拍配置
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// 注册传感器（默认节拍）
    pub fn with_sensor(self, id: impl Into<SourceId>, driver: Box<dyn SensorDriver>) -> Self {
        self.with_sensor_at(id, driver, None)
    }

    /// 注册传感器并指定采集节拍
    pub fn with_sensor_cadence(
        self,
        id: impl Into<SourceId>,
        driver: Box<dyn SensorDriver>,
        cadence: Duration,
    ) -> Self {
        self.with_sensor_at(id, driver, Some(cadence))
    }

    fn with_sensor_at(
        mut self,
        id: impl Into<SourceId>,
        driver: Box<dyn SensorDriver>,
        cadence: Option<Duration>,
    ) -> Self {
        self.sensors.push(SensorSpec {
            id: id.into(),
            driver,
            cadence,
        });
        self
    }

    /// 配置步进电机
    pub fn with_stepper(mut self, id: impl Into<SourceId>, driver: Box<dyn StepperDriver>) -> Self {
        self.stepper = Some((id.into(), driver));
        self
    }

    /// 配置外部链路
    pub fn with_link(mut self, link: Box<dyn Link>) -> Self {
        self.link = Some(link);
        self
    }

    /// 构造控制器：建队列、接线、注册传感器（不启动任何线程）
    pub fn build(self) -> Result<Controller, BuildError> {
        let link = self.link.ok_or(BuildError::MissingLink)?;
        let (actuator_id, stepper_driver) = self.stepper.ok_or(BuildError::MissingStepper)?;

        let metrics = Arc::new(CoreMetrics::new());
        let cap = self.queue_config.transport_capacity;

        // 四条传输队列，编排器独占构造
        let com_to_sensor = BoundedQueue::new(cap);
        let sensor_to_com = BoundedQueue::new(cap);
        let com_to_stepper = BoundedQueue::new(cap);
        let stepper_to_com = BoundedQueue::new(cap);

        let mut sensors = SensorManager::new(
            com_to_sensor.clone(),
            sensor_to_com.clone(),
            metrics.clone(),
            self.timing.clone(),
            self.queue_config.clone(),
        );
        for spec in self.sensors {
            let cadence = spec.cadence.unwrap_or(self.timing.default_cadence);
            sensors.add_sensor(spec.id, spec.driver, cadence)?;
        }

        let stepper = StepperManager::new(
            actuator_id.clone(),
            stepper_driver,
            com_to_stepper.clone(),
            stepper_to_com.clone(),
            metrics.clone(),
            self.timing.clone(),
            self.queue_config.worker_capacity,
        );
        let actuator_state = stepper.actuator_state();

        let comm = CommManager::new(
            link,
            CommQueues {
                sensor_out: sensor_to_com,
                stepper_out: stepper_to_com,
                sensor_in: com_to_sensor,
                stepper_in: com_to_stepper,
            },
            actuator_id,
            metrics.clone(),
            self.timing.clone(),
        );

        Ok(Controller {
            sensors,
            stepper,
            comm,
            metrics,
            actuator_state,
        })
    }
}

impl Default for ControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 机器人控制器（对外 API）
///
/// 进程生命周期内独占全部管理器与队列。
pub struct Controller {
    sensors: SensorManager,
    stepper: StepperManager,
    comm: CommManager,
    metrics: Arc<CoreMetrics>,
    actuator_state: SharedActuatorState,
}

impl Controller {
    /// 按依赖顺序启动全部管理器
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        self.sensors.start()?;
        self.stepper.start()?;
        self.comm.start()?;
        info!(sensors = self.sensors.sensor_count(), "controller started");
        Ok(())
    }

    /// 按相反顺序请求停止（异步，只翻转标志）
    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        self.comm.stop()?;
        self.stepper.stop()?;
        self.sensors.stop()
    }

    /// 等待全部工作线程退出（与 stop 同序）
    pub fn join(&mut self) -> Result<(), LifecycleError> {
        self.comm.join()?;
        self.stepper.join()?;
        self.sensors.join()?;
        info!("controller joined");
        Ok(())
    }

    /// stop + join 便捷封装
    pub fn shutdown(&mut self) -> Result<(), LifecycleError> {
        self.stop()?;
        self.join()
    }

    /// 运行给定时长后完整停机
    pub fn run_for(&mut self, duration: Duration) -> Result<(), LifecycleError> {
        std::thread::sleep(duration);
        self.shutdown()
    }

    /// 已注册的传感器数量
    pub fn sensor_count(&self) -> usize {
        self.sensors.sensor_count()
    }

    /// 当前指标快照
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 执行器最新状态快照
    pub fn actuator_state(&self) -> Arc<ActuatorState> {
        self.actuator_state.load_full()
    }

    /// 取走通信管理器累积的本地状态事件
    pub fn drain_local_events(&self) -> Vec<Message> {
        self.comm.drain_local_events()
    }

    /// 诊断：全部工作线程状态（传感器、步进电机、通信）
    pub fn worker_states(&self) -> Vec<(String, WorkerState)> {
        let mut states = self.sensors.worker_states();
        states.extend(self.stepper.worker_states());
        states.extend(self.comm.worker_states());
        states
    }
}
