//! # Rover Core
//!
//! 机器人控制器的工作线程/队列编排核心：独立节拍的外设（步进
//! 电机、距离/颜色/红外传感器）各自拥有一个工作线程，核心负责在
//! 它们与外部串行链路之间搬运类型化消息，保证任何外设不因其他
//! 外设阻塞，并保证全体工作线程的干净启动与停机。
//!
//! ## 模块
//!
//! - `queue`: 有界非阻塞 MPMC 队列（线程间唯一共享状态）
//! - `worker`: 工作线程生命周期（Idle/Running/Stopping/Joined）
//! - `driver`: 外设驱动窄接口；`sim`: 模拟驱动
//! - `sensor`: 传感器管理器（聚合出站、命令按 `source_id` 分发）
//! - `stepper`: 步进电机管理器（seq 幂等、单槽待重试、最后命令胜出）
//! - `comm`: 通信管理器（轮转汇聚、长度前缀帧、入站路由）
//! - `controller`: 顶层编排器与 Builder
//!
//! ## 数据流
//!
//! ```text
//! sensors -> SensorManager -> out queue ----\
//!                                            CommManager <-> Link
//! stepper <- StepperManager <- in queue ----/
//! ```

pub mod comm;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod link;
pub mod metrics;
pub mod queue;
pub mod sensor;
pub mod sim;
pub mod state;
pub mod stepper;
pub mod worker;

// 重新导出常用类型
pub use comm::{CommManager, CommQueues};
pub use config::{QueueConfig, TimingConfig};
pub use controller::{BuildError, Controller, ControllerBuilder};
pub use driver::{DriverError, DriverErrorKind, SensorDriver, StepperDriver};
pub use error::LifecycleError;
pub use link::{Link, LinkError, LoopbackLink, TcpLink};
pub use metrics::{CoreMetrics, MetricsSnapshot};
pub use queue::{BoundedQueue, OverflowPolicy, PushOutcome, QueueFull};
pub use sensor::SensorManager;
pub use state::{ActuatorState, SharedActuatorState};
pub use stepper::StepperManager;
pub use worker::{WorkerHandle, WorkerState};
