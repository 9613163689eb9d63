//! 外设驱动接口
//!
//! 真正的寄存器级驱动（距离传感器 I2C 读取、步进电机 GPIO/PWM、
//! 音频 codec 等）在本核心范围之外，这里只定义窄接口：同步调用，
//! 要求有界时延返回，否则会拖慢工作线程的停机检查。
//!
//! 驱动失败以 [`DriverError`] 上抛，工作线程将其包装为状态事件
//! 继续下一轮循环，绝不因单次驱动故障终止。

use rover_protocol::{CommandAction, SensorValue};
use thiserror::Error;

/// 驱动错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    Unknown,
    /// 外设无响应（总线超时等）
    NoResponse,
    /// 外设尚未就绪（上电/校准中）
    NotReady,
    /// 硬件报告的故障（过流、堵转等）
    Fault,
    /// 驱动不支持该命令
    Unsupported,
}

/// 结构化驱动错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub message: String,
}

impl DriverError {
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<String> for DriverError {
    fn from(message: String) -> Self {
        Self::new(DriverErrorKind::Unknown, message)
    }
}

impl From<&str> for DriverError {
    fn from(message: &str) -> Self {
        Self::new(DriverErrorKind::Unknown, message)
    }
}

/// 传感器驱动
///
/// 工作线程按自身节拍调用 `acquire()`，并把路由到本传感器的命令
/// 交给 `handle_command()`（如颜色传感器的采集请求）。
pub trait SensorDriver: Send {
    /// 同步采集一次样本
    fn acquire(&mut self) -> Result<SensorValue, DriverError>;

    /// 处理寻址到本传感器的命令，默认忽略
    fn handle_command(&mut self, _command: &CommandAction) -> Result<(), DriverError> {
        Ok(())
    }
}

/// 步进电机驱动
pub trait StepperDriver: Send {
    /// 执行一次运动命令：目标位置（步数）与速度（步/秒）
    ///
    /// 同步调用，返回即表示运动完成或失败。
    fn apply(&mut self, position: i32, velocity: u32) -> Result<(), DriverError>;

    /// 立即停止当前运动
    fn halt(&mut self) -> Result<(), DriverError>;
}
