//! 消息模型定义
//!
//! `Message` 是工作线程、管理器与外部链路之间交换的唯一数据单元：
//! 构造后不可变，推入队列即完整转移所有权（生产者不保留可变别名）。
//!
//! ## 线上表示
//!
//! 消息序列化为自描述 JSON，`kind` 为判别字段：
//!
//! ```json
//! {"kind":"sensor_reading","source_id":"color","timestamp_us":1234,
//!  "value":{"sensor":"color","color":4}}
//! ```

use crate::clock::monotonic_us;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 外设标识
///
/// 每个外设实例（传感器/执行器）一个稳定键，如 `"distance"`、`"color"`、
/// `"stepper"`。入站命令按此字段路由到对应的工作线程。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        SourceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        SourceId(id.to_string())
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        SourceId(id)
    }
}

/// 传感器采样值
///
/// 外设集合按机器人构型固定，建模为封闭变体集而非开放继承：
/// 按 `sensor` 标签分发。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sensor", rename_all = "snake_case")]
pub enum SensorValue {
    /// 距离传感器（毫米）
    Distance { distance_mm: u32 },
    /// 颜色传感器，1-5 对应五种地面颜色
    Color { color: u8 },
    /// 左右红外循线传感器
    Ir { ir_left: bool, ir_right: bool },
}

/// 执行器/传感器命令动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CommandAction {
    /// 步进电机运动：目标位置（步数）+ 速度（步/秒）
    Move { position: i32, velocity: u32 },
    /// 立即停止运动
    Halt,
    /// 请求传感器采集一次（按 `source_id` 路由到对应传感器）
    Capture,
}

/// 机器人平面位置（遥测字段 `posx`/`posy`）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub posx: i32,
    pub posy: i32,
}

/// 状态事件级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// 状态事件分类码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    /// 运动命令执行完成
    MotionComplete,
    /// 外设驱动调用失败（工作线程继续运行）
    DriverFault,
    /// 入站帧解析失败（本地记录，不回传）
    ParseError,
    /// 外部链路读写故障
    LinkFault,
}

/// 传感器读数负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub value: SensorValue,
}

/// 执行器命令负载
///
/// `seq` 保证幂等：工作线程丢弃序号不严格递增的命令，
/// 防止停止/重启后的重复投递被二次执行。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorCommand {
    pub seq: u64,
    pub command: CommandAction,
}

/// 状态事件负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub severity: Severity,
    pub code: StatusCode,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub position: Option<Position>,
}

/// 确认负载
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub seq: u64,
}

/// 消息负载（`kind` 判别）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    SensorReading(SensorReading),
    ActuatorCommand(ActuatorCommand),
    StatusEvent(StatusEvent),
    Ack(Ack),
}

/// 工作线程间交换的不可变消息
///
/// `timestamp_us` 在构造时采集一次（单调时钟），此后不再变化。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub source_id: SourceId,
    pub timestamp_us: u64,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Message {
    fn new(source_id: SourceId, payload: Payload) -> Self {
        Self {
            source_id,
            timestamp_us: monotonic_us(),
            payload,
        }
    }

    /// 构造传感器读数消息
    pub fn sensor_reading(source_id: impl Into<SourceId>, value: SensorValue) -> Self {
        Self::new(
            source_id.into(),
            Payload::SensorReading(SensorReading { value }),
        )
    }

    /// 构造执行器命令消息
    pub fn actuator_command(
        source_id: impl Into<SourceId>,
        seq: u64,
        command: CommandAction,
    ) -> Self {
        Self::new(
            source_id.into(),
            Payload::ActuatorCommand(ActuatorCommand { seq, command }),
        )
    }

    /// 构造状态事件消息
    pub fn status_event(
        source_id: impl Into<SourceId>,
        severity: Severity,
        code: StatusCode,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(
            source_id.into(),
            Payload::StatusEvent(StatusEvent {
                severity,
                code,
                detail: detail.into(),
                position: None,
            }),
        )
    }

    /// 构造确认消息
    pub fn ack(source_id: impl Into<SourceId>, seq: u64) -> Self {
        Self::new(source_id.into(), Payload::Ack(Ack { seq }))
    }

    /// 消息种类名（用于日志）
    pub fn kind_name(&self) -> &'static str {
        match self.payload {
            Payload::SensorReading(_) => "sensor_reading",
            Payload::ActuatorCommand(_) => "actuator_command",
            Payload::StatusEvent(_) => "status_event",
            Payload::Ack(_) => "ack",
        }
    }

    /// 是否为执行器/传感器命令
    pub fn is_command(&self) -> bool {
        matches!(self.payload, Payload::ActuatorCommand(_))
    }
}
