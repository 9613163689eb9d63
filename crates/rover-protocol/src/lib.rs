//! # Rover Protocol
//!
//! 机器人控制器的消息模型与串口帧协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `message`: 消息模型（传感器读数、执行器命令、状态事件、确认）
//! - `wire`: 长度前缀帧编解码
//! - `clock`: 进程单调时间戳
//!
//! ## 帧格式
//!
//! 外部链路上的每一帧为 `[4 字节小端长度][length 字节 JSON 负载]`，
//! JSON 负载自描述（字段名齐全），接收方可以在分发前校验结构。

pub mod clock;
pub mod message;
pub mod wire;

// 重新导出常用类型
pub use message::{
    Ack, ActuatorCommand, CommandAction, Message, Payload, Position, SensorReading, SensorValue,
    Severity, SourceId, StatusCode, StatusEvent,
};
pub use wire::{FrameDecoder, LENGTH_PREFIX_BYTES, MAX_FRAME_LEN, encode_frame};

use thiserror::Error;

/// 协议层统一错误类型
///
/// 编解码失败都是**本地可恢复**的：调用方丢弃当前帧并记录一条
/// 状态事件，解码器保持可用（见 [`wire::FrameDecoder`]）。
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// JSON 负载解析/序列化失败
    #[error("JSON payload error: {0}")]
    Json(#[from] serde_json::Error),

    /// 流关闭时残留不完整帧
    #[error("truncated frame: declared {declared} bytes, only {available} available")]
    Truncated { declared: usize, available: usize },

    /// 长度前缀超出上限（疑似失步或恶意输入）
    #[error("oversized frame: declared {declared} bytes exceeds limit {max}")]
    Oversized { declared: usize, max: usize },

    /// 长度前缀为 0
    #[error("empty frame")]
    EmptyFrame,
}
