//! 通信管理器
//!
//! 唯一接触外部链路的组件：出站方向把传感器/步进电机两条出站
//! 队列的消息编码成长度前缀帧写出（轮转取数，每轮各最多一条，
//! 防止任一数据流饿死）；入站方向把字节流增量解码为消息，按
//! `kind` + `source_id` 路由到对应管理器的入站队列。
//!
//! 除路由与编解码外不含任何领域逻辑。解析失败在本地丢帧并记录
//! 一条 `ParseError` 状态事件（不回传、不致崩溃）。

use crate::config::TimingConfig;
use crate::error::LifecycleError;
use crate::link::{Link, LinkError};
use crate::metrics::CoreMetrics;
use crate::queue::BoundedQueue;
use crate::worker::{WorkerHandle, WorkerState};
use parking_lot::Mutex;
use rover_protocol::{
    FrameDecoder, Message, Severity, SourceId, StatusCode, encode_frame,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, trace, warn};

const MANAGER_NAME: &str = "comm-manager";

/// 本地状态事件的 `source_id`
const LOCAL_SOURCE: &str = "comm";

/// 通信管理器的四条队列接线
#[derive(Clone)]
pub struct CommQueues {
    /// 传感器 -> 链路
    pub sensor_out: BoundedQueue<Message>,
    /// 步进电机 -> 链路
    pub stepper_out: BoundedQueue<Message>,
    /// 链路 -> 传感器管理器
    pub sensor_in: BoundedQueue<Message>,
    /// 链路 -> 步进电机管理器
    pub stepper_in: BoundedQueue<Message>,
}

/// 外部链路桥接管理器（单线程）
pub struct CommManager {
    link: Option<Box<dyn Link>>,
    queues: CommQueues,
    actuator_id: SourceId,
    /// 本地记录的状态事件（解析失败等，不回传链路）
    local_events: Arc<Mutex<Vec<Message>>>,
    metrics: Arc<CoreMetrics>,
    timing: TimingConfig,
    worker: WorkerHandle,
    started: bool,
}

impl CommManager {
    pub fn new(
        link: Box<dyn Link>,
        queues: CommQueues,
        actuator_id: impl Into<SourceId>,
        metrics: Arc<CoreMetrics>,
        timing: TimingConfig,
    ) -> Self {
        Self {
            link: Some(link),
            queues,
            actuator_id: actuator_id.into(),
            local_events: Arc::new(Mutex::new(Vec::new())),
            metrics,
            timing,
            worker: WorkerHandle::new(MANAGER_NAME),
            started: false,
        }
    }

    /// 取走目前累积的本地状态事件
    pub fn drain_local_events(&self) -> Vec<Message> {
        std::mem::take(&mut *self.local_events.lock())
    }

    /// 诊断：通信线程状态
    pub fn worker_states(&self) -> Vec<(String, WorkerState)> {
        vec![(self.worker.name().to_string(), self.worker.state())]
    }

    pub fn start(&mut self) -> Result<(), LifecycleError> {
        if self.started {
            return Err(LifecycleError::AlreadyStarted {
                name: MANAGER_NAME.to_string(),
            });
        }
        let link = self.link.take().expect("link present before start");
        let queues = self.queues.clone();
        let actuator_id = self.actuator_id.clone();
        let local_events = self.local_events.clone();
        let metrics = self.metrics.clone();
        let poll = self.timing.poll_interval;
        self.worker.start(move |running| {
            comm_loop(link, queues, actuator_id, local_events, metrics, poll, running);
        })?;
        self.started = true;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        if !self.started {
            return Err(LifecycleError::NotStarted {
                name: MANAGER_NAME.to_string(),
            });
        }
        self.worker.stop()
    }

    pub fn join(&mut self) -> Result<(), LifecycleError> {
        self.worker.join()
    }
}

/// 通信主循环
fn comm_loop(
    mut link: Box<dyn Link>,
    queues: CommQueues,
    actuator_id: SourceId,
    local_events: Arc<Mutex<Vec<Message>>>,
    metrics: Arc<CoreMetrics>,
    poll: std::time::Duration,
    running: Arc<AtomicBool>,
) {
    let mut decoder = FrameDecoder::new();
    let mut read_buf = [0u8; 1024];
    let mut link_closed = false;

    while running.load(Ordering::Acquire) {
        let mut busy = false;

        // ============================================================
        // 出站：轮转取数，两条流每轮各最多一条
        // ============================================================
        for out in [&queues.sensor_out, &queues.stepper_out] {
            let Some(msg) = out.pop() else { continue };
            busy = true;
            // 链路关闭后只排空计数，不再尝试写：本地事件日志必须有界，
            // 不能每条出站消息都追加一条 LinkFault
            if link_closed {
                CoreMetrics::incr(&metrics.link_faults);
                trace!(kind = msg.kind_name(), "link closed, outbound frame dropped");
                continue;
            }
            match encode_frame(&msg) {
                Ok(frame) => match link.write_all(&frame) {
                    Ok(()) => {
                        CoreMetrics::incr(&metrics.frames_sent);
                        trace!(kind = msg.kind_name(), "frame sent");
                    },
                    Err(e) => {
                        CoreMetrics::incr(&metrics.link_faults);
                        warn!(error = %e, "link write failed, frame dropped");
                        record_local(
                            &local_events,
                            StatusCode::LinkFault,
                            format!("write failed: {e}"),
                        );
                        if matches!(e, LinkError::Closed) {
                            link_closed = true;
                        }
                    },
                },
                Err(e) => {
                    // 自产消息序列化失败属于异常路径，仅本地记录
                    CoreMetrics::incr(&metrics.parse_failures);
                    warn!(error = %e, "outbound message failed to encode");
                    record_local(
                        &local_events,
                        StatusCode::ParseError,
                        format!("encode failed: {e}"),
                    );
                },
            }
        }

        // ============================================================
        // 入站：读字节 -> 增量解码 -> 按 kind/source_id 路由
        // ============================================================
        if !link_closed {
            match link.read(&mut read_buf) {
                Ok(n) => {
                    busy = true;
                    decoder.feed(&read_buf[..n]);
                    drain_decoder(
                        &mut decoder,
                        &queues,
                        &actuator_id,
                        &local_events,
                        &metrics,
                    );
                },
                Err(LinkError::Timeout) => {},
                Err(LinkError::Closed) => {
                    info!("link closed by peer");
                    link_closed = true;
                    // 残留的半帧视为解析失败
                    if let Err(e) = decoder.finish() {
                        CoreMetrics::incr(&metrics.parse_failures);
                        warn!(error = %e, "incomplete frame at link close");
                        record_local(&local_events, StatusCode::ParseError, e.to_string());
                    }
                },
                Err(e) => {
                    CoreMetrics::incr(&metrics.link_faults);
                    warn!(error = %e, "link read failed");
                    record_local(
                        &local_events,
                        StatusCode::LinkFault,
                        format!("read failed: {e}"),
                    );
                },
            }
        }

        if !busy {
            spin_sleep::sleep(poll);
        }
    }
    trace!("comm loop exited");
}

/// 把解码器里所有完整帧取出并路由；畸形帧本地记录后继续
fn drain_decoder(
    decoder: &mut FrameDecoder,
    queues: &CommQueues,
    actuator_id: &SourceId,
    local_events: &Arc<Mutex<Vec<Message>>>,
    metrics: &Arc<CoreMetrics>,
) {
    loop {
        match decoder.next_frame() {
            Ok(Some(msg)) => {
                CoreMetrics::incr(&metrics.frames_received);
                route_inbound(msg, queues, actuator_id);
            },
            Ok(None) => break,
            Err(e) => {
                CoreMetrics::incr(&metrics.parse_failures);
                warn!(error = %e, "inbound frame discarded");
                record_local(local_events, StatusCode::ParseError, e.to_string());
            },
        }
    }
}

/// 入站路由：命令按 `source_id` 分流到步进电机或传感器管理器
fn route_inbound(msg: Message, queues: &CommQueues, actuator_id: &SourceId) {
    // 入站只预期命令；其余种类丢弃
    if !msg.is_command() {
        warn!(kind = msg.kind_name(), "unexpected inbound message dropped");
        return;
    }
    let target = if msg.source_id == *actuator_id {
        &queues.stepper_in
    } else {
        &queues.sensor_in
    };
    if target.push(msg).is_err() {
        warn!("inbound queue full, command dropped");
    }
}

fn record_local(local_events: &Arc<Mutex<Vec<Message>>>, code: StatusCode, detail: String) {
    local_events.lock().push(Message::status_event(
        LOCAL_SOURCE,
        Severity::Warning,
        code,
        detail,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LoopbackLink;
    use rover_protocol::{CommandAction, Payload, SensorValue};
    use std::time::Duration;

    fn comm_with_loopback() -> (CommManager, CommQueues, LoopbackLink) {
        let (local, peer) = LoopbackLink::pair();
        let queues = CommQueues {
            sensor_out: BoundedQueue::new(32),
            stepper_out: BoundedQueue::new(32),
            sensor_in: BoundedQueue::new(32),
            stepper_in: BoundedQueue::new(32),
        };
        let mgr = CommManager::new(
            Box::new(local),
            queues.clone(),
            "stepper",
            Arc::new(CoreMetrics::new()),
            TimingConfig::default(),
        );
        (mgr, queues, peer)
    }

    /// 在给定时间预算内从对端收帧
    fn read_frames(peer: &mut LoopbackLink, want: usize, budget: Duration) -> Vec<Message> {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 1024];
        let mut got = Vec::new();
        let deadline = std::time::Instant::now() + budget;
        while got.len() < want && std::time::Instant::now() < deadline {
            match peer.read(&mut buf) {
                Ok(n) => {
                    decoder.feed(&buf[..n]);
                    while let Ok(Some(msg)) = decoder.next_frame() {
                        got.push(msg);
                    }
                },
                Err(LinkError::Timeout) => {},
                Err(e) => panic!("peer read failed: {e}"),
            }
        }
        got
    }

    /// 两条出站流轮转汇聚到链路，各消息恰好出现一次
    #[test]
    fn test_outbound_fan_in_round_robin() {
        let (mut mgr, queues, mut peer) = comm_with_loopback();
        mgr.start().unwrap();

        queues
            .sensor_out
            .push(Message::sensor_reading(
                "distance",
                SensorValue::Distance { distance_mm: 42 },
            ))
            .unwrap();
        queues
            .sensor_out
            .push(Message::sensor_reading(
                "color",
                SensorValue::Color { color: 3 },
            ))
            .unwrap();
        queues
            .stepper_out
            .push(Message::ack("stepper", 1))
            .unwrap();

        let frames = read_frames(&mut peer, 3, Duration::from_millis(500));
        mgr.stop().unwrap();
        mgr.join().unwrap();

        assert_eq!(frames.len(), 3);
        let sources: Vec<&str> = frames.iter().map(|m| m.source_id.as_str()).collect();
        assert!(sources.contains(&"distance"));
        assert!(sources.contains(&"color"));
        assert!(sources.contains(&"stepper"));
    }

    /// 入站命令按 source_id 分流
    #[test]
    fn test_inbound_routing_by_source_id() {
        let (mut mgr, queues, mut peer) = comm_with_loopback();
        mgr.start().unwrap();

        let to_stepper = Message::actuator_command(
            "stepper",
            1,
            CommandAction::Move {
                position: 10,
                velocity: 5,
            },
        );
        let to_color = Message::actuator_command("color", 2, CommandAction::Capture);
        peer.write_all(&encode_frame(&to_stepper).unwrap()).unwrap();
        peer.write_all(&encode_frame(&to_color).unwrap()).unwrap();

        std::thread::sleep(Duration::from_millis(80));
        mgr.stop().unwrap();
        mgr.join().unwrap();

        assert_eq!(queues.stepper_in.pop(), Some(to_stepper));
        assert_eq!(queues.stepper_in.pop(), None);
        assert_eq!(queues.sensor_in.pop(), Some(to_color));
        assert_eq!(queues.sensor_in.pop(), None);
    }

    /// 畸形 JSON 帧：本地记录一条 ParseError，随后的正常帧不受影响
    #[test]
    fn test_malformed_frame_recovers() {
        let (mut mgr, queues, mut peer) = comm_with_loopback();
        mgr.start().unwrap();

        let mut bad = (9u32).to_le_bytes().to_vec();
        bad.extend_from_slice(b"{not json");
        peer.write_all(&bad).unwrap();

        let good = Message::actuator_command("stepper", 1, CommandAction::Halt);
        peer.write_all(&encode_frame(&good).unwrap()).unwrap();

        std::thread::sleep(Duration::from_millis(80));
        mgr.stop().unwrap();
        mgr.join().unwrap();

        assert_eq!(queues.stepper_in.pop(), Some(good));
        let events = mgr.drain_local_events();
        assert_eq!(events.len(), 1);
        match &events[0].payload {
            Payload::StatusEvent(ev) => assert_eq!(ev.code, StatusCode::ParseError),
            other => panic!("expected status event, got {other:?}"),
        }
    }

    /// 前缀声明 5 字节但链路关闭时只到了 3 字节：按解析失败处理，
    /// 不路由任何消息，本地恰好记录一条状态事件
    #[test]
    fn test_truncated_frame_at_link_close() {
        let (mut mgr, queues, mut peer) = comm_with_loopback();
        mgr.start().unwrap();

        let mut partial = (5u32).to_le_bytes().to_vec();
        partial.extend_from_slice(b"abc");
        peer.write_all(&partial).unwrap();
        drop(peer);

        std::thread::sleep(Duration::from_millis(80));
        mgr.stop().unwrap();
        mgr.join().unwrap();

        assert_eq!(queues.sensor_in.pop(), None);
        assert_eq!(queues.stepper_in.pop(), None);
        let events = mgr.drain_local_events();
        assert_eq!(events.len(), 1);
        match &events[0].payload {
            Payload::StatusEvent(ev) => assert_eq!(ev.code, StatusCode::ParseError),
            other => panic!("expected status event, got {other:?}"),
        }
    }

    /// 对端关闭后持续产出的出站消息：队列被排空、按链路故障计数，
    /// 本地事件日志保持有界（不随消息数增长）
    #[test]
    fn test_outbound_after_link_close_keeps_local_events_bounded() {
        let (local, peer) = LoopbackLink::pair();
        let queues = CommQueues {
            sensor_out: BoundedQueue::new(32),
            stepper_out: BoundedQueue::new(32),
            sensor_in: BoundedQueue::new(32),
            stepper_in: BoundedQueue::new(32),
        };
        let metrics = Arc::new(CoreMetrics::new());
        let mut mgr = CommManager::new(
            Box::new(local),
            queues.clone(),
            "stepper",
            metrics.clone(),
            TimingConfig::default(),
        );
        drop(peer);
        mgr.start().unwrap();

        // 传感器视角的稳态：链路死亡后读数仍按节拍产出
        for i in 0..300u32 {
            let _ = queues.sensor_out.push(Message::sensor_reading(
                "distance",
                SensorValue::Distance { distance_mm: i },
            ));
            if i % 50 == 0 {
                std::thread::sleep(Duration::from_millis(10));
            }
        }
        std::thread::sleep(Duration::from_millis(100));
        mgr.stop().unwrap();
        mgr.join().unwrap();

        assert!(queues.sensor_out.is_empty(), "outbound queue not drained");
        // 最多一条 LinkFault（首次写失败时记录），绝不按消息数累积
        let events = mgr.drain_local_events();
        assert!(
            events.len() <= 1,
            "local events grew with message count: {}",
            events.len()
        );
        assert!(metrics.snapshot().link_faults >= 1);
    }

    /// 入站读数等非命令消息被丢弃，不进入任何队列
    #[test]
    fn test_unexpected_inbound_kind_dropped() {
        let (mut mgr, queues, mut peer) = comm_with_loopback();
        mgr.start().unwrap();

        let reading =
            Message::sensor_reading("distance", SensorValue::Distance { distance_mm: 1 });
        peer.write_all(&encode_frame(&reading).unwrap()).unwrap();

        std::thread::sleep(Duration::from_millis(60));
        mgr.stop().unwrap();
        mgr.join().unwrap();

        assert_eq!(queues.sensor_in.pop(), None);
        assert_eq!(queues.stepper_in.pop(), None);
    }
}
