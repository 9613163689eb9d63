//! 模拟外设驱动
//!
//! 对应真实硬件驱动的占位实现：接口时延有界，行为可预测，
//! 供 CLI 自测与测试使用。真实机器人在此之外提供寄存器级驱动。

use crate::driver::{DriverError, DriverErrorKind, SensorDriver, StepperDriver};
use parking_lot::Mutex;
use rover_protocol::{CommandAction, SensorValue};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// 模拟距离传感器：距离单调递增
#[derive(Debug, Default)]
pub struct SimDistanceSensor {
    distance_mm: u32,
}

impl SimDistanceSensor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SensorDriver for SimDistanceSensor {
    fn acquire(&mut self) -> Result<SensorValue, DriverError> {
        self.distance_mm += 10;
        Ok(SensorValue::Distance {
            distance_mm: self.distance_mm,
        })
    }
}

/// 模拟颜色传感器：在 1-5 间循环
///
/// `Capture` 命令使颜色循环复位并计数，测试可通过
/// [`captures_handle`](Self::captures_handle) 观察命令是否路由到位。
#[derive(Debug)]
pub struct SimColorSensor {
    color: u8,
    captures: Arc<AtomicUsize>,
}

impl SimColorSensor {
    pub fn new() -> Self {
        Self {
            color: 0,
            captures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 已收到的采集请求计数句柄
    pub fn captures_handle(&self) -> Arc<AtomicUsize> {
        self.captures.clone()
    }
}

impl Default for SimColorSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorDriver for SimColorSensor {
    fn acquire(&mut self) -> Result<SensorValue, DriverError> {
        self.color = if self.color >= 5 { 1 } else { self.color + 1 };
        Ok(SensorValue::Color { color: self.color })
    }

    fn handle_command(&mut self, command: &CommandAction) -> Result<(), DriverError> {
        match command {
            CommandAction::Capture => {
                self.color = 0;
                self.captures.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            other => Err(DriverError::new(
                DriverErrorKind::Unsupported,
                format!("color sensor cannot execute {other:?}"),
            )),
        }
    }
}

/// 模拟红外循线传感器：左右交替触发
#[derive(Debug, Default)]
pub struct SimIrSensor {
    tick: u64,
}

impl SimIrSensor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SensorDriver for SimIrSensor {
    fn acquire(&mut self) -> Result<SensorValue, DriverError> {
        self.tick += 1;
        Ok(SensorValue::Ir {
            ir_left: self.tick % 2 == 0,
            ir_right: self.tick % 2 == 1,
        })
    }
}

/// 模拟步进电机
///
/// 记录每次成功应用的 `(position, velocity)`，可注入执行时延
/// （模拟慢速运动）或固定故障（模拟堵转）。
#[derive(Debug)]
pub struct SimStepper {
    applied: Arc<Mutex<Vec<(i32, u32)>>>,
    latency: Duration,
    fail: bool,
}

impl SimStepper {
    pub fn new() -> Self {
        Self {
            applied: Arc::new(Mutex::new(Vec::new())),
            latency: Duration::ZERO,
            fail: false,
        }
    }

    /// 每次 `apply` 前模拟的执行时延
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// 令所有 `apply` 以硬件故障失败
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// 已应用命令日志的句柄
    pub fn applied_handle(&self) -> Arc<Mutex<Vec<(i32, u32)>>> {
        self.applied.clone()
    }
}

impl Default for SimStepper {
    fn default() -> Self {
        Self::new()
    }
}

impl StepperDriver for SimStepper {
    fn apply(&mut self, position: i32, velocity: u32) -> Result<(), DriverError> {
        if !self.latency.is_zero() {
            spin_sleep::sleep(self.latency);
        }
        if self.fail {
            return Err(DriverError::new(
                DriverErrorKind::Fault,
                "stepper stalled (simulated)",
            ));
        }
        self.applied.lock().push((position, velocity));
        Ok(())
    }

    fn halt(&mut self) -> Result<(), DriverError> {
        if self.fail {
            return Err(DriverError::new(
                DriverErrorKind::Fault,
                "stepper stalled (simulated)",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_distance_ramps() {
        let mut s = SimDistanceSensor::new();
        assert_eq!(
            s.acquire().unwrap(),
            SensorValue::Distance { distance_mm: 10 }
        );
        assert_eq!(
            s.acquire().unwrap(),
            SensorValue::Distance { distance_mm: 20 }
        );
    }

    #[test]
    fn test_sim_color_cycles_one_to_five() {
        let mut s = SimColorSensor::new();
        let colors: Vec<u8> = (0..7)
            .map(|_| match s.acquire().unwrap() {
                SensorValue::Color { color } => color,
                other => panic!("unexpected value {other:?}"),
            })
            .collect();
        assert_eq!(colors, vec![1, 2, 3, 4, 5, 1, 2]);
    }

    #[test]
    fn test_sim_color_capture_resets_and_counts() {
        let mut s = SimColorSensor::new();
        let captures = s.captures_handle();
        s.acquire().unwrap();
        s.acquire().unwrap();
        s.handle_command(&CommandAction::Capture).unwrap();
        assert_eq!(captures.load(Ordering::SeqCst), 1);
        assert_eq!(s.acquire().unwrap(), SensorValue::Color { color: 1 });
    }

    #[test]
    fn test_sim_stepper_records_applied_commands() {
        let mut s = SimStepper::new();
        let applied = s.applied_handle();
        s.apply(100, 50).unwrap();
        s.apply(-20, 10).unwrap();
        assert_eq!(*applied.lock(), vec![(100, 50), (-20, 10)]);
    }

    #[test]
    fn test_sim_stepper_failing_reports_fault() {
        let mut s = SimStepper::new().failing();
        let err = s.apply(1, 1).unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Fault);
    }
}
