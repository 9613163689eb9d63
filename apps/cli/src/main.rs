//! # Rover CLI
//!
//! 机器人控制器命令行运行器。
//!
//! ```bash
//! # 监听 TCP，等上位机连接后整机运行
//! rover-cli run --listen 0.0.0.0:9000
//!
//! # 主动连上位机
//! rover-cli run --connect 192.168.2.1:9000
//!
//! # 无上位机冒烟测试：回环链路 + 模拟驱动，跑 5 秒后打印指标
//! rover-cli run --loopback --duration 5
//! ```

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rover_core::link::{Link, LoopbackLink, TcpLink};
use rover_core::sim::{SimColorSensor, SimDistanceSensor, SimIrSensor, SimStepper};
use rover_core::{Controller, ControllerBuilder, QueueConfig, TimingConfig};
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

/// Rover CLI - 机器人控制器运行器
#[derive(Parser, Debug)]
#[command(name = "rover-cli")]
#[command(about = "Run the rover controller against a telemetry link", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 启动控制器并运行到 Ctrl-C 或 --duration 到期
    Run {
        /// 监听地址，等待上位机接入（如 0.0.0.0:9000）
        #[arg(long, conflicts_with_all = ["connect", "loopback"])]
        listen: Option<String>,

        /// 上位机地址，主动连接（如 192.168.2.1:9000）
        #[arg(long, conflicts_with_all = ["listen", "loopback"])]
        connect: Option<String>,

        /// 回环链路（无上位机，用于冒烟测试）
        #[arg(long)]
        loopback: bool,

        /// 运行时长（秒）；缺省则运行到 Ctrl-C
        #[arg(long)]
        duration: Option<u64>,

        /// 传感器采集节拍（毫秒）
        #[arg(long, default_value_t = 50)]
        cadence_ms: u64,

        /// 传输队列容量
        #[arg(long, default_value_t = 100)]
        capacity: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rover_cli=info".parse()?)
                .add_directive("rover_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            listen,
            connect,
            loopback,
            duration,
            cadence_ms,
            capacity,
        } => run(listen, connect, loopback, duration, cadence_ms, capacity),
    }
}

fn open_link(
    listen: Option<String>,
    connect: Option<String>,
    loopback: bool,
) -> Result<Box<dyn Link>> {
    if let Some(addr) = listen {
        let listener =
            TcpListener::bind(&addr).with_context(|| format!("failed to bind {addr}"))?;
        info!(%addr, "waiting for host connection");
        let (stream, peer) = listener.accept().context("accept failed")?;
        info!(%peer, "host connected");
        return Ok(Box::new(TcpLink::from_stream(
            stream,
            TcpLink::DEFAULT_READ_TIMEOUT,
        )?));
    }
    if let Some(addr) = connect {
        info!(%addr, "connecting to host");
        let link = TcpLink::connect(&addr).with_context(|| format!("failed to connect {addr}"))?;
        return Ok(Box::new(link));
    }
    if loopback {
        // 对端由后台线程持续排空，控制器侧链路释放后线程随之退出
        let (link, mut peer) = LoopbackLink::pair();
        std::thread::Builder::new()
            .name("loopback-drain".to_string())
            .spawn(move || {
                let mut buf = [0u8; 1024];
                loop {
                    match peer.read(&mut buf) {
                        Ok(_) | Err(rover_core::link::LinkError::Timeout) => {},
                        Err(_) => break,
                    }
                }
            })
            .context("failed to spawn loopback drain thread")?;
        return Ok(Box::new(link));
    }
    bail!("one of --listen, --connect or --loopback is required");
}

fn run(
    listen: Option<String>,
    connect: Option<String>,
    loopback: bool,
    duration: Option<u64>,
    cadence_ms: u64,
    capacity: usize,
) -> Result<()> {
    let link = open_link(listen, connect, loopback)?;

    let mut controller = ControllerBuilder::new()
        .queue_config(QueueConfig {
            transport_capacity: capacity,
            ..QueueConfig::default()
        })
        .timing(TimingConfig {
            poll_interval: Duration::from_millis(1),
            default_cadence: Duration::from_millis(cadence_ms),
        })
        .with_sensor("distance", Box::new(SimDistanceSensor::new()))
        .with_sensor("color", Box::new(SimColorSensor::new()))
        .with_sensor("ir", Box::new(SimIrSensor::new()))
        .with_stepper("stepper", Box::new(SimStepper::new()))
        .with_link(link)
        .build()
        .context("failed to build controller")?;

    controller.start().context("failed to start controller")?;
    info!(sensors = controller.sensor_count(), "controller running");

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::Release);
        })
        .context("failed to install Ctrl-C handler")?;
    }

    match duration {
        Some(secs) => {
            let deadline = std::time::Instant::now() + Duration::from_secs(secs);
            while std::time::Instant::now() < deadline && !interrupted.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(50));
            }
        },
        None => {
            info!("press Ctrl-C to stop");
            while !interrupted.load(Ordering::Acquire) {
                std::thread::sleep(Duration::from_millis(50));
            }
        },
    }

    info!("shutting down");
    controller.shutdown().context("shutdown failed")?;
    report(&controller);
    Ok(())
}

fn report(controller: &Controller) {
    let m = controller.metrics();
    let state = controller.actuator_state();
    println!("--- run summary ---");
    println!("readings emitted:    {}", m.readings_emitted);
    println!("readings dropped:    {}", m.readings_dropped);
    println!("commands applied:    {}", m.commands_applied);
    println!("commands discarded:  {}", m.commands_discarded);
    println!("commands superseded: {}", m.commands_superseded);
    println!("frames sent:         {}", m.frames_sent);
    println!("frames received:     {}", m.frames_received);
    println!("parse failures:      {}", m.parse_failures);
    println!("driver faults:       {}", m.driver_faults);
    println!("link faults:         {}", m.link_faults);
    println!(
        "actuator: seq={} position={} velocity={} halted={}",
        state.last_seq, state.position, state.velocity, state.halted
    );
    for event in controller.drain_local_events() {
        println!("local event: {:?}", event.payload);
    }
}
