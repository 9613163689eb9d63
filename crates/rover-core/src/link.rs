//! 外部链路抽象
//!
//! 通信管理器只通过 [`Link`] 看到一个双工字节流，串口/网口的
//! 字节级实现细节在此之外。`read` 带短超时返回 `Timeout`，
//! 保证通信循环的停机检查不被空闲链路拖住（与 CAN 适配层的
//! 接收超时同一思路）。

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;

/// 链路层统一错误类型
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    /// 超时窗口内无数据，正常情况
    #[error("Read timeout")]
    Timeout,
    /// 对端关闭
    #[error("Link closed by peer")]
    Closed,
}

/// 字节双工链路
pub trait Link: Send {
    /// 整块写出（帧由调用方组好）
    fn write_all(&mut self, buf: &[u8]) -> Result<(), LinkError>;

    /// 读取可用字节；空闲超时返回 [`LinkError::Timeout`]，
    /// 对端关闭返回 [`LinkError::Closed`]
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError>;
}

/// TCP 链路（开发/联调用；真实机器人替换为串口实现）
#[derive(Debug)]
pub struct TcpLink {
    stream: TcpStream,
}

impl TcpLink {
    /// 默认读超时，决定通信循环空闲时的轮询粒度
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(2);

    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, LinkError> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream, Self::DEFAULT_READ_TIMEOUT)
    }

    /// 从既有连接构造（如 accept 得到的流）
    pub fn from_stream(stream: TcpStream, read_timeout: Duration) -> Result<Self, LinkError> {
        stream.set_read_timeout(Some(read_timeout))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }
}

impl Link for TcpLink {
    fn write_all(&mut self, buf: &[u8]) -> Result<(), LinkError> {
        self.stream.write_all(buf)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        match self.stream.read(buf) {
            Ok(0) => Err(LinkError::Closed),
            Ok(n) => Ok(n),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Err(LinkError::Timeout)
            },
            Err(e) => Err(e.into()),
        }
    }
}

/// 进程内回环链路
///
/// `pair()` 返回互为对端的两个端点，底层为 crossbeam 无界通道，
/// 用于测试与 `--loopback` 自测模式。
#[derive(Debug)]
pub struct LoopbackLink {
    tx: crossbeam_channel::Sender<Vec<u8>>,
    rx: crossbeam_channel::Receiver<Vec<u8>>,
    /// 上一块未读完的残留字节
    pending: Vec<u8>,
    read_timeout: Duration,
}

impl LoopbackLink {
    /// 创建一对互联端点
    pub fn pair() -> (LoopbackLink, LoopbackLink) {
        let (a_tx, a_rx) = crossbeam_channel::unbounded();
        let (b_tx, b_rx) = crossbeam_channel::unbounded();
        (
            LoopbackLink {
                tx: a_tx,
                rx: b_rx,
                pending: Vec::new(),
                read_timeout: TcpLink::DEFAULT_READ_TIMEOUT,
            },
            LoopbackLink {
                tx: b_tx,
                rx: a_rx,
                pending: Vec::new(),
                read_timeout: TcpLink::DEFAULT_READ_TIMEOUT,
            },
        )
    }

    fn fill(&mut self, buf: &mut [u8]) -> usize {
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        n
    }
}

impl Link for LoopbackLink {
    fn write_all(&mut self, buf: &[u8]) -> Result<(), LinkError> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| LinkError::Closed)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        if !self.pending.is_empty() {
            return Ok(self.fill(buf));
        }
        match self.rx.recv_timeout(self.read_timeout) {
            Ok(chunk) => {
                self.pending = chunk;
                Ok(self.fill(buf))
            },
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(LinkError::Timeout),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(LinkError::Closed),
        }
    }
}
