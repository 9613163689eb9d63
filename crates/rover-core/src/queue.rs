//! 有界消息队列
//!
//! 管理器之间唯一的共享状态。固定容量，多生产者/多消费者，
//! push/pop 永不阻塞：满/空都以显式结果返回，由调用方决定
//! 丢弃、重试还是记录。
//!
//! 底层复用 `crossbeam-channel` 的有界通道：同一缓冲区的句柄
//! 可克隆分发给各线程，成功的 push 对随后 pop 到该条目的消费者
//! 建立 happens-before。

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};

/// push 被拒绝：队列已满，条目原样归还调用方
///
/// 这是预期中的稳态结果，不是错误——传感器流按 `DropNewest`
/// 丢弃，命令流按 `Supersede` 顶替（见 [`OverflowPolicy`]）。
#[derive(Debug)]
pub struct QueueFull<T>(pub T);

impl<T> QueueFull<T> {
    /// 取回被拒绝的条目
    pub fn into_inner(self) -> T {
        self.0
    }
}

/// 队列满时的背压策略
///
/// 按队列显式选择：传感器读数重在新鲜度，命令流重在最新意图。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// 丢弃推不进去的新条目（传感器读数默认）
    #[default]
    DropNewest,
    /// 新条目顶替待重试的旧条目，最后命令胜出（执行器命令）
    Supersede,
}

/// [`BoundedQueue::push_with`] 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// 条目已入队
    Accepted,
    /// 队列满，新条目被丢弃（`DropNewest`）
    DroppedNewest,
    /// 队列满，最旧一条被挤出为新条目腾位（`Supersede`）
    SupersededOldest,
}

/// 固定容量、非阻塞的 MPMC 队列
///
/// `Clone` 产生指向同一缓冲区的新句柄；容量在构造时固定，不可调整。
#[derive(Debug, Clone)]
pub struct BoundedQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// 创建容量为 `capacity` 的队列
    ///
    /// # Panics
    ///
    /// 容量为 0 时 panic（零容量通道只会 rendezvous，违反非阻塞契约）。
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedQueue capacity must be non-zero");
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// 非阻塞入队
    ///
    /// 满时返回 `Err(QueueFull)`，条目归还，队列内容不变。
    pub fn push(&self, item: T) -> Result<(), QueueFull<T>> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) => Err(QueueFull(item)),
            // 本句柄同时持有接收端，Disconnected 不可达
            Err(TrySendError::Disconnected(item)) => Err(QueueFull(item)),
        }
    }

    /// 非阻塞出队，空时返回 `None`
    pub fn pop(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }

    /// 按背压策略入队
    ///
    /// - `DropNewest`: 满则丢弃 `item`（等价 [`push`](Self::push) 失败后放弃）
    /// - `Supersede`: 满则弹出最旧一条腾位后重试；并发竞争下仍满则丢弃
    pub fn push_with(&self, item: T, policy: OverflowPolicy) -> PushOutcome {
        match self.push(item) {
            Ok(()) => PushOutcome::Accepted,
            Err(QueueFull(item)) => match policy {
                OverflowPolicy::DropNewest => PushOutcome::DroppedNewest,
                OverflowPolicy::Supersede => {
                    let _ = self.pop();
                    match self.push(item) {
                        Ok(()) => PushOutcome::SupersededOldest,
                        Err(_) => PushOutcome::DroppedNewest,
                    }
                },
            },
        }
    }

    /// 当前排队条目数（并发下仅供观测）
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// 构造时固定的容量
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
