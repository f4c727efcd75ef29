//! 控制消息队列
//!
//! 多生产者、单消费者的 FIFO。除阻塞/非阻塞出队外还支持 peek 和 clear，
//! seek 合并需要在出队前查看下一条消息。

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::ControlMessage;

#[derive(Default)]
struct QueueInner {
    messages: VecDeque<ControlMessage>,
    closed: bool,
}

/// 线程安全的控制消息队列
#[derive(Default)]
pub struct CommandQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: ControlMessage) {
        let mut inner = self.inner.lock();
        inner.messages.push_back(message);
        self.available.notify_one();
    }

    /// 阻塞直到有消息；队列被关闭且为空时返回 `None`
    pub fn take(&self) -> Option<ControlMessage> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(message) = inner.messages.pop_front() {
                return Some(message);
            }
            if inner.closed {
                return None;
            }
            self.available.wait(&mut inner);
        }
    }

    pub fn poll(&self) -> Option<ControlMessage> {
        self.inner.lock().messages.pop_front()
    }

    pub fn peek(&self) -> Option<ControlMessage> {
        self.inner.lock().messages.front().copied()
    }

    /// 丢弃队首连续的、目标晚于 `target_us` 的 seek 消息，返回丢弃数量
    pub fn drain_seeks_after(&self, target_us: i64) -> usize {
        let mut inner = self.inner.lock();
        let mut drained = 0;
        while let Some(ControlMessage::Seek(t)) = inner.messages.front() {
            if *t <= target_us {
                break;
            }
            inner.messages.pop_front();
            drained += 1;
        }
        drained
    }

    pub fn clear(&self) {
        self.inner.lock().messages.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 关闭队列并唤醒阻塞的消费者
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.available.notify_all();
    }

    /// 重新打开队列并清空残留消息
    pub fn reopen(&self) {
        let mut inner = self.inner.lock();
        inner.closed = false;
        inner.messages.clear();
    }
}
