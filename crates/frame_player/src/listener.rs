//! 通知接收者
//!
//! 所有通知经由一个 [`PlayerListener`] 发出。同一播放器实例的通知互斥执行，
//! 但允许在回调中再次调用播放器接口。

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::{Mutex, ReentrantMutex};

use crate::{ErrorKind, PlayerEvent};

/// 播放器通知接收者，所有方法默认为空实现
pub trait PlayerListener: Send + Sync {
    fn on_prepared(&self) {}

    fn on_video_size_changed(&self, _width: u32, _height: u32) {}

    /// 播放进度 (ms)
    fn on_position_update(&self, _position_ms: i64) {}

    fn on_seek_complete(&self) {}

    fn on_completion(&self) {}

    /// 返回 true 表示错误已处理，播放器状态保持不变
    fn on_error(&self, _what: ErrorKind, _extra: ErrorKind) -> bool {
        false
    }
}

/// 把通知转成 [`PlayerEvent`] 投递到通道
pub struct ChannelListener {
    evt_tx: Sender<PlayerEvent>,
}

impl ChannelListener {
    /// 创建监听器和对应的事件接收端
    ///
    /// 通道满时只丢弃进度事件；其余事件阻塞等待接收端取走，接收端需要持续消费。
    pub fn bounded(capacity: usize) -> (Self, Receiver<PlayerEvent>) {
        let (evt_tx, evt_rx) = crossbeam_channel::bounded(capacity);
        (Self { evt_tx }, evt_rx)
    }

    pub fn unbounded() -> (Self, Receiver<PlayerEvent>) {
        let (evt_tx, evt_rx) = crossbeam_channel::unbounded();
        (Self { evt_tx }, evt_rx)
    }

    fn send(&self, event: PlayerEvent) {
        match self.evt_tx.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(event @ PlayerEvent::Position(_))) => {
                log::trace!("event channel full, dropping {:?}", event);
            }
            Err(TrySendError::Full(event)) => {
                // 接收端已断开时 send 直接返回错误
                let _ = self.evt_tx.send(event);
            }
        }
    }
}

impl PlayerListener for ChannelListener {
    fn on_prepared(&self) {
        self.send(PlayerEvent::Prepared);
    }

    fn on_video_size_changed(&self, width: u32, height: u32) {
        self.send(PlayerEvent::VideoSizeChanged { width, height });
    }

    fn on_position_update(&self, position_ms: i64) {
        self.send(PlayerEvent::Position(position_ms));
    }

    fn on_seek_complete(&self) {
        self.send(PlayerEvent::SeekComplete);
    }

    fn on_completion(&self) {
        self.send(PlayerEvent::Completion);
    }

    fn on_error(&self, what: ErrorKind, extra: ErrorKind) -> bool {
        self.send(PlayerEvent::Error { what, extra });
        false
    }
}

/// 播放器内部的通知分发
#[derive(Default)]
pub(crate) struct Notifier {
    listener: Mutex<Option<Arc<dyn PlayerListener>>>,
    serial: ReentrantMutex<()>,
}

impl Notifier {
    pub(crate) fn new(listener: Option<Arc<dyn PlayerListener>>) -> Self {
        Self {
            listener: Mutex::new(listener),
            serial: ReentrantMutex::new(()),
        }
    }

    pub(crate) fn set(&self, listener: Option<Arc<dyn PlayerListener>>) {
        *self.listener.lock() = listener;
    }

    fn with<R>(&self, f: impl FnOnce(&dyn PlayerListener) -> R) -> Option<R> {
        // 先取出监听器再回调，回调中可以替换监听器
        let listener = self.listener.lock().clone()?;
        let _serial = self.serial.lock();
        Some(f(listener.as_ref()))
    }

    pub(crate) fn prepared(&self) {
        self.with(|l| l.on_prepared());
    }

    pub(crate) fn position(&self, position_us: i64) {
        self.with(|l| l.on_position_update(position_us / 1000));
    }

    pub(crate) fn seek_complete(&self) {
        self.with(|l| l.on_seek_complete());
    }

    pub(crate) fn completion(&self) {
        self.with(|l| l.on_completion());
    }

    /// 没有监听器或监听器未处理时返回 false
    pub(crate) fn error(&self, what: ErrorKind, extra: ErrorKind) -> bool {
        self.with(|l| l.on_error(what, extra)).unwrap_or(false)
    }
}
