//! 播放控制核心
//!
//! [`FramePlayer`] 的公共方法可以在任意线程调用：先校验当前状态，
//! 再把 [`ControlMessage`] 放入命令队列，由唯一的工作线程消费。
//! Stop/Reset/Release 会阻塞到后台线程全部退出。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::listener::Notifier;
use crate::pipeline::Pipeline;
use crate::worker::Worker;
use crate::{
    CommandQueue, ControlMessage, ErrorKind, MediaBackend, MediaInfo, PlaybackState, PlayerError,
    PlayerListener, RenderTarget,
};

/// 未设置位置的哨兵值，与任何 seek 目标都不在同一帧内
const UNSET_POSITION_US: i64 = i64::MIN;

/// 播放器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 解码器输入/输出缓冲的等待上限 (ms)
    pub io_timeout_ms: u64,
    pub worker_thread_name: String,
    pub prepare_thread_name: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            io_timeout_ms: 20,
            worker_thread_name: "frame-player-worker".to_string(),
            prepare_thread_name: "frame-player-prepare".to_string(),
        }
    }
}

impl PlayerConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// seek 目标与进行中标志，受独立的锁保护
#[derive(Debug, Default)]
pub(crate) struct SeekState {
    pub(crate) target_us: i64,
    pub(crate) in_flight: bool,
}

/// 当前源的媒体信息
struct PreparedMedia {
    info: MediaInfo,
    /// 对外暴露的旋转角度
    rotation: u32,
}

#[derive(Default)]
struct Threads {
    prepare: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

/// 调用线程与工作线程共享的状态
pub(crate) struct Shared {
    pub(crate) config: PlayerConfig,
    backend: Arc<dyn MediaBackend>,
    state: Mutex<PlaybackState>,
    pub(crate) queue: CommandQueue,
    pub(crate) seek: Mutex<SeekState>,
    position_us: AtomicI64,
    pub(crate) decoder_eos: AtomicBool,
    stop_flag: AtomicBool,
    pub(crate) notifier: Notifier,
    media: RwLock<Option<PreparedMedia>>,
    source: Mutex<Option<PathBuf>>,
    render_target: Mutex<Option<Arc<dyn RenderTarget>>>,
    /// 释放发送端即可唤醒工作线程的节奏等待
    interrupt: Mutex<Option<Sender<()>>>,
    threads: Mutex<Threads>,
    /// 后台线程 id，用于拒绝在后台线程上执行会自我 join 的操作
    background_ids: Mutex<Vec<ThreadId>>,
}

impl Shared {
    pub(crate) fn state(&self) -> PlaybackState {
        *self.state.lock()
    }

    /// 状态迁移；进入 Prepared 与 PlaybackCompleted 时各发出一次通知
    pub(crate) fn set_state(&self, state: PlaybackState) {
        *self.state.lock() = state;
        match state {
            PlaybackState::Prepared => self.notifier.prepared(),
            PlaybackState::PlaybackCompleted => self.notifier.completion(),
            _ => {}
        }
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::SeqCst)
    }

    pub(crate) fn position(&self) -> i64 {
        self.position_us.load(Ordering::SeqCst)
    }

    pub(crate) fn set_position(&self, position_us: i64) {
        self.position_us.store(position_us, Ordering::SeqCst);
    }

    pub(crate) fn reset_position(&self) {
        self.set_position(UNSET_POSITION_US);
        self.notifier.position(0);
    }

    /// 结束对 `target_us` 的 seek；期间若有更新的请求则保持进行中
    pub(crate) fn finish_seek(&self, target_us: i64) {
        let mut seek = self.seek.lock();
        if seek.target_us == target_us {
            seek.in_flight = false;
        }
    }

    /// 未被处理的错误使播放器进入 Error 状态
    pub(crate) fn report_error(&self, what: ErrorKind, extra: ErrorKind) {
        if !self.notifier.error(what, extra) {
            self.set_state(PlaybackState::Error);
        }
    }

    fn on_background_thread(&self) -> bool {
        let current = thread::current().id();
        self.background_ids.lock().contains(&current)
    }
}

/// 打开流水线、启动工作线程并进入 Prepared
fn prepare_internal(
    shared: &Arc<Shared>,
    source: &Path,
    render_target: Arc<dyn RenderTarget>,
) -> Result<(), PlayerError> {
    let info = shared.backend.probe(source)?;
    let (pipeline, rotation_hint) =
        Pipeline::open(Arc::clone(&shared.backend), source, render_target)?;

    log::info!(
        "prepared {}: {}x{}, {} ms, {} frames",
        source.display(),
        info.width,
        info.height,
        info.duration_us / 1000,
        info.total_frames
    );

    *shared.media.write() = Some(PreparedMedia {
        rotation: rotation_hint.unwrap_or(info.rotation),
        info: info.clone(),
    });
    shared.decoder_eos.store(false, Ordering::SeqCst);
    shared.reset_position();

    let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded(1);
    let worker = Worker::new(Arc::clone(shared), pipeline, info, interrupt_rx);

    {
        let mut threads = shared.threads.lock();
        if shared.stop_requested() {
            log::debug!("prepare cancelled before worker start");
            // worker 被丢弃时释放流水线
            return Ok(());
        }
        *shared.interrupt.lock() = Some(interrupt_tx);
        let handle = thread::Builder::new()
            .name(shared.config.worker_thread_name.clone())
            .spawn(move || worker.run())
            .map_err(PlayerError::Spawn)?;
        shared.background_ids.lock().push(handle.thread().id());
        threads.worker = Some(handle);
    }

    shared.set_state(PlaybackState::Prepared);
    Ok(())
}

/// 帧精确的视频播放控制器
pub struct FramePlayer {
    shared: Arc<Shared>,
}

impl FramePlayer {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self::with_config(backend, PlayerConfig::default(), None)
    }

    pub fn with_listener(backend: Arc<dyn MediaBackend>, listener: Arc<dyn PlayerListener>) -> Self {
        Self::with_config(backend, PlayerConfig::default(), Some(listener))
    }

    pub fn with_config(
        backend: Arc<dyn MediaBackend>,
        config: PlayerConfig,
        listener: Option<Arc<dyn PlayerListener>>,
    ) -> Self {
        let shared = Shared {
            config,
            backend,
            state: Mutex::new(PlaybackState::Idle),
            queue: CommandQueue::new(),
            seek: Mutex::new(SeekState::default()),
            position_us: AtomicI64::new(UNSET_POSITION_US),
            decoder_eos: AtomicBool::new(false),
            stop_flag: AtomicBool::new(false),
            notifier: Notifier::new(listener),
            media: RwLock::new(None),
            source: Mutex::new(None),
            render_target: Mutex::new(None),
            interrupt: Mutex::new(None),
            threads: Mutex::new(Threads::default()),
            background_ids: Mutex::new(Vec::new()),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// 设置源和渲染目标并同步准备
    pub fn create(
        backend: Arc<dyn MediaBackend>,
        render_target: Arc<dyn RenderTarget>,
        source: impl AsRef<Path>,
        listener: Option<Arc<dyn PlayerListener>>,
    ) -> Result<Self, PlayerError> {
        let player = Self::with_config(backend, PlayerConfig::default(), listener);
        player.set_data_source(source)?;
        player.set_render_target(render_target);
        player.prepare()?;
        Ok(player)
    }

    /// 替换通知接收者；reset 会清除它
    pub fn set_listener(&self, listener: Option<Arc<dyn PlayerListener>>) {
        self.shared.notifier.set(listener);
    }

    pub fn set_render_target(&self, render_target: Arc<dyn RenderTarget>) {
        *self.shared.render_target.lock() = Some(render_target);
    }

    pub fn set_data_source(&self, source: impl AsRef<Path>) -> Result<(), PlayerError> {
        let source = source.as_ref();
        if source.as_os_str().is_empty() {
            return Err(PlayerError::InvalidArgument("source cannot be empty"));
        }
        self.expect_state("set_data_source", |s| s == PlaybackState::Idle)?;

        *self.shared.source.lock() = Some(source.to_path_buf());
        self.shared.set_state(PlaybackState::Initialized);
        Ok(())
    }

    /// 在调用线程上准备，错误直接返回
    pub fn prepare(&self) -> Result<(), PlayerError> {
        let (source, render_target, previous) = self.begin_prepare("prepare")?;

        if let Err(e) = prepare_internal(&self.shared, &source, render_target) {
            log::warn!("prepare {} failed: {}", source.display(), e);
            *self.shared.media.write() = None;
            self.shared.set_state(previous);
            return Err(e);
        }
        Ok(())
    }

    /// 在准备线程上准备，错误通过错误通知报告
    pub fn prepare_async(&self) -> Result<(), PlayerError> {
        let (source, render_target, _) = self.begin_prepare("prepare_async")?;

        let shared = Arc::clone(&self.shared);
        let mut threads = self.shared.threads.lock();
        let handle = thread::Builder::new()
            .name(self.shared.config.prepare_thread_name.clone())
            .spawn(move || {
                if let Err(e) = prepare_internal(&shared, &source, render_target) {
                    log::error!("async prepare {} failed: {}", source.display(), e);
                    if !shared.stop_requested() {
                        shared.report_error(ErrorKind::ServerDied, e.error_kind());
                    }
                }
                log::debug!("prepare thread exited");
            })
            .map_err(PlayerError::Spawn)?;
        self.shared.background_ids.lock().push(handle.thread().id());
        threads.prepare = Some(handle);
        Ok(())
    }

    fn begin_prepare(
        &self,
        op: &'static str,
    ) -> Result<(PathBuf, Arc<dyn RenderTarget>, PlaybackState), PlayerError> {
        let render_target = self
            .shared
            .render_target
            .lock()
            .clone()
            .ok_or(PlayerError::NoRenderTarget)?;
        let previous = self.expect_state(op, PlaybackState::can_prepare)?;
        let source = self
            .shared
            .source
            .lock()
            .clone()
            .ok_or(PlayerError::InvalidArgument("source is not set"))?;

        self.shared.stop_flag.store(false, Ordering::SeqCst);
        self.shared.queue.reopen();
        *self.shared.seek.lock() = SeekState::default();
        self.shared.set_state(PlaybackState::Preparing);
        Ok((source, render_target, previous))
    }

    pub fn start(&self) -> Result<(), PlayerError> {
        if self.state() == PlaybackState::Started {
            return Ok(());
        }
        self.expect_state("start", PlaybackState::can_start)?;
        self.shared.queue.push(ControlMessage::Play);
        Ok(())
    }

    pub fn pause(&self) -> Result<(), PlayerError> {
        if self.state() == PlaybackState::Paused {
            return Ok(());
        }
        self.expect_state("pause", PlaybackState::can_pause)?;
        self.shared.queue.push(ControlMessage::Pause);
        Ok(())
    }

    /// 停止播放并释放解码资源，阻塞到后台线程退出
    pub fn stop(&self) -> Result<(), PlayerError> {
        if self.state() == PlaybackState::Stopped {
            return Ok(());
        }
        self.expect_state("stop", PlaybackState::can_stop)?;
        self.teardown("stop", ControlMessage::Stop)
    }

    /// 跳转并立即发出目标位置的进度通知
    pub fn seek_to(&self, msec: i64) -> Result<(), PlayerError> {
        self.seek_internal("seek_to", msec, true)
    }

    pub fn seek_to_without_callback(&self, msec: i64) -> Result<(), PlayerError> {
        self.seek_internal("seek_to_without_callback", msec, false)
    }

    fn seek_internal(&self, op: &'static str, msec: i64, notify: bool) -> Result<(), PlayerError> {
        self.expect_state(op, PlaybackState::can_seek)?;

        let duration_us = self
            .shared
            .media
            .read()
            .as_ref()
            .map(|m| m.info.duration_us.max(0))
            .unwrap_or(0);
        let target_us = msec.saturating_mul(1000).clamp(0, duration_us);

        if notify {
            self.shared.notifier.position(target_us);
        }

        let mut seek = self.shared.seek.lock();
        seek.target_us = target_us;
        seek.in_flight = true;
        self.shared.queue.push(ControlMessage::Seek(target_us));
        Ok(())
    }

    /// 回到 Idle，清除源与监听器
    pub fn reset(&self) -> Result<(), PlayerError> {
        match self.state() {
            PlaybackState::Idle => Ok(()),
            PlaybackState::End => Err(PlayerError::InvalidState {
                op: "reset",
                state: PlaybackState::End,
            }),
            _ => self.teardown("reset", ControlMessage::Reset),
        }
    }

    /// 进入终止状态 End
    pub fn release(&self) -> Result<(), PlayerError> {
        if self.state() == PlaybackState::End {
            return Ok(());
        }
        self.teardown("release", ControlMessage::Release)
    }

    fn teardown(&self, op: &'static str, message: ControlMessage) -> Result<(), PlayerError> {
        if self.shared.on_background_thread() {
            return Err(PlayerError::CalledFromWorker(op));
        }
        log::info!("{} requested in state {}", op, self.state());

        let shared = &self.shared;
        shared.stop_flag.store(true, Ordering::SeqCst);
        shared.queue.push(message);
        shared.queue.close();
        shared.interrupt.lock().take();

        let prepare = shared.threads.lock().prepare.take();
        if let Some(handle) = prepare {
            if handle.join().is_err() {
                log::warn!("prepare thread panicked");
            }
            log::debug!("prepare thread join done");
        }

        // 准备线程可能刚刚启动了工作线程
        shared.interrupt.lock().take();
        let worker = shared.threads.lock().worker.take();
        if let Some(handle) = worker {
            if handle.join().is_err() {
                log::warn!("worker thread panicked");
            }
            log::debug!("worker thread join done");
        }
        shared.background_ids.lock().clear();

        shared.queue.clear();
        *shared.media.write() = None;
        *shared.seek.lock() = SeekState::default();
        shared.decoder_eos.store(false, Ordering::SeqCst);

        match message {
            ControlMessage::Stop => shared.set_state(PlaybackState::Stopped),
            ControlMessage::Reset => self.reset_stuff(PlaybackState::Idle),
            _ => self.reset_stuff(PlaybackState::End),
        }
        Ok(())
    }

    fn reset_stuff(&self, state: PlaybackState) {
        *self.shared.source.lock() = None;
        self.shared.notifier.set(None);
        self.shared.set_position(UNSET_POSITION_US);
        self.shared.set_state(state);
    }

    fn expect_state(
        &self,
        op: &'static str,
        allowed: impl Fn(PlaybackState) -> bool,
    ) -> Result<PlaybackState, PlayerError> {
        let state = self.state();
        if allowed(state) {
            Ok(state)
        } else {
            Err(PlayerError::InvalidState { op, state })
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state()
    }

    fn with_media<T>(&self, f: impl FnOnce(&PreparedMedia) -> T) -> Option<T> {
        self.shared.media.read().as_ref().map(f)
    }

    pub fn video_width(&self) -> u32 {
        self.with_media(|m| m.info.width).unwrap_or(0)
    }

    pub fn video_height(&self) -> u32 {
        self.with_media(|m| m.info.height).unwrap_or(0)
    }

    /// 未准备时为 -1
    pub fn video_rotation(&self) -> i32 {
        self.with_media(|m| m.rotation as i32).unwrap_or(-1)
    }

    pub fn duration_ms(&self) -> i64 {
        self.with_media(|m| m.info.duration_us / 1000).unwrap_or(-1)
    }

    pub fn per_sample_duration_ms(&self) -> i64 {
        self.with_media(|m| m.info.per_frame_duration_us / 1000)
            .unwrap_or(-1)
    }

    /// 当前位置 (ms)，不小于 0；seek 进行中时返回 seek 目标
    pub fn current_position_ms(&self) -> i64 {
        let position_us = {
            let seek = self.shared.seek.lock();
            if seek.in_flight {
                seek.target_us
            } else {
                self.shared.position()
            }
        };
        (position_us / 1000).max(0)
    }

    pub fn is_reach_eos(&self) -> bool {
        self.shared.decoder_eos.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Started
    }

    pub fn is_seeking(&self) -> bool {
        self.shared.seek.lock().in_flight
    }
}

impl Drop for FramePlayer {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!("release on drop failed: {}", e);
        }
    }
}
