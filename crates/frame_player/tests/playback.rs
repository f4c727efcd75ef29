//! 端到端播放场景：软件后端 + 合成片段

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use frame_container::{synth_frame_number, write_synthetic_clip, SynthOptions};
use frame_player::{
    ChannelListener, ContainerBackend, Demuxer, EosRecovery, ErrorKind, FramePlayer,
    MediaBackend, MediaError, MediaInfo, OutputStatus, PlaybackState, PlayerError, PlayerEvent,
    PlayerListener, RenderTarget, RenderedFrame, TrackFormat, VideoDecoder,
};
use parking_lot::Mutex;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(5);

/// 记录渲染的帧
#[derive(Default)]
struct RecordingTarget {
    frames: Mutex<Vec<(i64, u64)>>,
}

impl RecordingTarget {
    fn count(&self) -> usize {
        self.frames.lock().len()
    }

    fn last(&self) -> Option<(i64, u64)> {
        self.frames.lock().last().copied()
    }
}

impl RenderTarget for RecordingTarget {
    fn present(&self, frame: &RenderedFrame<'_>) {
        let number = synth_frame_number(frame.data).unwrap_or(u64::MAX);
        self.frames.lock().push((frame.pts_us, number));
    }
}

fn write_clip(dir: &TempDir, name: &str, options: &SynthOptions) -> PathBuf {
    let path = dir.path().join(name);
    let file = File::create(&path).unwrap();
    write_synthetic_clip(file, options).unwrap();
    path
}

fn short_clip() -> SynthOptions {
    SynthOptions {
        duration_us: 500_000,
        ..SynthOptions::default()
    }
}

struct Harness {
    player: FramePlayer,
    _dir: TempDir,
    path: PathBuf,
    target: Arc<RecordingTarget>,
    events: Receiver<PlayerEvent>,
    seen: Vec<PlayerEvent>,
}

impl Harness {
    fn new(options: &SynthOptions) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = write_clip(&dir, "clip.frm", options);
        let (listener, events) = ChannelListener::unbounded();
        let player = FramePlayer::with_listener(Arc::new(ContainerBackend::new()), Arc::new(listener));
        let target = Arc::new(RecordingTarget::default());
        player.set_render_target(target.clone());
        player.set_data_source(&path).unwrap();

        Self {
            player,
            _dir: dir,
            path,
            target,
            events,
            seen: Vec::new(),
        }
    }

    fn prepared(options: &SynthOptions) -> Self {
        let mut harness = Self::new(options);
        harness.player.prepare().unwrap();
        assert!(harness.wait_event(|e| *e == PlayerEvent::Prepared));
        harness
    }

    /// 等待满足条件的事件，收到的事件都记录到 `seen`
    fn wait_event(&mut self, pred: impl Fn(&PlayerEvent) -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match self.events.recv_timeout(remaining) {
                Ok(event) => {
                    let matched = pred(&event);
                    self.seen.push(event);
                    if matched {
                        return true;
                    }
                }
                Err(_) => return false,
            }
        }
        false
    }

    fn drain(&mut self) {
        self.seen.extend(self.events.try_iter());
    }

    fn count(&self, event: &PlayerEvent) -> usize {
        self.seen.iter().filter(|e| *e == event).count()
    }

    fn wait_seek_done(&self) -> bool {
        wait_until(|| !self.player.is_seeking())
    }
}

fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_queries_before_prepare() {
    let player = FramePlayer::new(Arc::new(ContainerBackend::new()));
    assert_eq!(player.state(), PlaybackState::Idle);
    assert_eq!(player.video_width(), 0);
    assert_eq!(player.video_height(), 0);
    assert_eq!(player.video_rotation(), -1);
    assert_eq!(player.duration_ms(), -1);
    assert_eq!(player.per_sample_duration_ms(), -1);
    assert_eq!(player.current_position_ms(), 0);
    assert!(!player.is_playing());
    assert!(!player.is_reach_eos());
}

#[test]
fn test_invalid_state_operations() {
    let player = FramePlayer::new(Arc::new(ContainerBackend::new()));

    assert!(matches!(
        player.start(),
        Err(PlayerError::InvalidState { op: "start", state: PlaybackState::Idle })
    ));
    assert!(matches!(player.pause(), Err(PlayerError::InvalidState { .. })));
    assert!(matches!(player.seek_to(100), Err(PlayerError::InvalidState { .. })));
    assert!(matches!(player.stop(), Err(PlayerError::InvalidState { .. })));
    assert!(matches!(player.prepare(), Err(PlayerError::NoRenderTarget)));
    assert!(matches!(
        player.set_data_source(""),
        Err(PlayerError::InvalidArgument(_))
    ));

    player.set_render_target(Arc::new(RecordingTarget::default()));
    assert!(matches!(player.prepare(), Err(PlayerError::InvalidState { .. })));

    player.set_data_source("/tmp/a.frm").unwrap();
    assert_eq!(player.state(), PlaybackState::Initialized);
    assert!(matches!(
        player.set_data_source("/tmp/b.frm"),
        Err(PlayerError::InvalidState { .. })
    ));
}

#[test]
fn test_prepare_reports_media_info() {
    let options = SynthOptions {
        rotation: 90,
        ..SynthOptions::default()
    };
    let h = Harness::prepared(&options);

    assert_eq!(h.player.state(), PlaybackState::Prepared);
    assert_eq!(h.player.video_width(), 1280);
    assert_eq!(h.player.video_height(), 720);
    assert_eq!(h.player.video_rotation(), 90);
    assert_eq!(h.player.duration_ms(), 10_000);
    assert_eq!(h.player.per_sample_duration_ms(), 33);
    assert_eq!(h.player.current_position_ms(), 0);
    // 准备阶段不渲染
    assert_eq!(h.target.count(), 0);
}

#[test]
fn test_create_prepares_synchronously() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_clip(&dir, "clip.frm", &short_clip());
    let player = FramePlayer::create(
        Arc::new(ContainerBackend::new()),
        Arc::new(RecordingTarget::default()),
        &path,
        None,
    )
    .unwrap();
    assert_eq!(player.state(), PlaybackState::Prepared);
    assert_eq!(player.duration_ms(), 500);
}

#[test]
fn test_prepare_missing_source_restores_state() {
    let player = FramePlayer::new(Arc::new(ContainerBackend::new()));
    player.set_render_target(Arc::new(RecordingTarget::default()));
    player.set_data_source("/nonexistent/clip.frm").unwrap();

    let result = player.prepare();
    assert!(matches!(
        result,
        Err(PlayerError::Media(MediaError::NotFound(_)))
    ));
    assert_eq!(player.state(), PlaybackState::Initialized);
    assert_eq!(player.duration_ms(), -1);
}

#[test]
fn test_prepare_async_failure_reports_error() {
    let (listener, events) = ChannelListener::unbounded();
    let player = FramePlayer::with_listener(Arc::new(ContainerBackend::new()), Arc::new(listener));
    player.set_render_target(Arc::new(RecordingTarget::default()));
    player.set_data_source("/nonexistent/clip.frm").unwrap();

    player.prepare_async().unwrap();
    let event = events.recv_timeout(WAIT).unwrap();
    assert_eq!(
        event,
        PlayerEvent::Error {
            what: ErrorKind::ServerDied,
            extra: ErrorKind::Io,
        }
    );
    assert!(wait_until(|| player.state() == PlaybackState::Error));
}

#[test]
fn test_prepare_async_success() {
    let mut h = Harness::new(&short_clip());
    h.player.prepare_async().unwrap();
    assert!(h.wait_event(|e| *e == PlayerEvent::Prepared));
    assert_eq!(h.player.state(), PlaybackState::Prepared);
    assert_eq!(h.player.duration_ms(), 500);
}

#[test]
fn test_play_to_completion() {
    let mut h = Harness::prepared(&short_clip());
    h.player.start().unwrap();

    assert!(h.wait_event(|e| *e == PlayerEvent::Completion));
    thread::sleep(Duration::from_millis(100));
    h.drain();

    assert_eq!(h.count(&PlayerEvent::Completion), 1);
    assert_eq!(h.player.state(), PlaybackState::PlaybackCompleted);
    assert_eq!(h.player.current_position_ms(), h.player.duration_ms());
    assert!(h.player.is_reach_eos());

    let last_position = h.seen.iter().rev().find_map(|e| match e {
        PlayerEvent::Position(ms) => Some(*ms),
        _ => None,
    });
    assert_eq!(last_position, Some(500));

    // 15 帧全部渲染，顺序递增
    let frames = h.target.frames.lock().clone();
    assert_eq!(frames.len(), 15);
    assert!(frames.windows(2).all(|w| w[0].0 < w[1].0));
}

#[test]
fn test_playback_is_paced() {
    let mut h = Harness::prepared(&short_clip());
    let started = Instant::now();
    h.player.start().unwrap();
    assert!(h.wait_event(|e| *e == PlayerEvent::Completion));

    // 最后一帧的时间戳约 467 ms
    assert!(started.elapsed() >= Duration::from_millis(400));
}

#[test]
fn test_restart_after_completion() {
    let mut h = Harness::prepared(&short_clip());
    h.player.start().unwrap();
    assert!(h.wait_event(|e| *e == PlayerEvent::Completion));

    h.player.start().unwrap();
    assert!(h.wait_event(|e| *e == PlayerEvent::Position(0)));
    assert!(h.wait_event(|e| *e == PlayerEvent::Completion));
    assert_eq!(h.count(&PlayerEvent::Completion), 2);
    assert_eq!(h.target.count(), 30);
}

#[test]
fn test_pause_holds_position() {
    let mut h = Harness::prepared(&SynthOptions::default());
    h.player.start().unwrap();
    assert!(h.wait_event(|e| matches!(e, PlayerEvent::Position(ms) if *ms >= 200)));

    h.player.pause().unwrap();
    assert!(wait_until(|| h.player.state() == PlaybackState::Paused));
    let position = h.player.current_position_ms();
    let rendered = h.target.count();

    thread::sleep(Duration::from_millis(150));
    assert_eq!(h.player.current_position_ms(), position);
    assert_eq!(h.target.count(), rendered);

    h.player.start().unwrap();
    assert!(wait_until(|| h.player.current_position_ms() > position));
}

#[test]
fn test_backward_seek() {
    let mut h = Harness::prepared(&SynthOptions::default());

    h.player.seek_to(5000).unwrap();
    assert!(h.wait_event(|e| *e == PlayerEvent::SeekComplete));
    assert_eq!(h.player.current_position_ms(), 5000);
    assert_eq!(h.target.last(), Some((5_000_000, 150)));

    h.player.seek_to(1000).unwrap();
    assert!(h.wait_event(|e| *e == PlayerEvent::SeekComplete));
    assert_eq!(h.player.current_position_ms(), 1000);
    assert_eq!(h.target.last(), Some((1_000_000, 30)));

    // seek_to 立即通知目标位置；seek 完成后没有额外的进度通知
    assert_eq!(
        h.seen
            .iter()
            .filter(|e| matches!(e, PlayerEvent::Position(_)))
            .cloned()
            .collect::<Vec<_>>(),
        vec![
            PlayerEvent::Position(0),
            PlayerEvent::Position(5000),
            PlayerEvent::Position(1000),
        ]
    );
    // 只渲染目标帧
    assert_eq!(h.target.count(), 2);
}

#[test]
fn test_short_forward_seek_decodes_ahead() {
    let mut h = Harness::prepared(&SynthOptions::default());

    h.player.seek_to(200).unwrap();
    assert!(h.wait_event(|e| *e == PlayerEvent::SeekComplete));
    // 200 ms 落在第 6 帧 (200 000 µs) 上
    assert_eq!(h.target.last(), Some((200_000, 6)));

    h.player.seek_to(700).unwrap();
    assert!(h.wait_event(|e| *e == PlayerEvent::SeekComplete));
    assert_eq!(h.target.last().map(|f| f.1), Some(21));
    assert_eq!(h.player.current_position_ms(), 700);
}

#[test]
fn test_seek_between_frames_lands_on_next_frame() {
    let mut h = Harness::prepared(&SynthOptions::default());

    // 50 ms 落在第 1 帧 (33 333 µs) 和第 2 帧 (66 666 µs) 正中间
    h.player.seek_to(50).unwrap();
    assert!(h.wait_event(|e| *e == PlayerEvent::SeekComplete));
    assert_eq!(h.target.last(), Some((66_666, 2)));
    assert_eq!(h.target.count(), 1);
    assert!(!h.player.is_reach_eos());
    assert!((h.player.current_position_ms() - 50).abs() <= 33);

    // 向后 seek 到帧间位置同样落在下一帧
    h.player.seek_to(5000).unwrap();
    assert!(h.wait_event(|e| *e == PlayerEvent::SeekComplete));
    h.player.seek_to(1017).unwrap();
    assert!(h.wait_event(|e| *e == PlayerEvent::SeekComplete));
    assert_eq!(h.target.last(), Some((1_033_333, 31)));
    assert!(!h.player.is_reach_eos());
}

#[test]
fn test_seek_targets_are_clamped() {
    let mut h = Harness::prepared(&SynthOptions::default());

    h.player.seek_to(999_999).unwrap();
    assert!(h.wait_event(|e| *e == PlayerEvent::SeekComplete));
    assert!(h.seen.contains(&PlayerEvent::Position(10_000)));
    assert_eq!(h.player.current_position_ms(), 10_000);
    assert!(h.player.is_reach_eos());

    h.player.seek_to(-50).unwrap();
    assert!(h.wait_event(|e| *e == PlayerEvent::SeekComplete));
    assert_eq!(h.player.current_position_ms(), 0);
    assert_eq!(h.target.last(), Some((0, 0)));
    assert!(!h.player.is_reach_eos());
}

#[test]
fn test_seek_without_callback() {
    let mut h = Harness::prepared(&SynthOptions::default());

    h.player.seek_to_without_callback(3000).unwrap();
    assert!(h.wait_event(|e| *e == PlayerEvent::SeekComplete));
    assert_eq!(h.player.current_position_ms(), 3000);
    assert!(!h.seen.contains(&PlayerEvent::Position(3000)));
}

#[test]
fn test_rapid_seeks_settle_on_last_target() {
    let h = Harness::prepared(&SynthOptions::default());

    for ms in [1000, 2500, 4000, 9000, 3000, 6000] {
        h.player.seek_to(ms).unwrap();
        // seek 进行中查询到的位置就是最新目标
        assert_eq!(h.player.current_position_ms(), ms);
    }

    assert!(h.wait_seek_done());
    assert!(wait_until(|| h.target.last() == Some((6_000_000, 180))));
    assert_eq!(h.player.current_position_ms(), 6000);
}

#[test]
fn test_seek_while_playing() {
    let mut h = Harness::prepared(&SynthOptions::default());
    h.player.start().unwrap();
    assert!(h.wait_event(|e| matches!(e, PlayerEvent::Position(ms) if *ms >= 100)));

    h.player.seek_to(8000).unwrap();
    assert!(h.wait_event(|e| *e == PlayerEvent::SeekComplete));
    assert!(h.wait_event(|e| matches!(e, PlayerEvent::Position(ms) if *ms > 8000)));
    assert!(h.player.is_playing());
}

#[test]
fn test_stop_and_prepare_again() {
    let mut h = Harness::prepared(&SynthOptions::default());
    h.player.start().unwrap();
    assert!(h.wait_event(|e| matches!(e, PlayerEvent::Position(ms) if *ms > 0)));

    h.player.stop().unwrap();
    assert_eq!(h.player.state(), PlaybackState::Stopped);
    assert_eq!(h.player.duration_ms(), -1);
    // 再次 stop 是空操作
    h.player.stop().unwrap();

    let rendered = h.target.count();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(h.target.count(), rendered);

    h.player.prepare().unwrap();
    assert_eq!(h.player.state(), PlaybackState::Prepared);
    h.player.seek_to(2000).unwrap();
    assert!(h.wait_event(|e| *e == PlayerEvent::SeekComplete));
    assert_eq!(h.player.current_position_ms(), 2000);
}

#[test]
fn test_reset_returns_to_idle() {
    let mut h = Harness::prepared(&short_clip());
    h.player.reset().unwrap();
    h.drain();
    assert_eq!(h.player.state(), PlaybackState::Idle);
    assert!(matches!(h.player.prepare(), Err(PlayerError::InvalidState { .. })));
    h.player.reset().unwrap();

    // 监听器被清除，需要重新注册
    h.player.set_data_source(&h.path).unwrap();
    h.player.prepare().unwrap();
    thread::sleep(Duration::from_millis(50));
    assert!(h.events.try_recv().is_err());
    assert_eq!(h.player.state(), PlaybackState::Prepared);
}

#[test]
fn test_release_is_terminal() {
    let h = Harness::prepared(&short_clip());
    h.player.release().unwrap();
    assert_eq!(h.player.state(), PlaybackState::End);
    h.player.release().unwrap();

    assert!(matches!(h.player.reset(), Err(PlayerError::InvalidState { .. })));
    assert!(matches!(h.player.start(), Err(PlayerError::InvalidState { .. })));
    assert!(matches!(h.player.seek_to(0), Err(PlayerError::InvalidState { .. })));
}

#[test]
fn test_release_during_playback_joins_worker() {
    let mut h = Harness::prepared(&SynthOptions::default());
    h.player.start().unwrap();
    assert!(h.wait_event(|e| matches!(e, PlayerEvent::Position(ms) if *ms > 0)));

    let started = Instant::now();
    h.player.release().unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    let rendered = h.target.count();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(h.target.count(), rendered);
}

#[test]
fn test_release_during_async_prepare() {
    let h = Harness::new(&SynthOptions::default());
    h.player.prepare_async().unwrap();
    h.player.release().unwrap();
    assert_eq!(h.player.state(), PlaybackState::End);
}

#[test]
fn test_drop_stops_playback() {
    let h = Harness::prepared(&SynthOptions::default());
    h.player.start().unwrap();
    assert!(wait_until(|| h.target.count() > 0));

    let target = Arc::clone(&h.target);
    drop(h);
    let rendered = target.count();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(target.count(), rendered);
}

/// 在回调中调用播放器
struct Reentrant {
    player: Mutex<Weak<FramePlayer>>,
    stop_result: Mutex<Option<Result<(), PlayerError>>>,
    positions: Mutex<Vec<i64>>,
}

impl PlayerListener for Reentrant {
    fn on_position_update(&self, position_ms: i64) {
        self.positions.lock().push(position_ms);
    }

    fn on_seek_complete(&self) {
        let Some(player) = self.player.lock().upgrade() else {
            return;
        };
        // 回调中发起新的 seek 不会死锁
        if player.current_position_ms() == 1000 {
            player.seek_to(2000).unwrap();
        } else {
            *self.stop_result.lock() = Some(player.stop());
        }
    }
}

fn prepared_with(listener: Arc<Reentrant>) -> (TempDir, Arc<FramePlayer>) {
    let dir = tempfile::tempdir().unwrap();
    let path = write_clip(&dir, "clip.frm", &SynthOptions::default());
    let player = Arc::new(FramePlayer::with_listener(
        Arc::new(ContainerBackend::new()),
        listener.clone(),
    ));
    *listener.player.lock() = Arc::downgrade(&player);
    player.set_render_target(Arc::new(RecordingTarget::default()));
    player.set_data_source(Path::new(&path)).unwrap();
    player.prepare().unwrap();
    (dir, player)
}

#[test]
fn test_listener_may_call_back_into_player() {
    let listener = Arc::new(Reentrant {
        player: Mutex::new(Weak::new()),
        stop_result: Mutex::new(None),
        positions: Mutex::new(Vec::new()),
    });
    let (_dir, player) = prepared_with(listener.clone());

    player.seek_to(1000).unwrap();
    assert!(wait_until(|| listener.stop_result.lock().is_some()));
    assert_eq!(player.current_position_ms(), 2000);
    assert_eq!(*listener.positions.lock(), vec![0, 1000, 2000]);

    // 工作线程上不能 join 自己
    assert!(matches!(
        listener.stop_result.lock().take(),
        Some(Err(PlayerError::CalledFromWorker("stop")))
    ));
    player.stop().unwrap();
    assert_eq!(player.state(), PlaybackState::Stopped);
}

/// 解码若干次后开始失败的解码器
struct FailingDecoder {
    inner: Box<dyn VideoDecoder>,
    remaining: usize,
}

impl VideoDecoder for FailingDecoder {
    fn configure(
        &mut self,
        format: &TrackFormat,
        target: Arc<dyn RenderTarget>,
    ) -> Result<(), MediaError> {
        self.inner.configure(format, target)
    }

    fn start(&mut self) -> Result<(), MediaError> {
        self.inner.start()
    }

    fn dequeue_input(&mut self, timeout: Duration) -> Result<Option<usize>, MediaError> {
        self.inner.dequeue_input(timeout)
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut Vec<u8>, MediaError> {
        self.inner.input_buffer(index)
    }

    fn queue_input(
        &mut self,
        index: usize,
        size: usize,
        pts_us: i64,
        end_of_stream: bool,
    ) -> Result<(), MediaError> {
        self.inner.queue_input(index, size, pts_us, end_of_stream)
    }

    fn dequeue_output(&mut self, timeout: Duration) -> Result<OutputStatus, MediaError> {
        if self.remaining == 0 {
            return Err(MediaError::Decoder("hardware decoder died".into()));
        }
        self.remaining -= 1;
        self.inner.dequeue_output(timeout)
    }

    fn release_output(&mut self, index: usize, render: bool) -> Result<(), MediaError> {
        self.inner.release_output(index, render)
    }

    fn flush(&mut self) -> Result<(), MediaError> {
        self.inner.flush()
    }

    fn stop(&mut self) -> Result<(), MediaError> {
        self.inner.stop()
    }

    fn release(&mut self) {
        self.inner.release()
    }

    fn eos_recovery(&self) -> EosRecovery {
        self.inner.eos_recovery()
    }
}

struct FailingBackend {
    inner: ContainerBackend,
    fail_after: usize,
}

impl MediaBackend for FailingBackend {
    fn probe(&self, path: &Path) -> Result<MediaInfo, MediaError> {
        self.inner.probe(path)
    }

    fn open_demuxer(&self, path: &Path) -> Result<Box<dyn Demuxer>, MediaError> {
        self.inner.open_demuxer(path)
    }

    fn create_decoder(&self, mime: &str) -> Result<Box<dyn VideoDecoder>, MediaError> {
        Ok(Box::new(FailingDecoder {
            inner: self.inner.create_decoder(mime)?,
            remaining: self.fail_after,
        }))
    }
}

fn prepared_failing(listener: Arc<dyn PlayerListener>) -> (TempDir, FramePlayer) {
    let dir = tempfile::tempdir().unwrap();
    let path = write_clip(&dir, "clip.frm", &SynthOptions::default());
    let backend = FailingBackend {
        inner: ContainerBackend::new(),
        fail_after: 10,
    };
    let player = FramePlayer::with_listener(Arc::new(backend), listener);
    player.set_render_target(Arc::new(RecordingTarget::default()));
    player.set_data_source(&path).unwrap();
    player.prepare().unwrap();
    (dir, player)
}

/// 处理所有错误的监听器
#[derive(Default)]
struct HandlingListener {
    errors: Mutex<Vec<(ErrorKind, ErrorKind)>>,
}

impl PlayerListener for HandlingListener {
    fn on_error(&self, what: ErrorKind, extra: ErrorKind) -> bool {
        self.errors.lock().push((what, extra));
        true
    }
}

#[test]
fn test_handled_decoder_error_keeps_state() {
    let listener = Arc::new(HandlingListener::default());
    let (_dir, player) = prepared_failing(listener.clone());

    player.start().unwrap();
    assert!(wait_until(|| !listener.errors.lock().is_empty()));
    assert_eq!(
        *listener.errors.lock(),
        vec![(ErrorKind::ServerDied, ErrorKind::Unknown)]
    );
    assert_eq!(player.state(), PlaybackState::Started);

    player.stop().unwrap();
    assert_eq!(player.state(), PlaybackState::Stopped);
}

#[test]
fn test_unhandled_decoder_error_enters_error_state() {
    let (listener, events) = ChannelListener::unbounded();
    let (_dir, player) = prepared_failing(Arc::new(listener));

    player.start().unwrap();
    let error = PlayerEvent::Error {
        what: ErrorKind::ServerDied,
        extra: ErrorKind::Unknown,
    };
    assert!(std::iter::from_fn(|| events.recv_timeout(WAIT).ok()).any(|e| e == error));
    assert!(wait_until(|| player.state() == PlaybackState::Error));
    assert!(matches!(
        player.start(),
        Err(PlayerError::InvalidState { op: "start", .. })
    ));

    player.reset().unwrap();
    assert_eq!(player.state(), PlaybackState::Idle);
}

/// 第一次 seek 完成回调阻塞到放行为止
struct GatedListener {
    blocked: Sender<()>,
    gate: Receiver<()>,
    completions: AtomicUsize,
}

impl GatedListener {
    fn new() -> (Arc<Self>, Receiver<()>, Sender<()>) {
        let (blocked, blocked_rx) = crossbeam_channel::unbounded();
        let (release, gate) = crossbeam_channel::unbounded();
        let listener = Arc::new(Self {
            blocked,
            gate,
            completions: AtomicUsize::new(0),
        });
        (listener, blocked_rx, release)
    }

    fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }
}

impl PlayerListener for GatedListener {
    fn on_seek_complete(&self) {
        if self.completions.fetch_add(1, Ordering::SeqCst) == 0 {
            let _ = self.blocked.send(());
            let _ = self.gate.recv_timeout(WAIT);
        }
    }
}

/// 工作线程阻塞在第一次 seek 的完成回调中
fn gated_player(
    listener: Arc<GatedListener>,
    blocked: &Receiver<()>,
) -> (TempDir, FramePlayer, Arc<RecordingTarget>) {
    let dir = tempfile::tempdir().unwrap();
    let path = write_clip(&dir, "clip.frm", &SynthOptions::default());
    let player = FramePlayer::with_listener(Arc::new(ContainerBackend::new()), listener);
    let target = Arc::new(RecordingTarget::default());
    player.set_render_target(target.clone());
    player.set_data_source(&path).unwrap();
    player.prepare().unwrap();

    player.seek_to(5000).unwrap();
    blocked.recv_timeout(WAIT).unwrap();
    (dir, player, target)
}

#[test]
fn test_queued_forward_seek_superseded_by_backward_seek() {
    let (listener, blocked, release) = GatedListener::new();
    let (_dir, player, target) = gated_player(listener.clone(), &blocked);
    assert_eq!(target.last(), Some((5_000_000, 150)));

    player.seek_to_without_callback(8000).unwrap();
    player.seek_to_without_callback(2000).unwrap();
    release.send(()).unwrap();

    assert!(wait_until(|| listener.completions() == 2));
    assert!(wait_until(|| !player.is_seeking()));
    assert_eq!(target.last(), Some((2_000_000, 60)));
    assert_eq!(player.current_position_ms(), 2000);
    // 被覆盖的前向 seek 没有渲染任何帧
    assert!(!target.frames.lock().iter().any(|f| f.1 == 240));
}

#[test]
fn test_coalesced_seeks_complete_once() {
    let (listener, blocked, release) = GatedListener::new();
    let (_dir, player, target) = gated_player(listener.clone(), &blocked);

    for ms in [2000, 2005, 2010] {
        player.seek_to_without_callback(ms).unwrap();
    }
    release.send(()).unwrap();

    assert!(wait_until(|| listener.completions() == 2));
    assert!(wait_until(|| !player.is_seeking()));
    thread::sleep(Duration::from_millis(200));
    assert_eq!(listener.completions(), 2);
    assert_eq!(player.current_position_ms(), 2000);
    assert_eq!(target.last(), Some((2_000_000, 60)));
}
