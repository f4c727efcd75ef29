//! 工作线程：消息循环、逐帧推进与 seek

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::engine::Shared;
use crate::pipeline::Pipeline;
use crate::{
    ControlMessage, ErrorKind, MediaError, MediaInfo, OutputFrame, OutputStatus, PlaybackState,
    SeekPolicy,
};

/// 最近一次取出的解码帧
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FrameInfo {
    pts_us: i64,
    end_of_stream: bool,
}

/// 两个时间戳相差不到半帧即视为同一帧
fn is_same_frame(a_us: i64, b_us: i64, window_us: i64) -> bool {
    window_us > 0 && a_us.abs_diff(b_us) < window_us as u64
}

/// seek 搜索中 `pts_us` 是否已经到达 `target_us`：不早于目标前半帧，
/// 且没有越过目标一帧以上（越过说明目标在已解码位置之前）
fn reaches_target(pts_us: i64, target_us: i64, window_us: i64, frame_us: i64) -> bool {
    pts_us >= target_us.saturating_sub(window_us) && pts_us < target_us.saturating_add(frame_us)
}

pub(crate) struct Worker {
    shared: Arc<Shared>,
    pipeline: Pipeline,
    media: MediaInfo,
    interrupt_rx: Receiver<()>,
    io_timeout: Duration,
    last_frame: FrameInfo,
    /// 解复用器已经读到末尾，EOS 标志已提交给解码器
    input_eos: bool,
    last_render: Option<Instant>,
}

impl Worker {
    pub(crate) fn new(
        shared: Arc<Shared>,
        pipeline: Pipeline,
        media: MediaInfo,
        interrupt_rx: Receiver<()>,
    ) -> Self {
        let io_timeout = shared.config.io_timeout();
        Self {
            shared,
            pipeline,
            media,
            interrupt_rx,
            io_timeout,
            last_frame: FrameInfo::default(),
            input_eos: false,
            last_render: None,
        }
    }

    /// 线程入口
    pub(crate) fn run(mut self) {
        log::debug!("playback loop started");
        if let Err(e) = self.work_loop() {
            if self.stopped() {
                log::debug!("playback loop failed during teardown: {}", e);
            } else {
                log::error!("playback loop failed: {}", e);
                self.shared
                    .report_error(ErrorKind::ServerDied, ErrorKind::Unknown);
            }
        }
        self.pipeline.release();
        log::debug!("exit playback loop");
    }

    fn stopped(&self) -> bool {
        self.shared.stop_requested()
    }

    fn work_loop(&mut self) -> Result<(), MediaError> {
        while !self.stopped() {
            let message = match self.shared.queue.poll() {
                Some(message) => message,
                None => {
                    if self.shared.state() == PlaybackState::Started {
                        self.playback_step()?;
                        continue;
                    }
                    // 非播放状态下等待命令
                    match self.shared.queue.take() {
                        Some(message) => message,
                        None => break,
                    }
                }
            };

            // 紧跟着一个更早的 seek 时，放弃当前这个
            if let Some(target) = message.seek_target() {
                let next = self.shared.queue.peek().and_then(|m| m.seek_target());
                if let Some(next) = next.filter(|next| *next < target) {
                    log::debug!("skip seek to {} in favor of {}", target, next);
                    continue;
                }
            }

            if !self.process_message(message)? {
                break;
            }
        }
        Ok(())
    }

    /// 返回 false 表示工作线程应当退出
    fn process_message(&mut self, message: ControlMessage) -> Result<bool, MediaError> {
        match message {
            ControlMessage::Play => self.start_internal()?,
            ControlMessage::Pause => self.shared.set_state(PlaybackState::Paused),
            ControlMessage::Seek(target) => self.seek_internal(target)?,
            _ => {
                debug_assert!(message.is_teardown());
                log::debug!("{:?} received by worker", message);
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn start_internal(&mut self) -> Result<(), MediaError> {
        if self.last_frame.end_of_stream {
            log::debug!("play from beginning");
            self.seek_demuxer(0, SeekPolicy::Nearest)?;
            self.pipeline.recover_from_eos()?;
            self.reset_position_info();
        }
        self.shared.set_state(PlaybackState::Started);
        Ok(())
    }

    fn reset_position_info(&mut self) {
        self.last_frame = FrameInfo::default();
        self.last_render = None;
        self.shared.decoder_eos.store(false, Ordering::SeqCst);
        self.shared.reset_position();
    }

    fn seek_demuxer(&mut self, timestamp_us: i64, policy: SeekPolicy) -> Result<(), MediaError> {
        self.pipeline.seek_demuxer(timestamp_us, policy)?;
        self.input_eos = false;
        Ok(())
    }

    /// 解码器已离开 EOS 状态
    fn clear_decoder_eos(&mut self) {
        self.last_frame.end_of_stream = false;
        self.shared.decoder_eos.store(false, Ordering::SeqCst);
    }

    /// 向解码器送入一个压缩样本
    fn feed_decoder(&mut self) -> Result<(), MediaError> {
        if self.input_eos {
            return Ok(());
        }

        let Some(index) = self.pipeline.decoder.dequeue_input(self.io_timeout)? else {
            return Ok(());
        };

        let buffer = self.pipeline.decoder.input_buffer(index)?;
        match self.pipeline.demuxer.read_sample(buffer)? {
            Some(size) => {
                let pts_us = self.pipeline.demuxer.sample_timestamp().unwrap_or(0);
                self.pipeline.decoder.queue_input(index, size, pts_us, false)?;
                self.pipeline.demuxer.advance();
            }
            None => {
                log::debug!("input reached end of stream");
                self.pipeline.decoder.queue_input(index, 0, 0, true)?;
                self.input_eos = true;
            }
        }
        Ok(())
    }

    /// 取出一帧解码输出，暂时没有输出时返回 `None`
    fn pull_frame(&mut self) -> Result<Option<OutputFrame>, MediaError> {
        match self.pipeline.decoder.dequeue_output(self.io_timeout)? {
            OutputStatus::Frame(frame) => {
                self.last_frame = FrameInfo {
                    pts_us: frame.pts_us,
                    end_of_stream: frame.end_of_stream,
                };
                self.shared
                    .decoder_eos
                    .store(frame.end_of_stream, Ordering::SeqCst);
                Ok(Some(frame))
            }
            OutputStatus::FormatChanged => {
                log::debug!("decoder output format changed");
                Ok(None)
            }
            OutputStatus::BuffersChanged => {
                log::debug!("decoder output buffers changed");
                Ok(None)
            }
            OutputStatus::TryAgainLater => Ok(None),
        }
    }

    /// 等待到下一帧的显示时间；被中断时提前返回
    fn pace(&self, wait: Duration) {
        match self.interrupt_rx.recv_timeout(wait) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::trace!("pacing wait interrupted");
            }
        }
    }

    fn complete_playback(&mut self) {
        let duration_us = self.media.duration_us;
        self.shared.set_position(duration_us);
        self.shared.notifier.position(duration_us);
        self.shared.set_state(PlaybackState::PlaybackCompleted);
    }

    /// 播放状态下的一步：送样本、取帧、按时间戳节奏渲染
    fn playback_step(&mut self) -> Result<(), MediaError> {
        // 两种情况：正常播放到结尾，或 seek 到了结尾
        if self.last_frame.end_of_stream {
            self.complete_playback();
            return Ok(());
        }

        let prev_pts_us = self.last_frame.pts_us;
        self.feed_decoder()?;
        let Some(frame) = self.pull_frame()? else {
            return Ok(());
        };

        if let Some(last_render) = self.last_render {
            let elapsed_us = last_render.elapsed().as_micros() as i64;
            let wait_us = frame.pts_us - (prev_pts_us + elapsed_us);
            if wait_us > 0 {
                self.pace(Duration::from_micros(wait_us as u64));
            }
        }

        self.pipeline.decoder.release_output(frame.index, true)?;
        self.last_render = Some(Instant::now());

        if frame.end_of_stream {
            self.complete_playback();
        } else {
            self.shared.set_position(frame.pts_us);
            self.shared.notifier.position(frame.pts_us);
        }
        Ok(())
    }

    fn seek_internal(&mut self, target_us: i64) -> Result<(), MediaError> {
        let window_us = self.media.identical_frame_window_us();
        if is_same_frame(self.shared.position(), target_us, window_us) {
            log::debug!("seek to {} already satisfied", target_us);
            self.shared.finish_seek(target_us);
            return Ok(());
        }

        // 先把位置设为目标，seek 过程中查询到的位置与请求一致
        self.shared.set_position(target_us);

        let seek_interval_us = target_us - self.last_frame.pts_us;
        // 部分解码器在 EOS 后给出的时间戳为 0，这种情况也按后向 seek 处理
        let backward = seek_interval_us < 0
            || (self.last_frame.end_of_stream && self.last_frame.pts_us == 0);

        if backward {
            log::debug!("backward seek to {}", target_us);
            self.seek_demuxer(target_us, SeekPolicy::NearestBefore)?;
            if self.last_frame.end_of_stream {
                self.pipeline.recover_from_eos()?;
            } else {
                self.pipeline.decoder.flush()?;
            }
            self.clear_decoder_eos();
        } else {
            if self.last_frame.end_of_stream {
                log::debug!("forward seek to {} ignored, decoder at end of stream", target_us);
                self.shared.finish_seek(target_us);
                return Ok(());
            }
            // 只有跨过下一个关键帧时才做容器级跳转，否则顺序解码过去更便宜
            if seek_interval_us > self.media.estimated_keyframe_interval_us() {
                log::debug!("forward seek to {} via sync sample", target_us);
                self.seek_demuxer(target_us, SeekPolicy::NearestBefore)?;
                self.pipeline.decoder.flush()?;
            } else {
                log::debug!("forward seek to {} by decoding ahead", target_us);
            }
        }

        while !self.stopped() {
            self.feed_decoder()?;
            let Some(frame) = self.pull_frame()? else {
                continue;
            };

            if self.resolve_seek(&frame, target_us, window_us) {
                self.pipeline.decoder.release_output(frame.index, true)?;
                self.last_render = Some(Instant::now());
                self.shared.notifier.seek_complete();
                return Ok(());
            }

            // 跳过的帧不显示，避免闪烁
            self.pipeline.decoder.release_output(frame.index, false)?;
        }
        Ok(())
    }

    /// 判断 `frame` 是否结束本次 seek，并更新位置
    fn resolve_seek(&self, frame: &OutputFrame, target_us: i64, window_us: i64) -> bool {
        let frame_us = self.media.per_frame_duration_us;
        let mut seek = self.shared.seek.lock();

        // 本次 seek 执行期间可能有更新的请求覆盖了目标
        if !frame.end_of_stream
            && reaches_target(frame.pts_us, seek.target_us, window_us, frame_us)
        {
            let drained = self.shared.queue.drain_seeks_after(seek.target_us);
            if drained > 0 {
                log::debug!("dropped {} redundant seek requests", drained);
            }
            seek.in_flight = false;
            self.shared.set_position(frame.pts_us);
            return true;
        }

        // 原始目标之前是同步样本或已解码位置，第一个到达目标的帧即为结果
        let position_us = if frame.end_of_stream {
            self.media.duration_us
        } else if frame.pts_us >= target_us.saturating_sub(window_us) {
            frame.pts_us
        } else {
            return false;
        };

        if seek.target_us == target_us {
            seek.in_flight = false;
        }
        self.shared.set_position(position_us);
        true
    }
}
