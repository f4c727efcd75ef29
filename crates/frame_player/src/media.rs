//! 外部协作者接口：媒体探测、解复用器、解码器、渲染目标
//!
//! 播放核心只通过这些 trait 驱动具体后端，后端可以是硬件解码器，
//! 也可以是 [`crate::ContainerBackend`] 这样的软件实现。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::ErrorKind;

const VIDEO_MIME_PREFIX: &str = "video/";

/// 协作者错误
#[derive(thiserror::Error, Debug)]
pub enum MediaError {
    #[error("Source not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Container error: {0}")]
    Container(#[from] frame_container::FormatError),
}

impl MediaError {
    /// 错误通知中使用的子错误码
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            MediaError::NotFound(_) | MediaError::Io(_) => ErrorKind::Io,
            MediaError::Container(frame_container::FormatError::Io(_)) => ErrorKind::Io,
            _ => ErrorKind::UnsupportedFormat,
        }
    }
}

/// 静态媒体信息，由探测器一次性给出
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaInfo {
    pub duration_us: i64,
    pub width: u32,
    pub height: u32,
    /// 0/90/180/270
    pub rotation: u32,
    pub total_frames: u64,
    pub per_frame_duration_us: i64,
    pub fps: i64,
    pub keyframe_indexes: Vec<u64>,
}

impl MediaInfo {
    /// 由时长和帧数推导平均帧间隔与帧率
    pub fn from_stream(
        duration_us: i64,
        total_frames: u64,
        width: u32,
        height: u32,
        rotation: u32,
        keyframe_indexes: Vec<u64>,
    ) -> Result<Self, MediaError> {
        if total_frames == 0 {
            return Err(MediaError::UnsupportedFormat("video track has no samples".into()));
        }
        let per_frame_duration_us = duration_us / total_frames as i64;
        if per_frame_duration_us <= 0 {
            return Err(MediaError::UnsupportedFormat("invalid frame duration".into()));
        }

        Ok(Self {
            duration_us,
            width,
            height,
            rotation,
            total_frames,
            per_frame_duration_us,
            fps: 1_000_000 / per_frame_duration_us,
            keyframe_indexes,
        })
    }

    /// 估算的关键帧间隔：大于该距离的前向 seek 才值得做容器级跳转
    pub fn estimated_keyframe_interval_us(&self) -> i64 {
        self.per_frame_duration_us * self.fps
    }

    /// 两个时间戳相差不到半帧即视为同一帧
    pub fn identical_frame_window_us(&self) -> i64 {
        self.per_frame_duration_us / 2
    }
}

/// 轨道格式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFormat {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    /// 旋转提示，交给解码器前会被清零
    pub rotation: Option<u32>,
    pub frame_rate: Option<u32>,
}

impl TrackFormat {
    pub fn is_video(&self) -> bool {
        self.mime.starts_with(VIDEO_MIME_PREFIX)
    }
}

/// 解复用器 seek 策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekPolicy {
    /// 目标时间之前（含）最近的同步样本
    NearestBefore,
    /// 距离目标最近的同步样本
    Nearest,
}

/// 解复用器：单轨道的顺序样本读取
pub trait Demuxer: Send {
    fn track_count(&self) -> usize;

    fn track_format(&self, index: usize) -> Result<TrackFormat, MediaError>;

    fn select_track(&mut self, index: usize) -> Result<(), MediaError>;

    fn seek(&mut self, timestamp_us: i64, policy: SeekPolicy) -> Result<(), MediaError>;

    /// 读取当前样本到 `buf`，流结束时返回 `None`
    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<Option<usize>, MediaError>;

    /// 当前样本的时间戳，流结束时返回 `None`
    fn sample_timestamp(&self) -> Option<i64>;

    /// 前进到下一个样本，没有更多样本时返回 false
    fn advance(&mut self) -> bool;

    fn release(&mut self);
}

/// 解码输出的一帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFrame {
    pub index: usize,
    pub pts_us: i64,
    pub end_of_stream: bool,
}

/// `dequeue_output` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStatus {
    Frame(OutputFrame),
    FormatChanged,
    BuffersChanged,
    TryAgainLater,
}

/// 到达流末尾后解码器的恢复方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EosRecovery {
    /// flush 即可恢复输出
    Flush,
    /// 必须 stop + release + 重新创建
    Restart,
}

/// 解码器
pub trait VideoDecoder: Send {
    fn configure(
        &mut self,
        format: &TrackFormat,
        target: Arc<dyn RenderTarget>,
    ) -> Result<(), MediaError>;

    fn start(&mut self) -> Result<(), MediaError>;

    /// 申请一个空闲输入缓冲
    fn dequeue_input(&mut self, timeout: Duration) -> Result<Option<usize>, MediaError>;

    fn input_buffer(&mut self, index: usize) -> Result<&mut Vec<u8>, MediaError>;

    fn queue_input(
        &mut self,
        index: usize,
        size: usize,
        pts_us: i64,
        end_of_stream: bool,
    ) -> Result<(), MediaError>;

    fn dequeue_output(&mut self, timeout: Duration) -> Result<OutputStatus, MediaError>;

    /// 归还输出缓冲，`render` 为 true 时写入渲染目标
    fn release_output(&mut self, index: usize, render: bool) -> Result<(), MediaError>;

    /// 丢弃所有在途数据，保留配置
    fn flush(&mut self) -> Result<(), MediaError>;

    fn stop(&mut self) -> Result<(), MediaError>;

    fn release(&mut self);

    /// 部分解码器在输出 EOS 后 flush 不能可靠恢复输出，默认要求重建
    fn eos_recovery(&self) -> EosRecovery {
        EosRecovery::Restart
    }
}

/// 渲染到目标上的一帧
#[derive(Debug, Clone, Copy)]
pub struct RenderedFrame<'a> {
    pub pts_us: i64,
    pub width: u32,
    pub height: u32,
    pub data: &'a [u8],
}

/// 渲染目标，解码器在 `release_output(_, true)` 时写入
pub trait RenderTarget: Send + Sync {
    fn present(&self, frame: &RenderedFrame<'_>);
}

/// 后端：准备阶段所需的探测器、解复用器和解码器工厂
pub trait MediaBackend: Send + Sync {
    fn probe(&self, path: &Path) -> Result<MediaInfo, MediaError>;

    fn open_demuxer(&self, path: &Path) -> Result<Box<dyn Demuxer>, MediaError>;

    fn create_decoder(&self, mime: &str) -> Result<Box<dyn VideoDecoder>, MediaError>;
}

/// 选择第一个视频轨道
pub fn select_video_track(demuxer: &dyn Demuxer) -> Result<Option<usize>, MediaError> {
    for i in 0..demuxer.track_count() {
        if demuxer.track_format(i)?.is_video() {
            return Ok(Some(i));
        }
    }
    Ok(None)
}
