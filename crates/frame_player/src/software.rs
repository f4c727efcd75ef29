//! 基于 frame_container 文件的软件后端
//!
//! 解码器是直通实现：输出帧的数据就是样本负载，用固定数量的缓冲槽位和
//! 可配置的输出延迟模拟硬件解码流水线。

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use frame_container::FrameReader;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    Demuxer, EosRecovery, MediaBackend, MediaError, MediaInfo, OutputFrame, OutputStatus,
    RenderTarget, RenderedFrame, SeekPolicy, TrackFormat, VideoDecoder,
};

type ContainerReader = FrameReader<BufReader<File>>;

fn open_reader(path: &Path) -> Result<ContainerReader, MediaError> {
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => MediaError::NotFound(path.to_path_buf()),
        _ => MediaError::Io(e),
    })?;
    Ok(FrameReader::open(BufReader::new(file))?)
}

/// 软件解码器参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftwareDecoderConfig {
    /// 缓冲槽位数量
    pub input_slots: usize,
    /// 产生输出前积压的帧数
    pub output_latency: usize,
}

impl Default for SoftwareDecoderConfig {
    fn default() -> Self {
        Self {
            input_slots: 4,
            output_latency: 2,
        }
    }
}

/// frame_container 文件后端
pub struct ContainerBackend {
    decoder_config: SoftwareDecoderConfig,
    /// 探测串行化
    probe_lock: Mutex<()>,
}

impl ContainerBackend {
    pub fn new() -> Self {
        Self::with_decoder_config(SoftwareDecoderConfig::default())
    }

    pub fn with_decoder_config(decoder_config: SoftwareDecoderConfig) -> Self {
        Self {
            decoder_config,
            probe_lock: Mutex::new(()),
        }
    }
}

impl Default for ContainerBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for ContainerBackend {
    fn probe(&self, path: &Path) -> Result<MediaInfo, MediaError> {
        let _guard = self.probe_lock.lock();
        let reader = open_reader(path)?;
        let header = &reader.header;

        if !header.mime.starts_with("video/") {
            return Err(MediaError::UnsupportedFormat(format!(
                "no video track in {}",
                path.display()
            )));
        }

        MediaInfo::from_stream(
            header.duration_us as i64,
            reader.index.len() as u64,
            header.width,
            header.height,
            header.rotation as u32,
            reader.index.sync_indexes(),
        )
    }

    fn open_demuxer(&self, path: &Path) -> Result<Box<dyn Demuxer>, MediaError> {
        Ok(Box::new(ContainerDemuxer::open(path)?))
    }

    fn create_decoder(&self, mime: &str) -> Result<Box<dyn VideoDecoder>, MediaError> {
        if !mime.starts_with("video/") {
            return Err(MediaError::UnsupportedFormat(format!(
                "no decoder for {}",
                mime
            )));
        }
        Ok(Box::new(SoftwareDecoder::new(self.decoder_config.clone())))
    }
}

/// 单轨道解复用器
pub struct ContainerDemuxer {
    path: PathBuf,
    reader: Option<ContainerReader>,
    selected: bool,
    cursor: usize,
}

impl ContainerDemuxer {
    pub fn open(path: &Path) -> Result<Self, MediaError> {
        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(open_reader(path)?),
            selected: false,
            cursor: 0,
        })
    }

    fn reader(&self) -> Result<&ContainerReader, MediaError> {
        self.reader
            .as_ref()
            .ok_or_else(|| MediaError::Decoder(format!("{} is released", self.path.display())))
    }

    fn check_track(&self, index: usize) -> Result<(), MediaError> {
        if index == 0 {
            Ok(())
        } else {
            Err(MediaError::UnsupportedFormat(format!(
                "track {} out of range",
                index
            )))
        }
    }
}

impl Demuxer for ContainerDemuxer {
    fn track_count(&self) -> usize {
        if self.reader.is_some() {
            1
        } else {
            0
        }
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat, MediaError> {
        self.check_track(index)?;
        let reader = self.reader()?;
        let header = &reader.header;

        let frame_rate = match (reader.index.len() as u64, header.duration_us) {
            (n, d) if n > 0 && d > 0 => Some((n * 1_000_000 / d) as u32),
            _ => None,
        };

        Ok(TrackFormat {
            mime: header.mime.clone(),
            width: header.width,
            height: header.height,
            rotation: Some(header.rotation as u32),
            frame_rate,
        })
    }

    fn select_track(&mut self, index: usize) -> Result<(), MediaError> {
        self.check_track(index)?;
        self.reader()?;
        self.selected = true;
        self.cursor = 0;
        Ok(())
    }

    fn seek(&mut self, timestamp_us: i64, policy: SeekPolicy) -> Result<(), MediaError> {
        let index = &self.reader()?.index;
        let target = match policy {
            SeekPolicy::NearestBefore => index.sync_at_or_before(timestamp_us),
            SeekPolicy::Nearest => index.nearest_sync(timestamp_us),
        };
        // 没有同步样本时从头开始
        self.cursor = target.unwrap_or(0);
        Ok(())
    }

    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<Option<usize>, MediaError> {
        if !self.selected {
            return Err(MediaError::Decoder("no track selected".into()));
        }
        let cursor = self.cursor;
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| MediaError::Decoder("demuxer is released".into()))?;

        let Some(entry) = reader.index.entries.get(cursor).copied() else {
            return Ok(None);
        };
        Ok(Some(reader.read_sample_into(&entry, buf)?))
    }

    fn sample_timestamp(&self) -> Option<i64> {
        let reader = self.reader.as_ref()?;
        reader.index.entries.get(self.cursor).map(|e| e.pts_us)
    }

    fn advance(&mut self) -> bool {
        let len = self.reader.as_ref().map_or(0, |r| r.index.len());
        if self.cursor < len {
            self.cursor += 1;
        }
        self.cursor < len
    }

    fn release(&mut self) {
        self.reader = None;
        self.selected = false;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    /// 已交给调用方填充
    Dequeued,
    Decoding,
    /// 已作为输出交给调用方
    Output,
}

struct Slot {
    data: Vec<u8>,
    state: SlotState,
    pts_us: i64,
    end_of_stream: bool,
}

/// 直通解码器
pub struct SoftwareDecoder {
    config: SoftwareDecoderConfig,
    slots: Vec<Slot>,
    decoding: VecDeque<usize>,
    target: Option<Arc<dyn RenderTarget>>,
    width: u32,
    height: u32,
    started: bool,
    format_reported: bool,
    /// 已收到 EOS 输入，flush 之前不再接受输入
    input_closed: bool,
}

impl SoftwareDecoder {
    pub fn new(config: SoftwareDecoderConfig) -> Self {
        let slots = (0..config.input_slots.max(1))
            .map(|_| Slot {
                data: Vec::new(),
                state: SlotState::Free,
                pts_us: 0,
                end_of_stream: false,
            })
            .collect();
        Self {
            config,
            slots,
            decoding: VecDeque::new(),
            target: None,
            width: 0,
            height: 0,
            started: false,
            format_reported: false,
            input_closed: false,
        }
    }

    fn ensure_started(&self) -> Result<(), MediaError> {
        if self.started {
            Ok(())
        } else {
            Err(MediaError::Decoder("decoder is not started".into()))
        }
    }

    fn slot_in(&mut self, index: usize, state: SlotState) -> Result<&mut Slot, MediaError> {
        match self.slots.get_mut(index) {
            Some(slot) if slot.state == state => Ok(slot),
            _ => Err(MediaError::Decoder(format!(
                "buffer {} is not {:?}",
                index, state
            ))),
        }
    }

    fn reset_slots(&mut self) {
        for slot in &mut self.slots {
            slot.state = SlotState::Free;
            slot.end_of_stream = false;
            slot.data.clear();
        }
        self.decoding.clear();
        self.input_closed = false;
    }
}

impl VideoDecoder for SoftwareDecoder {
    fn configure(
        &mut self,
        format: &TrackFormat,
        target: Arc<dyn RenderTarget>,
    ) -> Result<(), MediaError> {
        if !format.is_video() {
            return Err(MediaError::UnsupportedFormat(format.mime.clone()));
        }
        self.width = format.width;
        self.height = format.height;
        self.target = Some(target);
        Ok(())
    }

    fn start(&mut self) -> Result<(), MediaError> {
        if self.target.is_none() {
            return Err(MediaError::Decoder("decoder is not configured".into()));
        }
        self.started = true;
        self.format_reported = false;
        Ok(())
    }

    fn dequeue_input(&mut self, timeout: Duration) -> Result<Option<usize>, MediaError> {
        self.ensure_started()?;
        if self.input_closed {
            return Ok(None);
        }
        // 同一线程内归还缓冲前不会有空位，等满超时再返回
        let Some(index) = self.slots.iter().position(|s| s.state == SlotState::Free) else {
            std::thread::sleep(timeout);
            return Ok(None);
        };
        self.slots[index].state = SlotState::Dequeued;
        Ok(Some(index))
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut Vec<u8>, MediaError> {
        Ok(&mut self.slot_in(index, SlotState::Dequeued)?.data)
    }

    fn queue_input(
        &mut self,
        index: usize,
        size: usize,
        pts_us: i64,
        end_of_stream: bool,
    ) -> Result<(), MediaError> {
        self.ensure_started()?;
        if self.input_closed {
            return Err(MediaError::Decoder("input after end of stream".into()));
        }
        let slot = self.slot_in(index, SlotState::Dequeued)?;
        if size > slot.data.len() {
            return Err(MediaError::Decoder(format!(
                "input size {} exceeds buffer {}",
                size,
                slot.data.len()
            )));
        }
        slot.data.truncate(size);
        slot.pts_us = pts_us;
        slot.end_of_stream = end_of_stream;
        slot.state = SlotState::Decoding;

        self.decoding.push_back(index);
        self.input_closed = end_of_stream;
        Ok(())
    }

    fn dequeue_output(&mut self, timeout: Duration) -> Result<OutputStatus, MediaError> {
        self.ensure_started()?;
        if !self.format_reported {
            self.format_reported = true;
            return Ok(OutputStatus::FormatChanged);
        }

        // EOS 之后排空流水线
        let ready = self.input_closed || self.decoding.len() > self.config.output_latency;
        let Some(index) = self.decoding.front().copied().filter(|_| ready) else {
            std::thread::sleep(timeout);
            return Ok(OutputStatus::TryAgainLater);
        };
        self.decoding.pop_front();

        let slot = &mut self.slots[index];
        slot.state = SlotState::Output;
        Ok(OutputStatus::Frame(OutputFrame {
            index,
            pts_us: slot.pts_us,
            end_of_stream: slot.end_of_stream,
        }))
    }

    fn release_output(&mut self, index: usize, render: bool) -> Result<(), MediaError> {
        let (width, height) = (self.width, self.height);
        let target = self.target.clone();
        let slot = self.slot_in(index, SlotState::Output)?;

        if render && !slot.data.is_empty() {
            if let Some(target) = target {
                target.present(&RenderedFrame {
                    pts_us: slot.pts_us,
                    width,
                    height,
                    data: &slot.data,
                });
            }
        }
        slot.state = SlotState::Free;
        slot.end_of_stream = false;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), MediaError> {
        self.ensure_started()?;
        self.reset_slots();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), MediaError> {
        self.started = false;
        self.reset_slots();
        Ok(())
    }

    fn release(&mut self) {
        self.started = false;
        self.target = None;
        self.reset_slots();
    }

    fn eos_recovery(&self) -> EosRecovery {
        EosRecovery::Restart
    }
}
