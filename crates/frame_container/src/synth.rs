//! 合成测试片段
//!
//! 生成固定帧率、固定 GOP 的片段，负载中携带帧序号，便于校验解码输出。

use std::io::{Seek, Write};

use crate::{FormatError, FrameWriter, StreamParams};

/// 合成片段默认使用的 mime
pub const SYNTH_MIME: &str = "video/x-frame";

/// 合成片段参数
#[derive(Debug, Clone)]
pub struct SynthOptions {
    pub duration_us: u64,
    pub fps: u32,
    /// 每隔多少帧插入一个关键帧
    pub gop: u32,
    pub width: u32,
    pub height: u32,
    pub rotation: u16,
    pub mime: String,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            duration_us: 10_000_000,
            fps: 30,
            gop: 30,
            width: 1280,
            height: 720,
            rotation: 0,
            mime: SYNTH_MIME.to_string(),
        }
    }
}

impl SynthOptions {
    pub fn frame_count(&self) -> u64 {
        self.duration_us * self.fps as u64 / 1_000_000
    }

    /// 第 `frame` 帧的显示时间戳
    pub fn pts_of(&self, frame: u64) -> i64 {
        (frame * 1_000_000 / self.fps.max(1) as u64) as i64
    }
}

/// 负载：帧序号 (LE u64) + 固定图案
pub fn synth_payload(frame: u64) -> Vec<u8> {
    let mut payload = frame.to_le_bytes().to_vec();
    payload.extend((0..24u8).map(|i| i.wrapping_mul(31) ^ frame as u8));
    payload
}

/// 从负载中取回帧序号
pub fn synth_frame_number(payload: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = payload.get(..8)?.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

/// 写入合成片段
pub fn write_synthetic_clip<W: Write + Seek>(
    inner: W,
    options: &SynthOptions,
) -> Result<W, FormatError> {
    let params = StreamParams {
        mime: options.mime.clone(),
        width: options.width,
        height: options.height,
        rotation: options.rotation,
    };
    let mut writer = FrameWriter::create(inner, &params)?;

    let gop = options.gop.max(1) as u64;
    for frame in 0..options.frame_count() {
        let sync = frame % gop == 0;
        writer.write_sample(options.pts_of(frame), sync, &synth_payload(frame))?;
    }

    writer.finish(options.duration_us)
}
