//! frame_container - 视频样本容器格式读写库
//!
//! 文件布局：主头部 | 样本记录 (记录头 + 压缩负载) ... | 样本索引

mod header;
mod index;
mod reader;
mod sample;
mod synth;
mod writer;

pub use header::*;
pub use index::*;
pub use reader::*;
pub use sample::*;
pub use synth::*;
pub use writer::*;

/// 格式错误
#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid container magic")]
    InvalidMagic,

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    #[error("Invalid header size: {0}")]
    InvalidHeaderSize(u16),

    #[error("Invalid sample magic")]
    InvalidSampleMagic,

    #[error("Invalid index magic")]
    InvalidIndexMagic,

    #[error("Unsupported index version: {0}")]
    UnsupportedIndexVersion(u16),

    #[error("Checksum mismatch in sample {0}")]
    ChecksumMismatch(u32),

    #[error("Mime type too long: {0}")]
    MimeTooLong(String),

    #[error("Corrupt index: {0}")]
    CorruptIndex(&'static str),
}
