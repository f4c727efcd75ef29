//! 容器写入器

use std::io::{Seek, SeekFrom, Write};

use crate::{
    sample_flags, ContainerHeaderV1, FormatError, IndexEntryV1, SampleIndexV1,
    SampleRecordHeaderV1, CONTAINER_HEADER_LEN,
};

/// 视频流参数
#[derive(Debug, Clone)]
pub struct StreamParams {
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub rotation: u16,
}

/// 容器写入器
pub struct FrameWriter<W: Write + Seek> {
    inner: W,
    header: ContainerHeaderV1,
    index: SampleIndexV1,
    current_offset: u64,
}

impl<W: Write + Seek> FrameWriter<W> {
    /// 创建新容器
    pub fn create(mut inner: W, params: &StreamParams) -> Result<Self, FormatError> {
        let header =
            ContainerHeaderV1::new(&params.mime, params.width, params.height, params.rotation);

        // 写入占位头部（稍后更新）
        inner.seek(SeekFrom::Start(0))?;
        header.write_to(&mut inner)?;

        Ok(Self {
            inner,
            header,
            index: SampleIndexV1::new(),
            current_offset: CONTAINER_HEADER_LEN as u64,
        })
    }

    /// 按解码顺序追加一个样本
    pub fn write_sample(&mut self, pts_us: i64, sync: bool, data: &[u8]) -> Result<(), FormatError> {
        let seq = self.index.len() as u32;
        let flags = if sync { sample_flags::FLAG_SYNC } else { 0 };
        let record = SampleRecordHeaderV1::new(seq, pts_us, flags, data);

        let file_offset = self.current_offset;
        record.write_to(&mut self.inner)?;
        self.inner.write_all(data)?;
        self.current_offset += record.record_len();

        self.index.add_entry(IndexEntryV1 {
            pts_us,
            file_offset,
            payload_len: record.payload_len,
            crc32: record.crc32,
            flags,
        });

        Ok(())
    }

    /// 完成写入（写入索引并更新头部）
    pub fn finish(mut self, duration_us: u64) -> Result<W, FormatError> {
        let index_offset = self.current_offset;
        self.inner.write_all(&self.index.to_bytes())?;

        self.header.duration_us = duration_us;
        self.header.sample_count = self.index.len() as u32;
        self.header.index_offset = index_offset;

        self.inner.seek(SeekFrom::Start(0))?;
        self.header.write_to(&mut self.inner)?;
        self.inner.flush()?;

        Ok(self.inner)
    }
}
