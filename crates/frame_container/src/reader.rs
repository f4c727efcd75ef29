//! 容器读取器

use std::io::{Read, Seek, SeekFrom};

use crate::{ContainerHeaderV1, FormatError, IndexEntryV1, SampleIndexV1, SampleRecordHeaderV1};

/// 容器读取器
pub struct FrameReader<R: Read + Seek> {
    inner: R,
    pub header: ContainerHeaderV1,
    pub index: SampleIndexV1,
}

impl<R: Read + Seek> FrameReader<R> {
    /// 打开容器，读取头部与样本索引
    pub fn open(mut inner: R) -> Result<Self, FormatError> {
        inner.seek(SeekFrom::Start(0))?;
        let header = ContainerHeaderV1::read_from(&mut inner)?;

        if header.index_offset < header.data_start_offset() {
            return Err(FormatError::CorruptIndex("index_offset inside header"));
        }

        inner.seek(SeekFrom::Start(header.index_offset))?;
        let mut raw = vec![0u8; SampleIndexV1::byte_len(header.sample_count as usize)];
        inner.read_exact(&mut raw)?;
        let index = SampleIndexV1::parse(&raw)?;

        if index.len() != header.sample_count as usize {
            return Err(FormatError::CorruptIndex("entry_count != sample_count"));
        }

        Ok(Self {
            inner,
            header,
            index,
        })
    }

    /// 读取指定样本的负载到 `buf`，返回负载长度
    pub fn read_sample_into(
        &mut self,
        entry: &IndexEntryV1,
        buf: &mut Vec<u8>,
    ) -> Result<usize, FormatError> {
        self.inner.seek(SeekFrom::Start(entry.file_offset))?;

        let record = SampleRecordHeaderV1::read_from(&mut self.inner)?;
        if record.payload_len != entry.payload_len || record.pts_us != entry.pts_us {
            return Err(FormatError::CorruptIndex("record does not match index entry"));
        }

        let len = record.payload_len as usize;
        buf.clear();
        buf.resize(len, 0);
        self.inner.read_exact(buf)?;

        if crc32fast::hash(buf) != record.crc32 {
            return Err(FormatError::ChecksumMismatch(record.seq));
        }

        Ok(len)
    }

    /// 读取指定样本
    pub fn read_sample(&mut self, entry: &IndexEntryV1) -> Result<Vec<u8>, FormatError> {
        let mut buf = Vec::with_capacity(entry.payload_len as usize);
        self.read_sample_into(entry, &mut buf)?;
        Ok(buf)
    }

    /// 获取内部 reader
    pub fn into_inner(self) -> R {
        self.inner
    }
}
