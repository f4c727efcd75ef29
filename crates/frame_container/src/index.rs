//! 样本索引定义

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

use crate::{sample_flags, FormatError};

pub const INDEX_MAGIC: [u8; 8] = *b"FRAMEIDX";
pub const INDEX_VERSION: u16 = 1;
pub const INDEX_HEADER_LEN: usize = 16;
pub const INDEX_ENTRY_LEN: usize = 32;

/// 索引条目 (v1, 32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntryV1 {
    pub pts_us: i64,
    pub file_offset: u64,
    pub payload_len: u32,
    pub crc32: u32,
    pub flags: u8,
}

impl IndexEntryV1 {
    pub fn is_sync(&self) -> bool {
        self.flags & sample_flags::FLAG_SYNC != 0
    }
}

/// 样本索引，条目按解码顺序排列
#[derive(Debug, Clone, Default)]
pub struct SampleIndexV1 {
    pub entries: Vec<IndexEntryV1>,
}

impl SampleIndexV1 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&mut self, entry: IndexEntryV1) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 序列化后的总长度
    pub fn byte_len(entry_count: usize) -> usize {
        INDEX_HEADER_LEN + entry_count * INDEX_ENTRY_LEN
    }

    /// 从字节解析
    pub fn parse(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() < INDEX_HEADER_LEN {
            return Err(FormatError::CorruptIndex("index too short"));
        }

        let mut cur = Cursor::new(data);

        let mut magic = [0u8; 8];
        cur.read_exact(&mut magic)?;
        if magic != INDEX_MAGIC {
            return Err(FormatError::InvalidIndexMagic);
        }

        let version = cur.read_u16::<LittleEndian>()?;
        if version != INDEX_VERSION {
            return Err(FormatError::UnsupportedIndexVersion(version));
        }
        let _reserved0 = cur.read_u16::<LittleEndian>()?;
        let entry_count = cur.read_u32::<LittleEndian>()? as usize;

        if data.len() < Self::byte_len(entry_count) {
            return Err(FormatError::CorruptIndex("index truncated"));
        }

        let mut entries = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            let pts_us = cur.read_i64::<LittleEndian>()?;
            let file_offset = cur.read_u64::<LittleEndian>()?;
            let payload_len = cur.read_u32::<LittleEndian>()?;
            let crc32 = cur.read_u32::<LittleEndian>()?;
            let flags = cur.read_u8()?;
            let mut reserved = [0u8; 7];
            cur.read_exact(&mut reserved)?;

            entries.push(IndexEntryV1 {
                pts_us,
                file_offset,
                payload_len,
                crc32,
                flags,
            });
        }

        Ok(Self { entries })
    }

    /// 序列化为字节
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::byte_len(self.entries.len()));

        buf.extend_from_slice(&INDEX_MAGIC);
        buf.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());

        for entry in &self.entries {
            // Vec<u8> 的写入不会失败
            let _ = buf.write_i64::<LittleEndian>(entry.pts_us);
            let _ = buf.write_u64::<LittleEndian>(entry.file_offset);
            let _ = buf.write_u32::<LittleEndian>(entry.payload_len);
            let _ = buf.write_u32::<LittleEndian>(entry.crc32);
            buf.push(entry.flags);
            buf.extend_from_slice(&[0u8; 7]);
        }

        buf
    }

    /// 所有同步样本的序号
    pub fn sync_indexes(&self) -> Vec<u64> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_sync())
            .map(|(i, _)| i as u64)
            .collect()
    }

    /// pts 不晚于 `pts_us` 的最后一个同步样本；目标早于首个同步样本时退回到第一个同步样本
    pub fn sync_at_or_before(&self, pts_us: i64) -> Option<usize> {
        let mut found = None;
        for (i, entry) in self.entries.iter().enumerate() {
            if !entry.is_sync() {
                continue;
            }
            if entry.pts_us <= pts_us || found.is_none() {
                found = Some(i);
            }
            if entry.pts_us > pts_us {
                break;
            }
        }
        found
    }

    /// 与 `pts_us` 距离最近的同步样本，距离相同时取较早者
    pub fn nearest_sync(&self, pts_us: i64) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_sync())
            .min_by_key(|(_, e)| e.pts_us.abs_diff(pts_us))
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pts_us: i64, sync: bool) -> IndexEntryV1 {
        IndexEntryV1 {
            pts_us,
            file_offset: 0,
            payload_len: 0,
            crc32: 0,
            flags: if sync { sample_flags::FLAG_SYNC } else { 0 },
        }
    }

    fn gop_index() -> SampleIndexV1 {
        // 关键帧位于 0, 400, 800
        let mut index = SampleIndexV1::new();
        for i in 0..12 {
            index.add_entry(entry(i * 100, i % 4 == 0));
        }
        index
    }

    #[test]
    fn test_sync_at_or_before() {
        let index = gop_index();
        assert_eq!(index.sync_at_or_before(0), Some(0));
        assert_eq!(index.sync_at_or_before(399), Some(0));
        assert_eq!(index.sync_at_or_before(400), Some(4));
        assert_eq!(index.sync_at_or_before(1_000_000), Some(8));
        // 早于第一个样本
        assert_eq!(index.sync_at_or_before(-50), Some(0));
    }

    #[test]
    fn test_nearest_sync() {
        let index = gop_index();
        assert_eq!(index.nearest_sync(150), Some(0));
        assert_eq!(index.nearest_sync(250), Some(4));
        assert_eq!(index.nearest_sync(200), Some(0));
        assert_eq!(index.nearest_sync(5000), Some(8));
    }

    #[test]
    fn test_no_sync_samples() {
        let mut index = SampleIndexV1::new();
        index.add_entry(entry(0, false));
        assert_eq!(index.sync_at_or_before(0), None);
        assert_eq!(index.nearest_sync(0), None);
    }

    #[test]
    fn test_parse_rejects_truncated() {
        let index = gop_index();
        let bytes = index.to_bytes();
        assert_eq!(bytes.len(), SampleIndexV1::byte_len(12));

        let parsed = SampleIndexV1::parse(&bytes).unwrap();
        assert_eq!(parsed.entries, index.entries);
        assert_eq!(parsed.sync_indexes(), vec![0, 4, 8]);

        let result = SampleIndexV1::parse(&bytes[..bytes.len() - 1]);
        assert!(matches!(result, Err(FormatError::CorruptIndex(_))));
    }
}
