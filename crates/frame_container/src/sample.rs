//! 样本记录定义

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::FormatError;

pub const SAMPLE_MAGIC: [u8; 4] = *b"SMPL";
pub const SAMPLE_HEADER_LEN: u16 = 28;

/// 样本标志位
pub mod sample_flags {
    /// 同步样本（关键帧），可作为 seek 落点
    pub const FLAG_SYNC: u8 = 0x01;
}

/// 样本记录头 (v1, 28 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecordHeaderV1 {
    pub header_len: u16,
    pub flags: u8,
    pub seq: u32,
    pub pts_us: i64,
    pub payload_len: u32,
    pub crc32: u32,
}

impl SampleRecordHeaderV1 {
    pub fn new(seq: u32, pts_us: i64, flags: u8, payload: &[u8]) -> Self {
        Self {
            header_len: SAMPLE_HEADER_LEN,
            flags,
            seq,
            pts_us,
            payload_len: payload.len() as u32,
            crc32: crc32fast::hash(payload),
        }
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, FormatError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != SAMPLE_MAGIC {
            return Err(FormatError::InvalidSampleMagic);
        }

        let header_len = r.read_u16::<LittleEndian>()?;
        let flags = r.read_u8()?;
        let _reserved0 = r.read_u8()?;
        let seq = r.read_u32::<LittleEndian>()?;
        let pts_us = r.read_i64::<LittleEndian>()?;
        let payload_len = r.read_u32::<LittleEndian>()?;
        let crc32 = r.read_u32::<LittleEndian>()?;

        if header_len != SAMPLE_HEADER_LEN {
            return Err(FormatError::CorruptIndex("sample header_len != 28"));
        }

        Ok(Self {
            header_len,
            flags,
            seq,
            pts_us,
            payload_len,
            crc32,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), FormatError> {
        w.write_all(&SAMPLE_MAGIC)?;
        w.write_u16::<LittleEndian>(self.header_len)?;
        w.write_u8(self.flags)?;
        w.write_u8(0)?; // reserved0
        w.write_u32::<LittleEndian>(self.seq)?;
        w.write_i64::<LittleEndian>(self.pts_us)?;
        w.write_u32::<LittleEndian>(self.payload_len)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        Ok(())
    }

    pub fn is_sync(&self) -> bool {
        self.flags & sample_flags::FLAG_SYNC != 0
    }

    /// 整条记录长度（header + payload）
    pub fn record_len(&self) -> u64 {
        SAMPLE_HEADER_LEN as u64 + self.payload_len as u64
    }
}
