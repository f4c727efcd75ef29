//! 文件头定义

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::FormatError;

pub const CONTAINER_MAGIC: [u8; 8] = *b"FRAMECNT";
pub const CONTAINER_VERSION: u16 = 1;
pub const CONTAINER_HEADER_LEN: u16 = 80;
pub const MIME_FIELD_LEN: usize = 28;

/// 容器主头部 (v1, 80 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHeaderV1 {
    pub version: u16,
    pub header_size: u16,
    pub flags: u32,
    pub width: u32,
    pub height: u32,
    /// 显示旋转角度 (0/90/180/270)
    pub rotation: u16,
    pub duration_us: u64,
    pub sample_count: u32,
    pub index_offset: u64,
    pub mime: String,
}

impl ContainerHeaderV1 {
    pub fn new(mime: &str, width: u32, height: u32, rotation: u16) -> Self {
        Self {
            version: CONTAINER_VERSION,
            header_size: CONTAINER_HEADER_LEN,
            flags: 0,
            width,
            height,
            rotation,
            duration_us: 0,
            sample_count: 0,
            index_offset: 0,
            mime: mime.to_string(),
        }
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, FormatError> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if magic != CONTAINER_MAGIC {
            return Err(FormatError::InvalidMagic);
        }

        let version = r.read_u16::<LittleEndian>()?;
        if version != CONTAINER_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }

        let header_size = r.read_u16::<LittleEndian>()?;
        if header_size != CONTAINER_HEADER_LEN {
            return Err(FormatError::InvalidHeaderSize(header_size));
        }

        let flags = r.read_u32::<LittleEndian>()?;
        let width = r.read_u32::<LittleEndian>()?;
        let height = r.read_u32::<LittleEndian>()?;
        let rotation = r.read_u16::<LittleEndian>()?;
        let _reserved0 = r.read_u16::<LittleEndian>()?;
        let duration_us = r.read_u64::<LittleEndian>()?;
        let sample_count = r.read_u32::<LittleEndian>()?;
        let _reserved1 = r.read_u32::<LittleEndian>()?;
        let index_offset = r.read_u64::<LittleEndian>()?;

        let mut mime_raw = [0u8; MIME_FIELD_LEN];
        r.read_exact(&mut mime_raw)?;
        let end = mime_raw
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(MIME_FIELD_LEN);
        let mime = String::from_utf8_lossy(&mime_raw[..end]).into_owned();

        Ok(Self {
            version,
            header_size,
            flags,
            width,
            height,
            rotation,
            duration_us,
            sample_count,
            index_offset,
            mime,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), FormatError> {
        let mime = self.mime.as_bytes();
        if mime.len() > MIME_FIELD_LEN {
            return Err(FormatError::MimeTooLong(self.mime.clone()));
        }
        let mut mime_raw = [0u8; MIME_FIELD_LEN];
        mime_raw[..mime.len()].copy_from_slice(mime);

        w.write_all(&CONTAINER_MAGIC)?;
        w.write_u16::<LittleEndian>(self.version)?;
        w.write_u16::<LittleEndian>(self.header_size)?;
        w.write_u32::<LittleEndian>(self.flags)?;
        w.write_u32::<LittleEndian>(self.width)?;
        w.write_u32::<LittleEndian>(self.height)?;
        w.write_u16::<LittleEndian>(self.rotation)?;
        w.write_u16::<LittleEndian>(0)?; // reserved0
        w.write_u64::<LittleEndian>(self.duration_us)?;
        w.write_u32::<LittleEndian>(self.sample_count)?;
        w.write_u32::<LittleEndian>(0)?; // reserved1
        w.write_u64::<LittleEndian>(self.index_offset)?;
        w.write_all(&mime_raw)?;
        Ok(())
    }

    /// 样本数据起始偏移
    pub fn data_start_offset(&self) -> u64 {
        CONTAINER_HEADER_LEN as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_size_matches_constant() {
        let header = ContainerHeaderV1::new("video/x-frame", 640, 360, 90);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), CONTAINER_HEADER_LEN as usize);

        let parsed = ContainerHeaderV1::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut buf = vec![0u8; CONTAINER_HEADER_LEN as usize];
        buf[..8].copy_from_slice(b"NOTFRAME");
        let result = ContainerHeaderV1::read_from(&mut Cursor::new(&buf));
        assert!(matches!(result, Err(FormatError::InvalidMagic)));
    }

    #[test]
    fn test_rejects_long_mime() {
        let header = ContainerHeaderV1::new("video/an-extremely-long-codec-name", 1, 1, 0);
        let result = header.write_to(&mut Vec::new());
        assert!(matches!(result, Err(FormatError::MimeTooLong(_))));
    }
}
