//! Unit id, file transfer, flash info and unlock records
//!
//! ```text
//! unit id:        serial:u32
//! file request:   data_id:u32 file_type:u16 name\0
//! file header:    size:u32 name\0
//! file data:      offset:u32 bytes...
//! file not found: name\0
//! flash info:     region:u16 total:u32 free:u32
//! unlock:         accepted:u8 [code\0]
//! ```

use crate::datatypes::{RecordReader, RecordWriter};
use crate::error::ParseError;

const NAME_MAX: usize = 255;

/// Bytes of file content that fit in one data packet
pub const FILE_CHUNK_LEN: usize = 248;

/// Serial number record
pub fn decode_unit_id(data: &[u8]) -> Result<u32, ParseError> {
    RecordReader::new(data).u32()
}

pub fn encode_unit_id(serial: u32) -> Vec<u8> {
    RecordWriter::with_capacity(4).u32(serial).finish()
}

/// Request for one file stored on the device
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileRequest {
    pub data_id: u32,
    pub file_type: u16,
    pub name: String,
}

impl FileRequest {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            data_id: 0,
            file_type: 0,
            name: name.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        RecordWriter::new()
            .u32(self.data_id)
            .u16(self.file_type)
            .zstring(&self.name, NAME_MAX)
            .finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self, ParseError> {
        let mut r = RecordReader::new(data);
        r.require(6)?;
        Ok(Self {
            data_id: r.u32()?,
            file_type: r.u16()?,
            name: r.zstring(NAME_MAX),
        })
    }
}

/// Announces a file transfer
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileHeader {
    pub size: u32,
    pub name: String,
}

impl FileHeader {
    pub fn encode(&self) -> Vec<u8> {
        RecordWriter::new()
            .u32(self.size)
            .zstring(&self.name, NAME_MAX)
            .finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self, ParseError> {
        let mut r = RecordReader::new(data);
        Ok(Self {
            size: r.u32()?,
            name: r.zstring(NAME_MAX),
        })
    }
}

/// One run of file content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk<'a> {
    pub offset: u32,
    pub data: &'a [u8],
}

impl<'a> FileChunk<'a> {
    pub fn encode(&self) -> Vec<u8> {
        RecordWriter::with_capacity(4 + self.data.len())
            .u32(self.offset)
            .bytes(self.data)
            .finish()
    }

    pub fn decode(data: &'a [u8]) -> Result<Self, ParseError> {
        let mut r = RecordReader::new(data);
        let offset = r.u32()?;
        Ok(Self {
            offset,
            data: r.rest(),
        })
    }
}

/// Split file content into data packet payloads
pub fn encode_file_chunks(content: &[u8]) -> Vec<Vec<u8>> {
    content
        .chunks(FILE_CHUNK_LEN)
        .enumerate()
        .map(|(i, data)| {
            FileChunk {
                offset: (i * FILE_CHUNK_LEN) as u32,
                data,
            }
            .encode()
        })
        .collect()
}

/// Name of a file the device could not find
pub fn decode_file_not_found(data: &[u8]) -> String {
    RecordReader::new(data).zstring(NAME_MAX)
}

pub fn encode_file_not_found(name: &str) -> Vec<u8> {
    RecordWriter::new().zstring(name, NAME_MAX).finish()
}

/// Collects file data packets into the announced file
#[derive(Debug, Clone, Default)]
pub struct FileAssembler {
    header: Option<FileHeader>,
    buffer: Vec<u8>,
    received: usize,
}

impl FileAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new file; returns the content at once for an empty file
    pub fn begin(&mut self, header: FileHeader) -> Option<Vec<u8>> {
        self.buffer = vec![0u8; header.size as usize];
        self.received = 0;
        let empty = header.size == 0;
        self.header = Some(header);
        if empty {
            self.finish()
        } else {
            None
        }
    }

    pub fn is_active(&self) -> bool {
        self.header.is_some()
    }

    /// Store a chunk; returns the complete content once every byte arrived
    pub fn push(&mut self, chunk: &FileChunk<'_>) -> Option<Vec<u8>> {
        self.header.as_ref()?;
        let start = (chunk.offset as usize).min(self.buffer.len());
        let end = (start + chunk.data.len()).min(self.buffer.len());
        self.buffer[start..end].copy_from_slice(&chunk.data[..end - start]);
        self.received += end - start;
        if self.received >= self.buffer.len() {
            self.finish()
        } else {
            None
        }
    }

    fn finish(&mut self) -> Option<Vec<u8>> {
        self.header = None;
        self.received = 0;
        Some(std::mem::take(&mut self.buffer))
    }

    pub fn reset(&mut self) {
        self.header = None;
        self.buffer.clear();
        self.received = 0;
    }
}

/// Flash memory usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlashInfo {
    pub region: u16,
    pub total_bytes: u32,
    pub free_bytes: u32,
}

impl FlashInfo {
    pub fn used_bytes(&self) -> u32 {
        self.total_bytes.saturating_sub(self.free_bytes)
    }

    pub fn encode(&self) -> Vec<u8> {
        RecordWriter::with_capacity(10)
            .u16(self.region)
            .u32(self.total_bytes)
            .u32(self.free_bytes)
            .finish()
    }

    pub fn decode(data: &[u8]) -> Result<Self, ParseError> {
        let mut r = RecordReader::new(data);
        r.require(10)?;
        Ok(Self {
            region: r.u16()?,
            total_bytes: r.u32()?,
            free_bytes: r.u32()?,
        })
    }
}

/// Answer to an unlock code
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UnlockResponse {
    pub accepted: bool,
    pub code: Option<String>,
}

impl UnlockResponse {
    pub fn decode(data: &[u8]) -> Result<Self, ParseError> {
        let mut r = RecordReader::new(data);
        let accepted = r.bool()?;
        let code = r.zstring(NAME_MAX);
        Ok(Self {
            accepted,
            code: (!code.is_empty()).then_some(code),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_id() {
        assert_eq!(decode_unit_id(&encode_unit_id(3_405_691_582)).unwrap(), 3_405_691_582);
        assert!(decode_unit_id(&[1, 2]).is_err());
    }

    #[test]
    fn test_file_request_roundtrip() {
        let req = FileRequest::named("GARMIN/GPX/Current.gpx");
        assert_eq!(FileRequest::decode(&req.encode()).unwrap(), req);
    }

    #[test]
    fn test_file_assembly_out_of_order() {
        let content: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
        let chunks = encode_file_chunks(&content);
        assert_eq!(chunks.len(), 3);

        let mut asm = FileAssembler::new();
        assert!(asm
            .begin(FileHeader {
                size: 600,
                name: "log.bin".into()
            })
            .is_none());
        assert!(asm.push(&FileChunk::decode(&chunks[2]).unwrap()).is_none());
        assert!(asm.push(&FileChunk::decode(&chunks[0]).unwrap()).is_none());
        let done = asm.push(&FileChunk::decode(&chunks[1]).unwrap());
        assert_eq!(done, Some(content));
        assert!(!asm.is_active());
    }

    #[test]
    fn test_empty_file_completes_at_header() {
        let mut asm = FileAssembler::new();
        let header = FileHeader {
            size: 0,
            name: "empty".into(),
        };
        assert_eq!(FileHeader::decode(&header.encode()).unwrap(), header);
        assert_eq!(asm.begin(header), Some(Vec::new()));
    }

    #[test]
    fn test_chunk_without_header_is_ignored() {
        let mut asm = FileAssembler::new();
        let chunk = FileChunk {
            offset: 0,
            data: &[1, 2, 3],
        };
        assert!(asm.push(&chunk).is_none());
    }

    #[test]
    fn test_flash_info() {
        let info = FlashInfo {
            region: 1,
            total_bytes: 24 * 1024 * 1024,
            free_bytes: 4 * 1024 * 1024,
        };
        assert_eq!(FlashInfo::decode(&info.encode()).unwrap(), info);
        assert_eq!(info.used_bytes(), 20 * 1024 * 1024);
    }

    #[test]
    fn test_unlock_response() {
        let r = UnlockResponse::decode(&[1, b'A', b'B', 0]).unwrap();
        assert!(r.accepted);
        assert_eq!(r.code.as_deref(), Some("AB"));
        assert_eq!(decode_file_not_found(&encode_file_not_found("x.img")), "x.img");
    }
}
