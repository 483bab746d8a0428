use crate::error::{MmsError, MmsResult};
use bytes::{BufMut, Bytes, BytesMut};

/// Every chunk of the HTTP tunnel starts with this many bytes.
pub const CHUNK_PREAMBLE_SIZE: usize = 12;

/// The declared size counts the eight preamble bytes after the type and size words.
const SIZE_OVERHEAD: u16 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    /// `$C`
    Clear,
    /// `$D`
    Data,
    /// `$E`
    EndOfTransfer,
    /// `$H`
    Header,
    Unknown(u16),
}

impl ChunkType {
    pub fn from_tag(tag: u16) -> Self {
        match tag {
            0x4324 => ChunkType::Clear,
            0x4424 => ChunkType::Data,
            0x4524 => ChunkType::EndOfTransfer,
            0x4824 => ChunkType::Header,
            other => ChunkType::Unknown(other),
        }
    }

    pub fn tag(self) -> u16 {
        match self {
            ChunkType::Clear => 0x4324,
            ChunkType::Data => 0x4424,
            ChunkType::EndOfTransfer => 0x4524,
            ChunkType::Header => 0x4824,
            ChunkType::Unknown(tag) => tag,
        }
    }
}

/// A decoded chunk preamble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub kind: ChunkType,
    pub size: u16,
    pub sequence: u32,
    pub reserved: u16,
    pub size_confirm: u16,
}

impl StreamChunk {
    pub fn decode(preamble: &[u8; CHUNK_PREAMBLE_SIZE]) -> MmsResult<Self> {
        let word = |at: usize| u16::from_le_bytes([preamble[at], preamble[at + 1]]);
        let chunk = Self {
            kind: ChunkType::from_tag(word(0)),
            size: word(2),
            sequence: u32::from_le_bytes([preamble[4], preamble[5], preamble[6], preamble[7]]),
            reserved: word(8),
            size_confirm: word(10),
        };

        if chunk.size != chunk.size_confirm {
            return Err(MmsError::Framing(format!(
                "chunk size {} does not match its confirmation {}",
                chunk.size, chunk.size_confirm
            )));
        }
        if chunk.size < SIZE_OVERHEAD {
            return Err(MmsError::Framing(format!(
                "chunk size {} is smaller than its preamble",
                chunk.size
            )));
        }
        Ok(chunk)
    }

    /// Number of payload bytes that follow the preamble on the wire.
    pub fn payload_len(&self) -> usize {
        (self.size - SIZE_OVERHEAD) as usize
    }

    /// Whether the payload is consumed without being surfaced to the reader.
    pub fn is_dropped(&self) -> bool {
        !matches!(self.kind, ChunkType::Data | ChunkType::Header)
    }

    /// Frame `payload` as a chunk of `kind`.
    pub fn encode(kind: ChunkType, sequence: u32, payload: &[u8]) -> MmsResult<Bytes> {
        let size = u16::try_from(payload.len() + SIZE_OVERHEAD as usize)
            .map_err(|_| MmsError::Framing(format!("payload of {} bytes", payload.len())))?;

        let mut out = BytesMut::with_capacity(CHUNK_PREAMBLE_SIZE + payload.len());
        out.put_u16_le(kind.tag());
        out.put_u16_le(size);
        out.put_u32_le(sequence);
        out.put_u16_le(0);
        out.put_u16_le(size);
        out.put_slice(payload);
        Ok(out.freeze())
    }
}
