use crate::{
    asf::{le_u32, le_u16},
    error::{MmsError, MmsResult},
};
use bytes::{BufMut, Bytes, BytesMut};

/// Bytes 4..8 of every command frame.
pub const COMMAND_SIGNATURE: u32 = 0xB00BFACE;
/// `"MMS "`
const PROTOCOL_TAG: u32 = 0x20534D4D;
pub const COMMAND_PREAMBLE_SIZE: usize = 48;
/// Start flags and signature, then the length word.
pub const COMMAND_PREFIX_SIZE: usize = 12;
/// Client to server.
const CLIENT_DIRECTION: u32 = 0x0003_0000;

pub const CONNECT_INFO: u16 = 0x01;
pub const TRANSPORT_INFO: u16 = 0x02;
pub const REQUEST_FILE: u16 = 0x05;
pub const START_PLAYING: u16 = 0x07;
pub const REQUEST_HEADER: u16 = 0x15;
pub const KEEPALIVE: u16 = 0x1B;
pub const END_OF_STREAM: u16 = 0x1E;
pub const STREAM_CHANGE: u16 = 0x21;
pub const SELECT_STREAMS: u16 = 0x33;

/// Payloads are padded up to this many bytes.
const PAYLOAD_ALIGN: usize = 8;

/// Build a complete client command frame.
pub fn encode_command(sequence: u32, command: u16, switches: u32, extra: u32, payload: &[u8]) -> Bytes {
    let len8 = payload.len().div_ceil(PAYLOAD_ALIGN);
    let padded = len8 * PAYLOAD_ALIGN;

    let mut out = BytesMut::with_capacity(COMMAND_PREAMBLE_SIZE + padded);
    out.put_u32_le(0x0000_0001);
    out.put_u32_le(COMMAND_SIGNATURE);
    out.put_u32_le((padded + 32) as u32);
    out.put_u32_le(PROTOCOL_TAG);
    out.put_u32_le((len8 + 4) as u32);
    out.put_u32_le(sequence);
    // timestamp
    out.put_u64_le(0);
    out.put_u32_le((len8 + 2) as u32);
    out.put_u32_le(CLIENT_DIRECTION | u32::from(command));
    out.put_u32_le(switches);
    out.put_u32_le(extra);
    out.put_slice(payload);
    out.put_bytes(0, padded - payload.len());
    out.freeze()
}

/// Whether an 8-byte pre-header starts a command frame.
pub fn is_command_prefix(pre_header: &[u8; 8]) -> bool {
    le_u32(pre_header, 4) == Some(COMMAND_SIGNATURE)
}

/// A command received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub command: u16,
    pub direction: u16,
    pub sequence: u32,
    pub switches: u32,
    pub extra: u32,
    pub payload: Bytes,
}

impl CommandFrame {
    /// Parse the part of a frame that follows the 12-byte prefix.
    pub fn decode_body(body: &[u8]) -> MmsResult<Self> {
        let short = || MmsError::Framing(format!("command frame of {} bytes", body.len()));
        if le_u32(body, 0).ok_or_else(short)? != PROTOCOL_TAG {
            return Err(MmsError::Framing("command frame without MMS tag".to_string()));
        }
        Ok(Self {
            sequence: le_u32(body, 8).ok_or_else(short)?,
            command: le_u16(body, 24).ok_or_else(short)?,
            direction: le_u16(body, 26).ok_or_else(short)?,
            switches: le_u32(body, 28).ok_or_else(short)?,
            extra: le_u32(body, 32).ok_or_else(short)?,
            payload: Bytes::copy_from_slice(body.get(36..).unwrap_or_default()),
        })
    }
}

/// UTF-16LE encoding of `text` without terminator.
pub fn utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}
