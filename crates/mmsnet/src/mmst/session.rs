use super::command::{
    encode_command, is_command_prefix, utf16le, CommandFrame, COMMAND_PREFIX_SIZE, CONNECT_INFO,
    END_OF_STREAM, KEEPALIVE, REQUEST_FILE, REQUEST_HEADER, SELECT_STREAMS, START_PLAYING,
    STREAM_CHANGE, TRANSPORT_INFO,
};
use crate::{
    asf::{le_u16, select_streams, AsfHeader, StreamSelection},
    config::StreamConfig,
    error::{MmsError, MmsResult},
    net::Connection,
    source::{StreamInfo, StreamType, Transport},
    url::{unescape_path, Url},
};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

pub const MMST_PORT: u16 = 1755;

const PLAYER_ID: &str = "NSPlayer/7.0.0.1956";
/// Pre-header type byte of a header fragment.
const HEADER_PACKET: u8 = 0x02;
/// Pre-header type byte of a media packet.
const MEDIA_PACKET: u8 = 0x04;
const MAX_COMMAND_SIZE: usize = 64 * 1024;
const MAX_HEADER_SIZE: usize = 1024 * 1024;

/// Stream state flags of the 0x33 command.
const STREAM_ENABLED: u16 = 0x0000;
const STREAM_DISABLED: u16 = 0x0002;

/// An MMS session over TCP, positioned on the media packets after a successful handshake.
///
/// The ASF header is delivered first, then every packet is delivered padded to the
/// negotiated packet size.
pub struct MmstSession {
    conn: Connection,
    sequence: u32,
    packet_size: usize,

    header: Bytes,
    /// Bytes of the current packet's payload not delivered yet.
    payload_remaining: usize,
    /// Zero bytes owed after the payload of the current packet.
    padding_remaining: usize,
    eof: bool,
    failed: Option<MmsError>,
}

impl MmstSession {
    fn new(conn: Connection) -> Self {
        Self {
            conn,
            sequence: 0,
            packet_size: 0,
            header: Bytes::new(),
            payload_remaining: 0,
            padding_remaining: 0,
            eof: false,
            failed: None,
        }
    }

    /// Connect and run the handshake up to the start of playback.
    pub async fn open(url: &Url, config: &StreamConfig) -> MmsResult<(Self, StreamInfo)> {
        let conn = Connection::connect(&url.host, url.port_or(MMST_PORT), config).await?;
        let mut session = Self::new(conn);

        let player = format!(
            "\u{1c}\u{3}{PLAYER_ID}; {{{}}}; Host: {}",
            Uuid::new_v4(),
            url.host
        );
        let mut payload = utf16le(&player);
        payload.put_bytes(0, 2);
        session.send_command(CONNECT_INFO, 0, 0x0004_000B, &payload).await?;
        session.answer().await?;
        log::debug!("MMST: connect info acknowledged");

        let local = session.conn.local_addr()?;
        let transport = format!("\u{2}\u{0}\\\\{}\\TCP\\{}", local.ip(), local.port());
        session
            .send_command(TRANSPORT_INFO, 0, 0, &wide_with_prefix(&transport))
            .await?;
        session.answer().await?;
        log::debug!("MMST: transport info acknowledged");

        let path = url.path.strip_prefix('/').unwrap_or(&url.path);
        session
            .send_command(REQUEST_FILE, 0, 0, &wide_with_prefix(&unescape_path(path)))
            .await?;
        session.answer().await?;
        log::debug!("MMST: file {path} accepted");

        let mut request = [0u8; 40];
        request[32] = 2;
        session.send_command(REQUEST_HEADER, 1, 0, &request).await?;
        let blob = session.read_header().await?;
        let header = AsfHeader::parse(&blob)?;
        log::info!(
            "MMST: got {} bytes of header, packet size {}",
            blob.len(),
            header.packet_size
        );
        session.packet_size = header.packet_size as usize;
        session.header = Bytes::from(blob);

        let stream_ids: Vec<u16> = header.streams.iter().map(|stream| stream.id).collect();
        let Some(&first) = stream_ids.first() else {
            return Err(MmsError::Framing("ASF header lists no streams".to_string()));
        };
        let selection = select_streams(&header, config.bandwidth)?
            .with_forced(config.audio_id, config.video_id);
        let payload = stream_switches(&stream_ids, &selection);
        session
            .send_command(
                SELECT_STREAMS,
                stream_ids.len() as u32,
                0xFFFF | (u32::from(first) << 16),
                &payload,
            )
            .await?;
        session.answer().await?;

        let mut play = [0u8; 24];
        play[8..16].fill(0xFF);
        play[20] = 0x04;
        session
            .send_command(START_PLAYING, 1, 0xFFFF | (u32::from(first) << 16), &play)
            .await?;
        log::info!("MMST: playback started");

        let stream_type = if header.is_broadcast() {
            StreamType::Live
        } else {
            StreamType::Prerecorded
        };
        let info = StreamInfo {
            transport: Transport::Mmst,
            stream_type,
            header: Some(header),
            selection: Some(selection),
        };
        Ok((session, info))
    }

    async fn send_command(
        &mut self,
        command: u16,
        switches: u32,
        extra: u32,
        payload: &[u8],
    ) -> MmsResult<()> {
        let frame = encode_command(self.sequence, command, switches, extra, payload);
        self.sequence = self.sequence.wrapping_add(1);
        self.conn.write_all(&frame).await
    }

    /// Read the rest of a command frame whose 8-byte pre-header was already consumed.
    async fn read_command_body(&mut self) -> MmsResult<CommandFrame> {
        let mut length = [0u8; 4];
        self.conn.read_exact(&mut length).await?;
        let length = u32::from_le_bytes(length) as usize + 4;
        if length > MAX_COMMAND_SIZE {
            return Err(MmsError::Framing(format!("command of {length} bytes")));
        }
        let mut body = vec![0u8; length];
        self.conn.read_exact(&mut body).await?;
        CommandFrame::decode_body(&body)
    }

    async fn read_command(&mut self) -> MmsResult<CommandFrame> {
        let mut pre_header = [0u8; COMMAND_PREFIX_SIZE - 4];
        self.conn.read_exact(&mut pre_header).await?;
        if !is_command_prefix(&pre_header) {
            return Err(MmsError::ProtocolMismatch(
                "server did not answer with an MMS command".to_string(),
            ));
        }
        self.read_command_body().await
    }

    async fn echo_keepalive(&mut self) -> MmsResult<()> {
        log::debug!("MMST: answering keepalive");
        self.send_command(KEEPALIVE, 0, 0, &[]).await
    }

    /// Wait for the answer to the last command, answering keepalives on the way.
    async fn answer(&mut self) -> MmsResult<CommandFrame> {
        loop {
            let frame = self.read_command().await?;
            if frame.command == KEEPALIVE {
                self.echo_keepalive().await?;
                continue;
            }
            log::debug!("MMST: answer {:#04x}", frame.command);
            return Ok(frame);
        }
    }

    /// Collect header fragments until the blob ends with the last-fragment marker.
    async fn read_header(&mut self) -> MmsResult<Vec<u8>> {
        let mut header = Vec::new();
        loop {
            let mut pre_header = [0u8; 8];
            self.conn.read_exact(&mut pre_header).await?;

            if is_command_prefix(&pre_header) {
                let frame = self.read_command_body().await?;
                if frame.command == KEEPALIVE {
                    self.echo_keepalive().await?;
                }
                continue;
            }

            if pre_header[4] != HEADER_PACKET {
                return Err(MmsError::Framing(format!(
                    "expected a header packet, got type {:#04x}",
                    pre_header[4]
                )));
            }
            let length = packet_payload_len(&pre_header)?;
            if header.len() + length > MAX_HEADER_SIZE {
                return Err(MmsError::Framing("ASF header too large".to_string()));
            }
            let start = header.len();
            header.resize(start + length, 0);
            self.conn.read_exact(&mut header[start..]).await?;

            if header.ends_with(&[0x01, 0x01]) {
                return Ok(header);
            }
        }
    }

    /// Move to the next media packet, handling interleaved commands. `false` at end of stream.
    async fn next_packet(&mut self) -> MmsResult<bool> {
        loop {
            let mut pre_header = [0u8; 8];
            if !self.conn.read_exact_or_eof(&mut pre_header).await? {
                log::debug!("MMST: connection closed by server");
                return Ok(false);
            }

            if is_command_prefix(&pre_header) {
                let frame = self.read_command_body().await?;
                match frame.command {
                    KEEPALIVE => self.echo_keepalive().await?,
                    END_OF_STREAM => {
                        log::info!("MMST: end of stream");
                        return Ok(false);
                    }
                    STREAM_CHANGE | REQUEST_FILE => {
                        log::debug!("MMST: ignoring command {:#04x}", frame.command);
                    }
                    other => {
                        return Err(MmsError::Framing(format!(
                            "unexpected command {other:#04x} during playback"
                        )));
                    }
                }
                continue;
            }

            if pre_header[4] != MEDIA_PACKET {
                return Err(MmsError::Framing(format!(
                    "expected a media packet, got type {:#04x}",
                    pre_header[4]
                )));
            }
            let length = packet_payload_len(&pre_header)?;
            if length > self.packet_size {
                return Err(MmsError::Framing(format!(
                    "media packet of {length} bytes exceeds packet size {}",
                    self.packet_size
                )));
            }
            self.payload_remaining = length;
            self.padding_remaining = self.packet_size - length;
            return Ok(true);
        }
    }

    /// Fill `buf` with the header or with the current packet, stopping at the next packet
    /// boundary once anything was copied.
    ///
    /// An error after some bytes were copied is held back until the next call.
    pub async fn read(&mut self, buf: &mut [u8]) -> MmsResult<usize> {
        if let Some(e) = self.failed.take() {
            return Err(e);
        }
        let mut filled = 0;
        match self.fill(buf, &mut filled).await {
            Ok(()) => Ok(filled),
            Err(e) if filled > 0 => {
                self.failed = Some(e);
                Ok(filled)
            }
            Err(e) => Err(e),
        }
    }

    async fn fill(&mut self, buf: &mut [u8], filled: &mut usize) -> MmsResult<()> {
        while *filled < buf.len() {
            let rest = &mut buf[*filled..];
            if !self.header.is_empty() {
                let n = rest.len().min(self.header.len());
                rest[..n].copy_from_slice(&self.header[..n]);
                self.header.advance(n);
                *filled += n;
            } else if self.payload_remaining > 0 {
                let want = rest.len().min(self.payload_remaining);
                let n = self.conn.read(&mut rest[..want]).await?;
                if n == 0 {
                    return Err(MmsError::Framing(
                        "connection closed inside a media packet".to_string(),
                    ));
                }
                self.payload_remaining -= n;
                *filled += n;
            } else if self.padding_remaining > 0 {
                let n = rest.len().min(self.padding_remaining);
                rest[..n].fill(0);
                self.padding_remaining -= n;
                *filled += n;
            } else if *filled > 0 {
                // hand over what already arrived instead of waiting for the next packet
                break;
            } else if self.eof || !self.next_packet().await? {
                self.eof = true;
                break;
            }
        }
        Ok(())
    }

    pub async fn reseek(&mut self, _pos: u64) -> MmsResult<()> {
        Err(MmsError::UnsupportedSeek)
    }

    pub async fn close(&mut self) {
        self.conn.shutdown().await;
    }
}

/// Payload length announced by a packet pre-header, which counts itself.
fn packet_payload_len(pre_header: &[u8; 8]) -> MmsResult<usize> {
    let length = le_u16(pre_header, 6).unwrap_or_default() as usize;
    length
        .checked_sub(8)
        .ok_or_else(|| MmsError::Framing(format!("packet length {length} below its pre-header")))
}

/// Eight zero bytes, the UTF-16 text and a terminator.
fn wide_with_prefix(text: &str) -> Vec<u8> {
    let mut payload = vec![0u8; 8];
    payload.extend(utf16le(text));
    payload.put_bytes(0, 2);
    payload
}

/// 0x33 payload: the state of the first stream, then `ffff, id, state` for the others.
fn stream_switches(stream_ids: &[u16], selection: &StreamSelection) -> Vec<u8> {
    let state = |id: u16| {
        if selection.is_selected(id) {
            STREAM_ENABLED
        } else {
            STREAM_DISABLED
        }
    };

    let mut payload = BytesMut::new();
    payload.put_u16_le(stream_ids.first().copied().map(state).unwrap_or_default());
    for &id in stream_ids.iter().skip(1) {
        payload.put_u16_le(0xFFFF);
        payload.put_u16_le(id);
        payload.put_u16_le(state(id));
    }
    debug_assert_eq!(
        payload.len(),
        stream_ids.len().saturating_sub(1) * 6 + 2,
        "switch entries are six bytes each"
    );
    payload.to_vec()
}
