use bytes::{BufMut, BytesMut};
use mmsnet::{
    asf::{
        ChunkType, Guid, StreamChunk, AUDIO_MEDIA, DATA_OBJECT, FILE_PROPERTIES_OBJECT,
        HEADER_OBJECT, STREAM_BITRATE_PROPERTIES_OBJECT, STREAM_PROPERTIES_OBJECT, VIDEO_MEDIA,
    },
    StreamConfig,
};
use std::time::Duration;

pub const PACKET_SIZE: u32 = 64;

pub fn init_logger() {
    let _ = pretty_env_logger::formatted_builder()
        .is_test(true)
        .try_init();
}

pub fn test_config() -> StreamConfig {
    StreamConfig {
        connect_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn object(guid: Guid, body: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::new();
    out.put_slice(&guid.0);
    out.put_u64_le((24 + body.len()) as u64);
    out.put_slice(body);
    out.to_vec()
}

fn file_properties(broadcast: bool) -> Vec<u8> {
    let mut body = vec![0u8; 80];
    // no preroll, so no prebuffer requirement
    body[64..68].copy_from_slice(&u32::from(broadcast).to_le_bytes());
    body[68..72].copy_from_slice(&PACKET_SIZE.to_le_bytes());
    body[72..76].copy_from_slice(&PACKET_SIZE.to_le_bytes());
    body[76..80].copy_from_slice(&128_000u32.to_le_bytes());
    object(FILE_PROPERTIES_OBJECT, &body)
}

fn stream_properties(kind: Guid, id: u16) -> Vec<u8> {
    let mut body = vec![0u8; 54];
    body[0..16].copy_from_slice(&kind.0);
    body[48..50].copy_from_slice(&id.to_le_bytes());
    object(STREAM_PROPERTIES_OBJECT, &body)
}

fn bitrates() -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_u16_le(2);
    body.put_u16_le(1);
    body.put_u32_le(32_000);
    body.put_u16_le(2);
    body.put_u32_le(96_000);
    object(STREAM_BITRATE_PROPERTIES_OBJECT, &body)
}

/// An ASF header with audio stream 1 and video stream 2, followed by the start of the data
/// object as servers send it.
pub fn asf_header(broadcast: bool) -> Vec<u8> {
    let children = [
        file_properties(broadcast),
        stream_properties(AUDIO_MEDIA, 1),
        stream_properties(VIDEO_MEDIA, 2),
        bitrates(),
    ];
    let payload = children.concat();

    let mut out = BytesMut::new();
    out.put_slice(&HEADER_OBJECT.0);
    out.put_u64_le((30 + payload.len()) as u64);
    out.put_u32_le(children.len() as u32);
    out.put_u8(1);
    out.put_u8(2);
    out.put_slice(&payload);

    out.put_slice(&DATA_OBJECT.0);
    out.put_u64_le(0);
    out.put_bytes(0, 16);
    out.put_u64_le(0);
    out.put_u8(1);
    out.put_u8(1);
    out.to_vec()
}

/// Media payloads of varying length, none longer than a packet.
pub fn packets() -> Vec<Vec<u8>> {
    vec![
        vec![0xA1; 40],
        vec![0xB2; PACKET_SIZE as usize],
        vec![0xC3; 7],
    ]
}

/// What a reader sees for `packets`: every payload zero-padded to the packet size.
pub fn padded(packets: &[Vec<u8>]) -> Vec<u8> {
    packets
        .iter()
        .flat_map(|packet| {
            let mut packet = packet.clone();
            packet.resize(PACKET_SIZE as usize, 0);
            packet
        })
        .collect()
}

pub fn chunk(kind: ChunkType, sequence: u32, payload: &[u8]) -> Vec<u8> {
    StreamChunk::encode(kind, sequence, payload)
        .expect("payload fits in a chunk")
        .to_vec()
}
