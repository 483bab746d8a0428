use super::{
    le_u16, le_u32, le_u64, Guid, AUDIO_MEDIA, CONTENT_DESCRIPTION_OBJECT, FILE_PROPERTIES_OBJECT,
    HEADER_OBJECT, STREAM_BITRATE_PROPERTIES_OBJECT, STREAM_PROPERTIES_OBJECT, VIDEO_MEDIA,
};
use crate::error::{MmsError, MmsResult};

/// Guid and 64-bit size shared by every ASF object.
const OBJECT_HEADER_SIZE: usize = 24;
/// The top level header object also carries a child count and two reserved bytes.
pub(crate) const HEADER_OBJECT_SIZE: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Audio,
    Video,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsfStream {
    pub id: u16,
    pub kind: StreamKind,
    /// Average bitrate from the stream bitrate properties object, `0` when absent.
    pub bitrate: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentDescription {
    pub title: String,
    pub author: String,
    pub copyright: String,
    pub comment: String,
    pub rating: String,
}

/// What the stream engine needs from an ASF header blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsfHeader {
    /// Declared size of the header object.
    pub size: u64,
    /// Fixed size of every data packet.
    pub packet_size: u32,
    /// Milliseconds to buffer before playback.
    pub preroll: u64,
    /// File properties flags, bit 0 marks a broadcast.
    pub flags: u32,
    pub max_bitrate: u32,
    pub streams: Vec<AsfStream>,
    pub description: Option<ContentDescription>,
}

impl AsfHeader {
    /// Read the declared header size from the start of a header blob.
    pub fn declared_size(blob: &[u8]) -> MmsResult<u64> {
        let guid = blob
            .get(..16)
            .ok_or_else(|| MmsError::Framing("ASF header too short".to_string()))?;
        if guid != HEADER_OBJECT.0 {
            return Err(MmsError::Framing("missing ASF header object".to_string()));
        }
        let size = le_u64(blob, 16)
            .ok_or_else(|| MmsError::Framing("ASF header too short".to_string()))?;
        if size < HEADER_OBJECT_SIZE as u64 {
            return Err(MmsError::Framing(format!("ASF header size {size} is too small")));
        }
        Ok(size)
    }

    pub fn parse(blob: &[u8]) -> MmsResult<Self> {
        let size = Self::declared_size(blob)?;
        if blob.len() < HEADER_OBJECT_SIZE {
            return Err(MmsError::Framing("ASF header too short".to_string()));
        }
        let end = blob.len().min(usize::try_from(size).unwrap_or(usize::MAX));

        let mut file_properties = None;
        let mut streams = Vec::new();
        let mut bitrates = Vec::new();
        let mut description = None;

        let mut pos = HEADER_OBJECT_SIZE;
        while pos + OBJECT_HEADER_SIZE <= end {
            let mut id = [0u8; 16];
            id.copy_from_slice(&blob[pos..pos + 16]);
            let guid = Guid(id);
            let object_size = le_u64(blob, pos + 16).unwrap_or_default();
            let Some(object_end) = usize::try_from(object_size)
                .ok()
                .and_then(|size| pos.checked_add(size))
                .filter(|object_end| object_size >= OBJECT_HEADER_SIZE as u64 && *object_end <= end)
            else {
                log::warn!("Truncated ASF object at offset {pos}, ignoring the rest of the header.");
                break;
            };
            let object = &blob[pos..object_end];

            match guid.prefix() {
                prefix if prefix == FILE_PROPERTIES_OBJECT.prefix() => {
                    file_properties = Some(parse_file_properties(object)?);
                }
                prefix if prefix == STREAM_PROPERTIES_OBJECT.prefix() => {
                    streams.push(parse_stream_properties(object)?);
                }
                prefix if prefix == STREAM_BITRATE_PROPERTIES_OBJECT.prefix() => {
                    bitrates = parse_bitrates(object)?;
                }
                prefix if prefix == CONTENT_DESCRIPTION_OBJECT.prefix() => {
                    description = Some(parse_content_description(object)?);
                }
                _ => {}
            }
            pos = object_end;
        }

        let FileProperties {
            preroll,
            flags,
            packet_size,
            max_bitrate,
        } = file_properties
            .ok_or_else(|| MmsError::Framing("ASF header has no file properties".to_string()))?;
        if packet_size == 0 {
            return Err(MmsError::Framing("ASF packet size is zero".to_string()));
        }

        for (id, bitrate) in bitrates {
            if let Some(stream) = streams.iter_mut().find(|stream| stream.id == id) {
                stream.bitrate = bitrate;
            }
        }

        if let Some(description) = &description {
            log::info!(
                "Title: {:?}, author: {:?}, copyright: {:?}",
                description.title,
                description.author,
                description.copyright
            );
        }

        Ok(Self {
            size,
            packet_size,
            preroll,
            flags,
            max_bitrate,
            streams,
            description,
        })
    }

    /// Bytes to buffer before playback: preroll time at the maximum bitrate.
    pub fn prebuffer_size(&self) -> u64 {
        ((self.preroll as f64 / 1000.0) * (self.max_bitrate as f64 / 8.0)) as u64
    }

    pub fn is_broadcast(&self) -> bool {
        self.flags & 0x01 != 0
    }

    pub fn audio_streams(&self) -> impl Iterator<Item = &AsfStream> {
        self.streams
            .iter()
            .filter(|stream| stream.kind == StreamKind::Audio)
    }

    pub fn video_streams(&self) -> impl Iterator<Item = &AsfStream> {
        self.streams
            .iter()
            .filter(|stream| stream.kind == StreamKind::Video)
    }
}

fn truncated(object: &str) -> MmsError {
    MmsError::Framing(format!("truncated {object} object"))
}

struct FileProperties {
    preroll: u64,
    flags: u32,
    packet_size: u32,
    max_bitrate: u32,
}

fn parse_file_properties(object: &[u8]) -> MmsResult<FileProperties> {
    let field = |offset| le_u32(object, offset).ok_or_else(|| truncated("file properties"));
    Ok(FileProperties {
        preroll: le_u64(object, 80).ok_or_else(|| truncated("file properties"))?,
        flags: field(88)?,
        // the maximum packet size; both are equal in practice
        packet_size: field(96)?,
        max_bitrate: field(100)?,
    })
}

fn parse_stream_properties(object: &[u8]) -> MmsResult<AsfStream> {
    let stream_type = object
        .get(24..40)
        .ok_or_else(|| truncated("stream properties"))?;
    let flags = le_u16(object, 72).ok_or_else(|| truncated("stream properties"))?;

    let prefix = le_u32(stream_type, 0).unwrap_or_default();
    let kind = if prefix == AUDIO_MEDIA.prefix() {
        StreamKind::Audio
    } else if prefix == VIDEO_MEDIA.prefix() {
        StreamKind::Video
    } else {
        StreamKind::Other
    };

    Ok(AsfStream {
        id: flags & 0x7F,
        kind,
        bitrate: 0,
    })
}

fn parse_bitrates(object: &[u8]) -> MmsResult<Vec<(u16, u32)>> {
    let count = le_u16(object, 24).ok_or_else(|| truncated("stream bitrate properties"))?;
    (0..count as usize)
        .map(|i| {
            let at = 26 + i * 6;
            let flags = le_u16(object, at).ok_or_else(|| truncated("stream bitrate properties"))?;
            let bitrate =
                le_u32(object, at + 2).ok_or_else(|| truncated("stream bitrate properties"))?;
            Ok((flags & 0x7F, bitrate))
        })
        .collect()
}

fn parse_content_description(object: &[u8]) -> MmsResult<ContentDescription> {
    let mut lengths = [0usize; 5];
    for (i, length) in lengths.iter_mut().enumerate() {
        *length = le_u16(object, 24 + i * 2).ok_or_else(|| truncated("content description"))?
            as usize;
    }

    let mut strings = Vec::with_capacity(5);
    let mut pos = 34;
    for length in lengths {
        let raw = object
            .get(pos..pos + length)
            .ok_or_else(|| truncated("content description"))?;
        strings.push(narrow_utf16(raw));
        pos += length;
    }

    let [title, author, copyright, comment, rating]: [String; 5] = strings
        .try_into()
        .map_err(|_| truncated("content description"))?;
    Ok(ContentDescription {
        title,
        author,
        copyright,
        comment,
        rating,
    })
}

/// Keep the low byte of every UTF-16 code unit, up to the first NUL.
fn narrow_utf16(raw: &[u8]) -> String {
    raw.chunks_exact(2)
        .map(|unit| unit[0])
        .take_while(|&byte| byte != 0)
        .map(char::from)
        .collect()
}
