use super::{MediaSource, PlainStream, StreamInfo, StreamType, Transport};
use crate::{
    asf::{select_streams, AsfHeader, ChunkType, StreamChunk, StreamSelection, CHUNK_PREAMBLE_SIZE},
    config::StreamConfig,
    error::{MmsError, MmsResult},
    http::{self, HttpRequest, HttpResponse},
    net::Connection,
    url::{escape_path, Url},
};
use uuid::Uuid;

const ASF_CONTENT_TYPES: &[&str] = &[
    "application/octet-stream",
    "application/vnd.ms.wms-hdr.asfv1",
    "application/x-mms-framed",
    "video/x-ms-asf",
];

const REDIRECTOR_CONTENT_TYPES: &[&str] = &[
    "audio/x-ms-wax",
    "audio/x-ms-wma",
    "video/x-ms-asf",
    "video/x-ms-afs",
    "video/x-ms-wmv",
    "video/x-ms-wma",
];

/// `features=` value of the `Pragma` fields, if any.
fn features(response: &HttpResponse) -> Option<&str> {
    response
        .fields_named("Pragma")
        .flat_map(|pragma| pragma.split(','))
        .find_map(|directive| directive.trim().strip_prefix("features="))
}

/// Decide what a `200` response carries.
pub fn classify(response: &HttpResponse) -> StreamType {
    let Some(content_type) = response.content_type() else {
        return StreamType::Unknown;
    };
    let content_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if ASF_CONTENT_TYPES.contains(&content_type.as_str()) {
        return match features(response) {
            Some(features) if features.contains("broadcast") => StreamType::Live,
            _ => StreamType::Prerecorded,
        };
    }

    let body = response.body();
    if body.len() > 24 {
        if body.starts_with(&crate::asf::HEADER_OBJECT.0[..4]) {
            StreamType::PlainText
        } else if content_type == "text/html" {
            StreamType::Unknown
        } else {
            StreamType::Redirector
        }
    } else if REDIRECTOR_CONTENT_TYPES.contains(&content_type.as_str()) {
        StreamType::Redirector
    } else if content_type == "text/plain" {
        StreamType::PlainText
    } else {
        StreamType::Unknown
    }
}

/// Where to connect and what to ask for.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub host: String,
    pub port: u16,
    pub uri: String,
    pub host_field: String,
}

impl Target {
    pub fn resolve(url: &Url) -> MmsResult<Self> {
        if url.protocol == "http_proxy" {
            let inner = url.path.strip_prefix('/').unwrap_or(&url.path);
            let mut inner = Url::parse(inner)?;
            inner.path = escape_path(&inner.path);
            return Ok(Self {
                host: url.host.clone(),
                port: url.port_or(8080),
                uri: inner.to_string(),
                host_field: inner.authority(80),
            });
        }

        Ok(Self {
            host: url.host.clone(),
            port: url.port_or(80),
            uri: escape_path(&url.path),
            host_field: url.authority(80),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl Credentials {
    fn from_url(url: &Url) -> Option<Self> {
        Some(Self {
            username: url.username.clone()?,
            password: url.password.clone(),
        })
    }

    fn from_config(config: &StreamConfig) -> Option<Self> {
        Some(Self {
            username: config.username.clone()?,
            password: config.password.clone(),
        })
    }
}

/// State carried between the requests of one HTTP attempt.
struct RequestContext<'a> {
    target: Target,
    config: &'a StreamConfig,
    client_guid: Uuid,
    request: u32,
    credentials: Option<Credentials>,
    stream_type: StreamType,
    header: Option<AsfHeader>,
    selection: Option<StreamSelection>,
}

impl RequestContext<'_> {
    fn build(&self) -> HttpRequest {
        let mut request = HttpRequest::get(self.target.uri.clone());
        request
            .field("Accept: */*")
            .field(format!("User-Agent: {}", self.config.user_agent));
        if let Some(credentials) = &self.credentials {
            request.basic_auth(&credentials.username, credentials.password.as_deref());
        }
        request
            .field(format!("Host: {}", self.target.host_field))
            .field(format!("Pragma: xClientGUID={{{}}}", self.client_guid))
            .field(format!(
                "Pragma: no-cache,rate=1.000000,stream-time=0,stream-offset=0:0,request-context={},max-duration=0",
                self.request
            ));

        if matches!(self.stream_type, StreamType::Live | StreamType::Prerecorded) {
            request.field("Pragma: xPlayStrm=1");
            if let (Some(header), Some(selection)) = (&self.header, &self.selection) {
                let selected: Vec<u16> = header
                    .audio_streams()
                    .chain(header.video_streams())
                    .map(|stream| stream.id)
                    .filter(|id| selection.is_selected(*id))
                    .collect();
                let entries: String = selected
                    .iter()
                    .map(|id| format!("ffff:{id:x}:0 "))
                    .collect();
                request
                    .field(format!("Pragma: stream-switch-entry={entries}"))
                    .field(format!("Pragma: stream-switch-count={}", selected.len()));
            }
        }

        request.field("Connection: Close");
        request
    }
}

/// Result of one HTTP-tunnelled attempt.
pub enum HttpAttempt {
    Opened {
        source: MediaSource,
        info: StreamInfo,
    },
    Redirect(Url),
}

/// ASF delivered as `$H`/`$D` chunks over an HTTP response body.
pub struct AsfHttpStream {
    conn: Connection,
    packet_size: usize,
    payload_remaining: usize,
    padding_remaining: usize,
    failed: Option<MmsError>,
}

impl AsfHttpStream {
    pub(crate) fn new(conn: Connection, packet_size: u32) -> Self {
        Self {
            conn,
            packet_size: packet_size as usize,
            payload_remaining: 0,
            padding_remaining: 0,
            failed: None,
        }
    }

    /// Run the request/response exchange of HTTP-tunnelled mode against `url`.
    pub async fn open(url: &Url, config: &StreamConfig) -> MmsResult<HttpAttempt> {
        let mut context = RequestContext {
            target: Target::resolve(url)?,
            config,
            client_guid: Uuid::new_v4(),
            request: 1,
            credentials: Credentials::from_url(url),
            stream_type: StreamType::Unknown,
            header: None,
            selection: None,
        };
        let mut auth_retries = 0;

        loop {
            let mut conn =
                Connection::connect(&context.target.host, context.target.port, config).await?;
            let response = http::exchange(&mut conn, &context.build()).await?;
            log::debug!(
                "HTTP response {} {} for request {}",
                response.status_code,
                response.reason_phrase,
                context.request
            );

            match response.status_code {
                200 => {}
                401 => {
                    if auth_retries >= config.max_auth_retries {
                        return Err(MmsError::AuthenticationFailed);
                    }
                    auth_retries += 1;
                    // credentials from the address may already have been refused
                    let refused = context.credentials.as_ref().map(|c| c.username.clone());
                    let retry = Credentials::from_config(config)
                        .filter(|retry| Some(&retry.username) != refused.as_ref());
                    let Some(retry) = retry else {
                        return Err(MmsError::AuthenticationFailed);
                    };
                    log::warn!("Authentication required, retrying as {}", retry.username);
                    context.credentials = Some(retry);
                    context.request += 1;
                    conn.shutdown().await;
                    continue;
                }
                301 | 302 | 303 | 307 | 308 => {
                    let location = response.field("Location").ok_or_else(|| {
                        MmsError::MalformedResponse("redirect without Location".to_string())
                    })?;
                    let next = url.redirect(location)?;
                    log::info!("Redirected to {next}");
                    conn.shutdown().await;
                    return Ok(HttpAttempt::Redirect(next));
                }
                code => {
                    return Err(MmsError::ProtocolMismatch(format!(
                        "server answered {code} {}",
                        response.reason_phrase
                    )));
                }
            }

            context.stream_type = classify(&response);
            log::debug!("Stream classified as {:?}", context.stream_type);
            match context.stream_type {
                StreamType::Live | StreamType::Prerecorded => {
                    let Some(packet_size) = context.header.as_ref().map(|h| h.packet_size) else {
                        let blob = read_header_chunks(&mut conn).await?;
                        let header = AsfHeader::parse(&blob)?;
                        context.selection = Some(
                            select_streams(&header, config.bandwidth)?
                                .with_forced(config.audio_id, config.video_id),
                        );
                        context.header = Some(header);
                        context.request += 1;
                        conn.shutdown().await;
                        continue;
                    };

                    let source = MediaSource::AsfHttp(Self::new(conn, packet_size));
                    return Ok(HttpAttempt::Opened {
                        source,
                        info: StreamInfo {
                            transport: Transport::Http,
                            stream_type: context.stream_type,
                            header: context.header,
                            selection: context.selection,
                        },
                    });
                }
                StreamType::PlainText | StreamType::Redirector => {
                    let seekable = context.stream_type == StreamType::PlainText;
                    let source = MediaSource::Plain(PlainStream::new(
                        conn,
                        context.target.clone(),
                        context.credentials.clone(),
                        config.clone(),
                        seekable,
                    ));
                    return Ok(HttpAttempt::Opened {
                        source,
                        info: StreamInfo {
                            transport: Transport::Http,
                            stream_type: context.stream_type,
                            header: None,
                            selection: None,
                        },
                    });
                }
                StreamType::Unknown => {
                    return Err(MmsError::ProtocolMismatch(format!(
                        "unrecognised content type {:?}",
                        response.content_type()
                    )));
                }
            }
        }
    }

    /// Fill `buf` with header payloads and padded data packets, stopping at the first chunk
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
            if self.payload_remaining > 0 {
                let want = rest.len().min(self.payload_remaining);
                let n = self.conn.read(&mut rest[..want]).await?;
                if n == 0 {
                    return Err(MmsError::Framing(
                        "connection closed inside a chunk".to_string(),
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
                // hand over what already arrived instead of waiting for the next chunk
                break;
            } else if !self.next_chunk().await? {
                break;
            }
        }
        Ok(())
    }

    /// Consume chunk preambles until one carries deliverable bytes. `false` at end of stream.
    async fn next_chunk(&mut self) -> MmsResult<bool> {
        loop {
            let mut preamble = [0u8; CHUNK_PREAMBLE_SIZE];
            if !self.conn.read_exact_or_eof(&mut preamble).await? {
                return Ok(false);
            }
            let chunk = StreamChunk::decode(&preamble)?;
            let len = chunk.payload_len();
            if chunk.is_dropped() {
                match chunk.kind {
                    ChunkType::EndOfTransfer => {
                        log::debug!("End of transfer chunk #{}", chunk.sequence)
                    }
                    ChunkType::Unknown(tag) => {
                        log::warn!("Dropping chunk of unknown type {tag:#06x}")
                    }
                    _ => {}
                }
                self.conn.discard(len).await?;
                continue;
            }

            match chunk.kind {
                ChunkType::Data => {
                    if len > self.packet_size {
                        return Err(MmsError::Framing(format!(
                            "data chunk of {len} bytes exceeds packet size {}",
                            self.packet_size
                        )));
                    }
                    self.payload_remaining = len;
                    self.padding_remaining = self.packet_size - len;
                    return Ok(true);
                }
                // `$H`, delivered unpadded
                _ => {
                    self.payload_remaining = len;
                    self.padding_remaining = 0;
                    return Ok(true);
                }
            }
        }
    }

    pub async fn reseek(&mut self, _pos: u64) -> MmsResult<()> {
        Err(MmsError::UnsupportedSeek)
    }

    pub async fn close(&mut self) {
        self.conn.shutdown().await;
    }
}

/// Collect `$H` chunks until the header object's declared size has arrived.
async fn read_header_chunks(conn: &mut Connection) -> MmsResult<Vec<u8>> {
    let mut blob = Vec::new();
    let mut declared = None;
    loop {
        let mut preamble = [0u8; CHUNK_PREAMBLE_SIZE];
        conn.read_exact(&mut preamble).await?;
        let chunk = StreamChunk::decode(&preamble)?;
        if chunk.kind != ChunkType::Header {
            return Err(MmsError::Framing(format!(
                "expected a header chunk, got {:?}",
                chunk.kind
            )));
        }

        let start = blob.len();
        blob.resize(start + chunk.payload_len(), 0);
        conn.read_exact(&mut blob[start..]).await?;

        let size = match declared {
            Some(size) => size,
            None => *declared.insert(AsfHeader::declared_size(&blob)?),
        };
        if blob.len() as u64 >= size {
            return Ok(blob);
        }
    }
}
