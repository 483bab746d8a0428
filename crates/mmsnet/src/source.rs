//! Byte sources the read-ahead cache pulls from, one per committed protocol.

mod asf_http;
mod plain;

pub use asf_http::{classify, AsfHttpStream, HttpAttempt};
pub use plain::PlainStream;

use crate::{
    asf::{AsfHeader, ContentDescription, StreamSelection},
    error::MmsResult,
    mmst::MmstSession,
};
use std::future::Future;

/// The producing end of a stream session.
///
/// ```text
///  network ──> Upstream::read ──> filler ──> ring buffer ──> drainer ──> demuxer
/// ```
pub trait Upstream: Send + 'static {
    /// Read the next bytes of the elementary stream. `Ok(0)` is a clean end of stream.
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = MmsResult<usize>> + Send;

    /// Restart delivery at logical byte `pos`.
    fn reseek(&mut self, pos: u64) -> impl Future<Output = MmsResult<()>> + Send;

    /// Release the underlying connection.
    fn close(&mut self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

/// How the origin server described the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Live,
    Prerecorded,
    PlainText,
    /// The bytes are a playlist pointing somewhere else.
    Redirector,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// HTTP, including MMS tunnelled over HTTP and proxied HTTP.
    Http,
    /// The MMS command protocol over TCP.
    Mmst,
}

/// What negotiation learned about the stream.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub transport: Transport,
    pub stream_type: StreamType,
    pub header: Option<AsfHeader>,
    pub selection: Option<StreamSelection>,
}

impl StreamInfo {
    pub fn description(&self) -> Option<&ContentDescription> {
        self.header.as_ref()?.description.as_ref()
    }

    /// Bytes to buffer before playback may start, `0` when the stream does not say.
    pub fn prebuffer_size(&self) -> u64 {
        self.header
            .as_ref()
            .map(AsfHeader::prebuffer_size)
            .unwrap_or_default()
    }
}

pub enum MediaSource {
    AsfHttp(AsfHttpStream),
    Plain(PlainStream),
    Mmst(MmstSession),
}

impl Upstream for MediaSource {
    async fn read(&mut self, buf: &mut [u8]) -> MmsResult<usize> {
        match self {
            MediaSource::AsfHttp(source) => source.read(buf).await,
            MediaSource::Plain(source) => source.read(buf).await,
            MediaSource::Mmst(source) => source.read(buf).await,
        }
    }

    async fn reseek(&mut self, pos: u64) -> MmsResult<()> {
        match self {
            MediaSource::AsfHttp(source) => source.reseek(pos).await,
            MediaSource::Plain(source) => source.reseek(pos).await,
            MediaSource::Mmst(source) => source.reseek(pos).await,
        }
    }

    async fn close(&mut self) {
        match self {
            MediaSource::AsfHttp(source) => source.close().await,
            MediaSource::Plain(source) => source.close().await,
            MediaSource::Mmst(source) => source.close().await,
        }
    }
}
