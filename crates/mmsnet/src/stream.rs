use crate::{
    asf::ContentDescription,
    cache::ReadAheadCache,
    config::StreamConfig,
    error::{MmsError, MmsResult},
    negotiate::negotiate,
    source::{StreamInfo, StreamType},
    url::Url,
};
use std::io;
use tokio::runtime::Handle;

/// An open remote stream: a committed transport feeding a read-ahead cache.
pub struct MediaStream {
    cache: ReadAheadCache,
    info: StreamInfo,
}

/// Negotiate `url`, start buffering, and return once the prefill target is reached.
pub async fn open(url: &str, config: &StreamConfig) -> MmsResult<MediaStream> {
    let url = Url::parse(url)?;
    let (source, info) = negotiate(url, config).await?;

    let prebuffer = info.prebuffer_size();
    let mut cache_config = config.cache.clone();
    if info.header.is_some() {
        cache_config.fit_prebuffer(prebuffer);
    }
    let prefill = cache_config.prefill_bytes(prebuffer);

    let cache = ReadAheadCache::spawn(source, &cache_config);
    log::debug!("Waiting for {prefill} bytes before playback");
    cache.wait_buffered(prefill).await;
    log::info!("Prefilled {} bytes", cache.buffered());

    Ok(MediaStream { cache, info })
}

impl MediaStream {
    /// Read up to `buf.len()` bytes. `0` means the end of the stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> MmsResult<usize> {
        self.cache.read(buf).await
    }

    pub async fn seek(&mut self, pos: u64) -> MmsResult<()> {
        self.cache.seek(pos).await
    }

    pub fn position(&self) -> u64 {
        self.cache.position()
    }

    pub fn stream_type(&self) -> StreamType {
        self.info.stream_type
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn description(&self) -> Option<&ContentDescription> {
        self.info.description()
    }

    pub async fn close(&mut self) {
        self.cache.close().await;
    }

    /// Wrap the stream for synchronous consumers. Must not be used from a runtime thread.
    pub fn into_blocking(self, handle: Handle) -> BlockingStream {
        BlockingStream {
            stream: self,
            handle,
        }
    }
}

/// [`MediaStream`] as `std::io::Read + Seek`, driving the async calls on `handle`.
pub struct BlockingStream {
    stream: MediaStream,
    handle: Handle,
}

impl BlockingStream {
    pub fn get_ref(&self) -> &MediaStream {
        &self.stream
    }

    pub fn into_inner(self) -> MediaStream {
        self.stream
    }
}

fn into_io(e: MmsError) -> io::Error {
    match e {
        MmsError::Io(e) => e,
        MmsError::UnsupportedSeek => io::Error::new(io::ErrorKind::Unsupported, e),
        MmsError::Timeout(_) => io::Error::new(io::ErrorKind::TimedOut, e),
        e => io::Error::other(e),
    }
}

impl io::Read for BlockingStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Self { stream, handle } = self;
        handle.block_on(stream.read(buf)).map_err(into_io)
    }
}

impl io::Seek for BlockingStream {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let target = match pos {
            io::SeekFrom::Start(pos) => Some(pos),
            io::SeekFrom::Current(delta) => self.stream.position().checked_add_signed(delta),
            io::SeekFrom::End(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "stream length is unknown",
                ))
            }
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before the start of the stream")
        })?;

        let Self { stream, handle } = self;
        handle.block_on(stream.seek(target)).map_err(into_io)?;
        Ok(target)
    }
}
