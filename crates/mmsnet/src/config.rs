use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Tunables of one stream session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Timeout of every TCP connect, in seconds when deserialized.
    #[serde(deserialize_with = "seconds")]
    pub connect_timeout: Duration,
    /// Timeout of every socket read, in seconds when deserialized.
    #[serde(deserialize_with = "seconds")]
    pub read_timeout: Duration,

    pub user_agent: String,

    /// Bandwidth cap in bits per second used to pick streams.
    pub bandwidth: Option<u32>,
    pub audio_id: Option<u16>,
    pub video_id: Option<u16>,

    /// Credentials sent after a `401` when the address carries none.
    pub username: Option<String>,
    pub password: Option<String>,

    pub max_redirects: u32,
    pub max_auth_retries: u32,

    pub cache: CacheConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            user_agent: "NSPlayer/4.1.0.3856".to_string(),
            bandwidth: None,
            audio_id: None,
            video_id: None,
            username: None,
            password: None,
            max_redirects: 5,
            max_auth_retries: 1,
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Requested capacity in bytes.
    pub size: usize,
    pub sector_size: usize,
    /// The filler waits until at least this much space is free.
    pub fill_threshold: usize,
    /// Percentage of the capacity to buffer before `open` returns.
    pub prefill: u8,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size: 512 * 1024,
            sector_size: 2048,
            fill_threshold: 16 * 1024,
            prefill: 20,
        }
    }
}

const MIN_STREAM_CACHE: usize = 64 * 1024;
/// Ceiling for growing the cache from a server announced prebuffer.
pub const MAX_STREAM_CACHE: usize = 32 * 1024 * 1024;
/// Ceiling for any cache, configured or grown.
pub const MAX_CACHE_SIZE: usize = 1024 * 1024 * 1024;
const MAX_READ_CHUNK: usize = 64 * 1024;

impl CacheConfig {
    /// Capacity rounded up to whole sectors, and to at least four fill thresholds.
    ///
    /// Never larger than [`MAX_CACHE_SIZE`], rounded down to whole sectors.
    pub fn capacity(&self) -> usize {
        let sector = self.sector_size.clamp(1, MAX_CACHE_SIZE);
        let wanted = self
            .size
            .max(self.fill_threshold.saturating_mul(4))
            .max(sector)
            .min(MAX_CACHE_SIZE);
        match wanted.div_ceil(sector).checked_mul(sector) {
            Some(capacity) if capacity <= MAX_CACHE_SIZE => capacity,
            _ => MAX_CACHE_SIZE / sector * sector,
        }
    }

    /// Largest single read issued to the upstream.
    pub fn read_chunk(&self) -> usize {
        self.sector_size
            .max(1)
            .saturating_mul(8)
            .min(MAX_READ_CHUNK)
            .min(self.capacity())
    }

    /// Grow the cache so that it holds several prebuffers of a network stream.
    ///
    /// The prebuffer comes from the server, so growth stops at [`MAX_STREAM_CACHE`].
    pub fn fit_prebuffer(&mut self, prebuffer: u64) {
        let wanted = usize::try_from(prebuffer)
            .unwrap_or(usize::MAX)
            .saturating_mul(5)
            .clamp(MIN_STREAM_CACHE, MAX_STREAM_CACHE);
        if self.size < wanted {
            log::debug!("Raising cache size from {} to {wanted} bytes", self.size);
            self.size = wanted;
        }
    }

    /// Bytes to buffer before handing out a stream.
    pub fn prefill_bytes(&self, prebuffer: u64) -> u64 {
        let by_percent = self.capacity() as u64 * u64::from(self.prefill.min(100)) / 100;
        let ceiling = (self.capacity() - self.fill_threshold.min(self.capacity())) as u64;
        let target = if prebuffer > 0 {
            prebuffer.min(by_percent.max(1))
        } else {
            by_percent
        };
        target.min(ceiling)
    }
}

fn seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}
