//! Bounded read-ahead between a network [`Upstream`] and the consumer of the stream.
//!
//! The cache is split in two halves sharing one ring buffer:
//!
//! ```text
//!                 offset      min           read               max
//!   logical  ... ───┼──────────┼─────────────┼──────────────────┼─────── ...
//!                              │ back region │   unread bytes   │
//!                              └─────────────┴──────────────────┘
//!                                   at most `capacity` bytes
//! ```
//!
//! - [`Filler`] is the only writer of `min`, `max`, `offset` and `eof`. It runs as its own
//!   task and pulls from the upstream whenever enough space is free.
//! - [`Drainer`] is the only writer of `read`. It is owned by whoever consumes the stream.
//!
//! No lock guards the buffer itself. The filler publishes bytes before advancing `max` and
//! publishes a new `min` before overwriting anything below it; the drainer never copies past
//! `max` and re-checks `min` after moving `read` backwards.

mod ring;

use crate::{
    config::CacheConfig,
    error::{MmsError, MmsResult},
    source::Upstream,
};
use parking_lot::Mutex;
use ring::Ring;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::sync::CancellationToken;

struct Shared {
    ring: Ring,
    fill_threshold: usize,

    min: AtomicU64,
    max: AtomicU64,
    read: AtomicU64,
    offset: AtomicU64,
    eof: AtomicBool,
    /// Set once the filler task has returned.
    stopped: AtomicBool,

    /// Bumped by the drainer for every seek that needs the filler.
    seek_requests: AtomicU64,
    /// Reseek failure for the seek request with the given number.
    seek_failure: Mutex<Option<(u64, MmsError)>>,
    /// Upstream error, handed out after the buffered bytes.
    error: Mutex<Option<MmsError>>,

    data_available: Notify,
    space_freed: Notify,
}

/// Create the two halves of a cache sized by `config`.
pub fn channel(config: &CacheConfig) -> (Filler, Drainer) {
    let capacity = config.capacity();
    let shared = Arc::new(Shared {
        ring: Ring::new(capacity),
        fill_threshold: config.fill_threshold.clamp(1, capacity),
        min: AtomicU64::new(0),
        max: AtomicU64::new(0),
        read: AtomicU64::new(0),
        offset: AtomicU64::new(0),
        eof: AtomicBool::new(false),
        stopped: AtomicBool::new(false),
        seek_requests: AtomicU64::new(0),
        seek_failure: Mutex::new(None),
        error: Mutex::new(None),
        data_available: Notify::new(),
        space_freed: Notify::new(),
    });
    log::debug!(
        "Cache of {capacity} bytes, read chunk {}, fill threshold {}",
        config.read_chunk(),
        shared.fill_threshold
    );

    let filler = Filler {
        shared: shared.clone(),
        scratch: vec![0; config.read_chunk()],
        offset: 0,
        failed_seek: None,
    };
    let drainer = Drainer { shared, pos: 0 };
    (filler, drainer)
}

/// What one fill step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// Appended this many bytes.
    Filled(usize),
    /// Not enough free space; wait for the drainer.
    Full,
    /// The upstream reached its end during this step.
    Ended,
    /// Restarted the window at the drainer's new position.
    Reset,
    /// Nothing to do until the drainer moves.
    Idle,
}

/// Producing half of the cache.
pub struct Filler {
    shared: Arc<Shared>,
    scratch: Vec<u8>,
    offset: u64,
    failed_seek: Option<u64>,
}

impl Filler {
    /// Perform one step: handle a pending discontinuity, or read one chunk from `upstream`.
    pub async fn fill_once<U: Upstream>(&mut self, upstream: &mut U) -> MmsResult<Fill> {
        let shared = &*self.shared;
        let read = shared.read.load(Ordering::SeqCst);
        let min = shared.min.load(Ordering::Relaxed);
        let max = shared.max.load(Ordering::Relaxed);

        if read < min || read > max {
            return Ok(self.discontinuity(upstream, read).await);
        }
        if shared.eof.load(Ordering::Relaxed) {
            return Ok(Fill::Idle);
        }

        let capacity = shared.ring.capacity() as u64;
        let back = (read - min).min(capacity / 2);
        let unread = max - read;
        let space = capacity - (unread + back);
        if space < shared.fill_threshold as u64 {
            return Ok(Fill::Full);
        }

        let index = shared.ring.index(max, self.offset);
        let space = space
            .min((shared.ring.capacity() - index) as u64)
            .min(self.scratch.len() as u64);

        // Retire what the write is about to overwrite before touching the buffer.
        let new_min = min.max(read.saturating_sub(capacity - (space + unread)));
        if new_min > min {
            shared.min.store(new_min, Ordering::SeqCst);
            if shared.read.load(Ordering::SeqCst) < new_min {
                // the drainer moved back into the region being retired
                shared.min.store(min, Ordering::SeqCst);
                return Ok(Fill::Idle);
            }
        }

        let n = upstream.read(&mut self.scratch[..space as usize]).await?;
        if n == 0 {
            log::debug!("Upstream ended at byte {max}");
            shared.eof.store(true, Ordering::Release);
            shared.data_available.notify_one();
            return Ok(Fill::Ended);
        }

        shared.ring.write(index, &self.scratch[..n]);
        if index + n == shared.ring.capacity() {
            self.offset += capacity;
            shared.offset.store(self.offset, Ordering::Release);
        }
        shared.max.store(max + n as u64, Ordering::Release);
        shared.data_available.notify_one();
        Ok(Fill::Filled(n))
    }

    async fn discontinuity<U: Upstream>(&mut self, upstream: &mut U, pos: u64) -> Fill {
        let shared = &*self.shared;
        let request = shared.seek_requests.load(Ordering::SeqCst);
        if self.failed_seek == Some(request) {
            return Fill::Idle;
        }

        log::debug!("Cache discontinuity, restarting upstream at byte {pos}");
        match upstream.reseek(pos).await {
            Ok(()) => {
                shared.error.lock().take();
                self.offset = pos;
                shared.offset.store(pos, Ordering::SeqCst);
                shared.eof.store(false, Ordering::SeqCst);
                // `max` first, so the window never covers `pos` with stale bytes
                shared.max.store(pos, Ordering::SeqCst);
                shared.min.store(pos, Ordering::SeqCst);
                shared.data_available.notify_one();
                Fill::Reset
            }
            Err(e) => {
                log::warn!("Cannot restart upstream at byte {pos}: {e}");
                self.failed_seek = Some(request);
                *shared.seek_failure.lock() = Some((request, e));
                shared.data_available.notify_one();
                Fill::Idle
            }
        }
    }

    /// Stop filling because of `error`. Buffered bytes stay readable.
    pub fn fail(&self, error: MmsError) {
        log::error!("Stream stopped: {error}");
        *self.shared.error.lock() = Some(error);
        self.shared.eof.store(true, Ordering::Release);
        self.shared.data_available.notify_one();
    }

    /// Fill until cancelled, then close the upstream.
    pub async fn run<U: Upstream>(mut self, mut upstream: U, cancel: CancellationToken) {
        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                step = self.fill_once(&mut upstream) => step,
            };
            match step {
                Ok(Fill::Filled(_) | Fill::Reset) => {}
                Ok(Fill::Full | Fill::Ended | Fill::Idle) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = self.shared.space_freed.notified() => {}
                    }
                }
                Err(e) => self.fail(e),
            }
        }

        upstream.close().await;
        self.shared.eof.store(true, Ordering::Release);
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.data_available.notify_one();
        log::debug!("Cache filler stopped");
    }
}

/// Consuming half of the cache.
pub struct Drainer {
    shared: Arc<Shared>,
    pos: u64,
}

impl Drainer {
    /// Logical position of the next byte returned by `read`.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// `(min, read, max)` as currently published.
    pub fn window(&self) -> (u64, u64, u64) {
        let shared = &*self.shared;
        (
            shared.min.load(Ordering::SeqCst),
            shared.read.load(Ordering::SeqCst),
            shared.max.load(Ordering::SeqCst),
        )
    }

    /// Bytes buffered ahead of the read position.
    pub fn buffered(&self) -> u64 {
        self.shared
            .max
            .load(Ordering::Acquire)
            .saturating_sub(self.pos)
    }

    pub fn is_eof(&self) -> bool {
        self.shared.eof.load(Ordering::Acquire)
    }

    /// Copy what is buffered without waiting. `None` means nothing is buffered yet.
    pub fn try_read(&mut self, buf: &mut [u8]) -> MmsResult<Option<usize>> {
        if buf.is_empty() {
            return Ok(Some(0));
        }
        let shared = &*self.shared;
        // `eof` before `max`, so that a final `max` is never missed
        let eof = shared.eof.load(Ordering::Acquire);
        let max = shared.max.load(Ordering::Acquire);

        if self.pos < max && self.pos >= shared.min.load(Ordering::SeqCst) {
            let n = (max - self.pos).min(buf.len() as u64) as usize;
            let offset = shared.offset.load(Ordering::Acquire);
            shared
                .ring
                .read(shared.ring.index(self.pos, offset), &mut buf[..n]);
            self.pos += n as u64;
            shared.read.store(self.pos, Ordering::SeqCst);
            shared.space_freed.notify_one();
            return Ok(Some(n));
        }

        if eof {
            return match shared.error.lock().take() {
                Some(e) => Err(e),
                None => Ok(Some(0)),
            };
        }
        Ok(None)
    }

    /// Read at least one byte, or return `0` at the end of the stream.
    ///
    /// An upstream error is returned once, after every buffered byte was read.
    pub async fn read(&mut self, buf: &mut [u8]) -> MmsResult<usize> {
        loop {
            if let Some(n) = self.try_read(buf)? {
                return Ok(n);
            }
            self.shared.data_available.notified().await;
        }
    }

    /// Wait until `bytes` are buffered ahead of the read position, or the stream ended.
    pub async fn wait_buffered(&self, bytes: u64) {
        while self.buffered() < bytes && !self.is_eof() {
            self.shared.data_available.notified().await;
        }
    }

    /// Move the read position to `pos`.
    ///
    /// Positions inside the buffered window are served from memory. Anything else asks the
    /// filler to restart the upstream there; if that fails the position is unchanged.
    pub async fn seek(&mut self, pos: u64) -> MmsResult<()> {
        let shared = &*self.shared;
        let old = self.pos;
        if pos == old {
            return Ok(());
        }

        if pos >= shared.min.load(Ordering::SeqCst) && pos <= shared.max.load(Ordering::SeqCst) {
            shared.read.store(pos, Ordering::SeqCst);
            if shared.min.load(Ordering::SeqCst) <= pos {
                self.pos = pos;
                shared.space_freed.notify_one();
                return Ok(());
            }
        }

        log::debug!("Seeking outside the cache to byte {pos}");
        let request = shared.seek_requests.fetch_add(1, Ordering::SeqCst) + 1;
        shared.read.store(pos, Ordering::SeqCst);
        shared.space_freed.notify_one();

        loop {
            let failure = {
                let mut slot = shared.seek_failure.lock();
                match slot.as_ref() {
                    Some((failed, _)) if *failed == request => slot.take(),
                    _ => None,
                }
            };
            if let Some((_, e)) = failure {
                shared.read.store(old, Ordering::SeqCst);
                shared.space_freed.notify_one();
                return Err(e);
            }

            let max = shared.max.load(Ordering::SeqCst);
            let min = shared.min.load(Ordering::SeqCst);
            if min <= pos && pos <= max {
                self.pos = pos;
                return Ok(());
            }
            if shared.stopped.load(Ordering::Acquire) {
                shared.read.store(old, Ordering::SeqCst);
                return Err(MmsError::Cancelled);
            }
            shared.data_available.notified().await;
        }
    }
}

/// A cache whose filler runs as a background task.
pub struct ReadAheadCache {
    drainer: Option<Drainer>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ReadAheadCache {
    /// Start filling from `upstream` on the current runtime.
    pub fn spawn<U: Upstream>(upstream: U, config: &CacheConfig) -> Self {
        let (filler, drainer) = channel(config);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(filler.run(upstream, cancel.clone()));
        Self {
            drainer: Some(drainer),
            cancel,
            task: Some(task),
        }
    }

    fn drainer(&mut self) -> MmsResult<&mut Drainer> {
        self.drainer.as_mut().ok_or(MmsError::Cancelled)
    }

    pub fn position(&self) -> u64 {
        self.drainer.as_ref().map(Drainer::position).unwrap_or_default()
    }

    pub fn buffered(&self) -> u64 {
        self.drainer.as_ref().map(Drainer::buffered).unwrap_or_default()
    }

    pub async fn wait_buffered(&self, bytes: u64) {
        if let Some(drainer) = &self.drainer {
            drainer.wait_buffered(bytes).await;
        }
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> MmsResult<usize> {
        self.drainer()?.read(buf).await
    }

    pub async fn seek(&mut self, pos: u64) -> MmsResult<()> {
        self.drainer()?.seek(pos).await
    }

    /// Stop the filler, which closes the upstream, then release the buffer.
    pub async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("Cache filler failed: {e}");
            }
        }
        self.drainer.take();
    }
}

impl Drop for ReadAheadCache {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
