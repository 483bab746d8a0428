//! Ordered protocol fallback for one playback address.

use crate::{
    config::StreamConfig,
    error::{MmsError, MmsResult},
    mmst::MmstSession,
    source::{AsfHttpStream, HttpAttempt, MediaSource, StreamInfo},
    url::Url,
};

/// The next transport to try. Attempts only ever move forward, except for redirects which
/// restart at [`Attempt::Http`] with the new address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Http,
    Udp,
    Tcp,
    Exhausted,
}

impl Attempt {
    fn next(self) -> Self {
        match self {
            Attempt::Http => Attempt::Udp,
            Attempt::Udp => Attempt::Tcp,
            Attempt::Tcp | Attempt::Exhausted => Attempt::Exhausted,
        }
    }

    /// Whether this transport is a candidate for the address's protocol token.
    fn applies_to(self, protocol: &str) -> bool {
        match self {
            Attempt::Http => matches!(protocol, "http" | "http_proxy" | "mms" | "mmsh"),
            Attempt::Udp => protocol == "mms",
            Attempt::Tcp => matches!(protocol, "mms" | "mmst"),
            Attempt::Exhausted => false,
        }
    }
}

/// Outcome of running one attempt.
enum Step {
    Opened(MediaSource, StreamInfo),
    Redirect(Url),
}

/// Drives the attempts for an address until one commits to a protocol.
pub struct Negotiator<'a> {
    config: &'a StreamConfig,
    url: Url,
    state: Attempt,
    redirects: u32,
    last_error: Option<MmsError>,
}

impl<'a> Negotiator<'a> {
    pub fn new(url: Url, config: &'a StreamConfig) -> Self {
        Self {
            config,
            url,
            state: Attempt::Http,
            redirects: 0,
            last_error: None,
        }
    }

    pub async fn run(mut self) -> MmsResult<(MediaSource, StreamInfo)> {
        loop {
            let attempt = self.state;
            if attempt == Attempt::Exhausted {
                return Err(MmsError::NoUsableProtocol {
                    url: self.url.to_string(),
                    last: self.last_error.map(Box::new),
                });
            }
            if !attempt.applies_to(&self.url.protocol) {
                self.state = attempt.next();
                continue;
            }

            log::debug!("Trying {attempt:?} for {}", self.url);
            match self.step(attempt).await {
                Ok(Step::Opened(source, info)) => {
                    log::info!(
                        "Opened {} as {:?} stream over {:?}",
                        self.url,
                        info.stream_type,
                        info.transport
                    );
                    return Ok((source, info));
                }
                Ok(Step::Redirect(next)) => {
                    self.redirects += 1;
                    if self.redirects > self.config.max_redirects {
                        return Err(MmsError::TooManyRedirects(self.redirects));
                    }
                    self.url = next;
                    self.state = Attempt::Http;
                    self.last_error = None;
                }
                Err(e) if e.is_recoverable() => {
                    log::warn!("{attempt:?} attempt failed: {e}");
                    self.last_error = Some(e);
                    self.state = attempt.next();
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn step(&self, attempt: Attempt) -> MmsResult<Step> {
        match attempt {
            Attempt::Http => match AsfHttpStream::open(&self.url, self.config).await? {
                HttpAttempt::Opened { source, info } => Ok(Step::Opened(source, info)),
                HttpAttempt::Redirect(next) => Ok(Step::Redirect(next)),
            },
            Attempt::Udp => Err(MmsError::ProtocolMismatch(
                "UDP transport is not supported".to_string(),
            )),
            Attempt::Tcp => {
                let (session, info) = MmstSession::open(&self.url, self.config).await?;
                Ok(Step::Opened(MediaSource::Mmst(session), info))
            }
            Attempt::Exhausted => Err(MmsError::ProtocolMismatch(
                "no transport left to try".to_string(),
            )),
        }
    }
}

/// Negotiate a transport for `url`, trying HTTP, then UDP, then TCP as the protocol allows.
pub async fn negotiate(url: Url, config: &StreamConfig) -> MmsResult<(MediaSource, StreamInfo)> {
    Negotiator::new(url, config).run().await
}
