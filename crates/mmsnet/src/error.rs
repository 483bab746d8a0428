use thiserror::Error;

#[derive(Error, Debug)]
pub enum MmsError {
    #[error("Malformed url: {0}")]
    MalformedUrl(String),

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Timed out while {0}")]
    Timeout(&'static str),

    #[error("Seeking is not supported by this stream")]
    UnsupportedSeek,

    #[error("No usable protocol for {url}")]
    NoUsableProtocol {
        url: String,
        #[source]
        last: Option<Box<MmsError>>,
    },

    #[error("Too many redirects ({0})")]
    TooManyRedirects(u32),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Stream closed")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MmsError {
    /// Whether the negotiator may move on to the next candidate transport after this error.
    ///
    /// Errors raised before a protocol is committed are local to one attempt. Url errors,
    /// redirect loops and cancellation are not, and abort negotiation as a whole.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            MmsError::MalformedUrl(_)
                | MmsError::TooManyRedirects(_)
                | MmsError::NoUsableProtocol { .. }
                | MmsError::Cancelled
        )
    }
}

pub type MmsResult<T> = Result<T, MmsError>;
