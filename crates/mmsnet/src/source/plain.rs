use super::asf_http::{Credentials, Target};
use crate::{
    config::StreamConfig,
    error::{MmsError, MmsResult},
    http::{self, HttpRequest},
    net::Connection,
};

/// An HTTP response body passed through untouched.
pub struct PlainStream {
    conn: Connection,
    target: Target,
    credentials: Option<Credentials>,
    config: StreamConfig,
    seekable: bool,
    position: u64,
}

impl PlainStream {
    pub(crate) fn new(
        conn: Connection,
        target: Target,
        credentials: Option<Credentials>,
        config: StreamConfig,
        seekable: bool,
    ) -> Self {
        Self {
            conn,
            target,
            credentials,
            config,
            seekable,
            position: 0,
        }
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> MmsResult<usize> {
        let n = self.conn.read(buf).await?;
        self.position += n as u64;
        Ok(n)
    }

    fn range_request(&self, pos: u64) -> HttpRequest {
        let host = self
            .target
            .host_field
            .strip_suffix(":80")
            .unwrap_or(&self.target.host_field);

        let mut request = HttpRequest::get(self.target.uri.clone());
        request
            .field(format!("Host: {host}"))
            .field(format!("User-Agent: {}", self.config.user_agent));
        if let Some(credentials) = &self.credentials {
            request.basic_auth(&credentials.username, credentials.password.as_deref());
        }
        if pos > 0 {
            request.field(format!("Range: bytes={pos}-"));
        }
        request.field("Connection: close");
        request
    }

    /// Reconnect asking for the body from `pos` onwards.
    pub async fn reseek(&mut self, pos: u64) -> MmsResult<()> {
        if !self.seekable {
            return Err(MmsError::UnsupportedSeek);
        }
        if pos == self.position {
            return Ok(());
        }

        let mut conn = Connection::connect(&self.target.host, self.target.port, &self.config).await?;
        let response = http::exchange(&mut conn, &self.range_request(pos)).await?;
        match response.status_code {
            206 => {}
            200 if pos == 0 => {}
            code => {
                log::warn!("Server answered {code} to a range request, cannot seek");
                return Err(MmsError::UnsupportedSeek);
            }
        }

        log::debug!("Reconnected at byte {pos}");
        self.conn.shutdown().await;
        self.conn = conn;
        self.position = pos;
        Ok(())
    }

    pub async fn close(&mut self) {
        self.conn.shutdown().await;
    }
}
