use crate::{
    config::StreamConfig,
    error::{MmsError, MmsResult},
};
use bytes::{Buf, BytesMut};
use std::{io, net::SocketAddr, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

/// A TCP stream whose every operation is bounded by the configured timeouts.
///
/// Bytes handed back with [`Connection::unread`] are returned before any new socket data,
/// which is how a response body that arrived together with its header is replayed.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    read_timeout: Duration,
    pending: BytesMut,
}

impl Connection {
    pub async fn connect(host: &str, port: u16, config: &StreamConfig) -> MmsResult<Self> {
        log::debug!("Connecting to {host}:{port}");
        let stream = timeout(config.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| MmsError::Timeout("connecting"))?
            .map_err(|source| MmsError::Connect {
                addr: format!("{host}:{port}"),
                source,
            })?;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            read_timeout: config.read_timeout,
            pending: BytesMut::new(),
        })
    }

    pub fn local_addr(&self) -> MmsResult<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    pub fn unread(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Read whatever is available. `0` means the peer closed the connection.
    pub async fn read(&mut self, buf: &mut [u8]) -> MmsResult<usize> {
        if !self.pending.is_empty() {
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.advance(n);
            return Ok(n);
        }
        timeout(self.read_timeout, self.stream.read(buf))
            .await
            .map_err(|_| MmsError::Timeout("reading"))?
            .map_err(MmsError::from)
    }

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> MmsResult<()> {
        if self.read_exact_or_eof(buf).await? {
            Ok(())
        } else {
            Err(io::Error::from(io::ErrorKind::UnexpectedEof).into())
        }
    }

    /// Fill `buf` completely. Returns `false` when the peer closed before the first byte;
    /// a close in the middle is an error.
    pub async fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> MmsResult<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            filled += n;
        }
        Ok(true)
    }

    /// Read and throw away `len` bytes.
    pub async fn discard(&mut self, mut len: usize) -> MmsResult<()> {
        let mut scratch = [0u8; 4096];
        while len > 0 {
            let n = len.min(scratch.len());
            self.read_exact(&mut scratch[..n]).await?;
            len -= n;
        }
        Ok(())
    }

    pub async fn write_all(&mut self, data: &[u8]) -> MmsResult<()> {
        timeout(self.read_timeout, self.stream.write_all(data))
            .await
            .map_err(|_| MmsError::Timeout("writing"))?
            .map_err(MmsError::from)
    }

    pub async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            log::debug!("Failed to shut down connection: {e}");
        }
    }
}
