//! TCP transport: one bidirectional byte stream to the server.
//!
//! The stream is split on connect. The write half stays here behind an async
//! mutex so any task can send; the read half is handed out once, as a
//! [`TransportReader`], to the receive loop. Disconnecting flips a watch flag
//! that wakes a reader blocked in [`TransportReader::receive`] right away.

use crate::irc::error::IrcError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::debug;

const READ_CHUNK: usize = 4096;

pub struct Transport {
    host: String,
    port: u16,
    writer: Mutex<Option<OwnedWriteHalf>>,
    shutdown: watch::Sender<bool>,
}

impl Transport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            host: host.into(),
            port,
            writer: Mutex::new(None),
            shutdown,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Open the stream and return its read side.
    pub async fn connect(&self) -> Result<TransportReader, IrcError> {
        let addr = format!("{}:{}", self.host, self.port);
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|source| IrcError::Connect {
                addr: addr.clone(),
                source,
            })?;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        *self.writer.lock().await = Some(writer);
        debug!(%addr, "transport connected");

        Ok(TransportReader {
            reader,
            shutdown: self.shutdown.subscribe(),
            buf: vec![0u8; READ_CHUNK],
        })
    }

    /// Write every byte or fail.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), IrcError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(IrcError::NotConnected)?;
        writer.write_all(bytes).await.map_err(IrcError::Write)
    }

    /// Close the stream. Safe to call any number of times.
    pub async fn disconnect(&self) {
        self.shutdown.send_replace(true);
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("error shutting down write half: {e}");
            }
        }
    }

    pub fn is_open(&self) -> bool {
        !*self.shutdown.borrow()
    }

    /// Half-close the write side but keep it installed, so the next send
    /// hits a real write error.
    #[cfg(test)]
    pub(crate) async fn shutdown_write(&self) {
        if let Some(writer) = self.writer.lock().await.as_mut() {
            let _ = writer.shutdown().await;
        }
    }
}

/// Read side of a connected [`Transport`].
pub struct TransportReader {
    reader: OwnedReadHalf,
    shutdown: watch::Receiver<bool>,
    buf: Vec<u8>,
}

impl TransportReader {
    /// Wait for the next chunk of bytes.
    ///
    /// Returns `Ok(None)` when the peer closes the stream or the transport is
    /// disconnected locally.
    pub async fn receive(&mut self) -> Result<Option<Vec<u8>>, IrcError> {
        if *self.shutdown.borrow() {
            return Ok(None);
        }
        tokio::select! {
            biased;
            _ = self.shutdown.changed() => Ok(None),
            result = self.reader.read(&mut self.buf) => match result {
                Ok(0) => Ok(None),
                Ok(n) => Ok(Some(self.buf[..n].to_vec())),
                Err(e) => Err(IrcError::Read(e)),
            },
        }
    }
}
