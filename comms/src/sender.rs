use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LenType, Serialize};

/// Writes length-prefixed frames to an async writer.
///
/// The message head is serialized into a reused buffer, a borrowed body
/// (the `f32` payload of a round) goes straight to the writer after it.
pub struct FrameSender<W: AsyncWrite + Unpin> {
    tx: W,
    head: Vec<u8>,
    sent: u64,
}

impl<W: AsyncWrite + Unpin> FrameSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            head: Vec::new(),
            sent: 0,
        }
    }

    /// Frames `msg` and flushes it.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        self.head.clear();
        let body = msg.serialize(&mut self.head)?;

        let len = self.head.len() + body.map_or(0, <[u8]>::len);
        let len = LenType::try_from(len).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        self.tx.write_u64(len).await?;
        self.tx.write_all(&self.head).await?;
        if let Some(body) = body {
            self.tx.write_all(body).await?;
        }
        self.tx.flush().await?;

        self.sent += 1;
        Ok(())
    }

    /// Amount of frames written so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Shuts down the writing half, the peer reads an end of stream afterwards.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.tx.shutdown().await
    }
}
