use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Align4, DEFAULT_MAX_FRAME, Deserialize};

/// Reads length-prefixed frames from an async reader.
pub struct FrameReceiver<R: AsyncRead + Unpin> {
    rx: R,
    max_frame: usize,
}

impl<R: AsyncRead + Unpin> FrameReceiver<R> {
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            max_frame: DEFAULT_MAX_FRAME,
        }
    }

    /// Caps the size of an accepted frame, in bytes.
    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    /// Waits for the next frame and decodes it in place.
    ///
    /// # Arguments
    /// * `buf` - Storage for the frame. Its element type fixes the alignment
    ///   of the received bytes and the decoded message borrows from it.
    ///
    /// # Errors
    /// `InvalidData` if the announced frame exceeds the cap, any read error
    /// otherwise (`UnexpectedEof` once the peer is gone).
    pub async fn recv_into<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
        B: Align4,
    {
        let len = self.rx.read_u64().await?;
        let len = usize::try_from(len)
            .ok()
            .filter(|&len| len <= self.max_frame)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame of {len} bytes exceeds the {} bytes cap", self.max_frame),
                )
            })?;

        buf.clear();
        buf.resize(len.div_ceil(size_of::<B>()), B::zeroed());

        let frame = &mut bytemuck::cast_slice_mut::<B, u8>(buf.as_mut_slice())[..len];
        self.rx.read_exact(frame).await?;

        T::deserialize(frame)
    }
}
