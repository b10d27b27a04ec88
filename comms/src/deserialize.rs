use std::io;

/// Decodes a message borrowing from the frame it was received in.
pub trait Deserialize<'a>: Sized {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self>;
}
