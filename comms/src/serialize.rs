use std::io;

/// Something that can be written into a frame.
pub trait Serialize<'a> {
    /// Writes the owned part of the frame into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The frame buffer, already holding the length prefix.
    ///
    /// # Returns
    /// A borrowed tail to send right after `buf` without copying it, if any, or an
    /// `io::Error` if the value could not be encoded.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>>;
}
