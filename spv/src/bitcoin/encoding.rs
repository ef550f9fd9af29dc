use crate::Result;
use bytes::{Buf, BufMut};

/// Read & write Bitcoin data structures to and from binary in Bitcoin encoding format.
pub trait Encodable {
    /// Read the data structure from a buffer.
    fn from_binary(buffer: &mut dyn Buf) -> Result<Self>
    where
        Self: Sized;

    /// Write the data structure to a buffer.
    fn to_binary(&self, buffer: &mut dyn BufMut) -> Result<()>;

    /// Return the size of the encoded form.
    // Implementations must compute this without encoding, it is used to size the buffer
    // allocated for the encoding.
    fn encoded_size(&self) -> u64;

    /// Encode into a freshly allocated vector.
    fn to_binary_buf(&self) -> Result<Vec<u8>> {
        let mut v = Vec::with_capacity(self.encoded_size() as usize);
        self.to_binary(&mut v)?;
        Ok(v)
    }

    /// Decode from a byte slice, ignoring any trailing bytes.
    fn from_binary_buf(mut data: &[u8]) -> Result<Self>
    where
        Self: Sized,
    {
        Self::from_binary(&mut data)
    }
}
