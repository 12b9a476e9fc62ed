use anyhow::anyhow;
use serde::{de::DeserializeOwned, Serialize};

/// Trait for records that occupy a fixed number of bytes in the image
/// # Note
/// Encoding uses the `bincode` legacy configuration:
/// little endian and fixed-width integers, so the encoded size never depends on the values.
pub trait FixedRecord: Serialize + DeserializeOwned {
    /// bytes this record takes on disk
    const ENCODED_SIZE: usize;

    /// serialize into the front of `buf`
    /// # Returns
    /// The number of bytes written if successful
    fn serialize_into(&self, buf: &mut [u8]) -> anyhow::Result<usize> {
        if buf.len() < Self::ENCODED_SIZE {
            return Err(anyhow!(
                "record needs {} bytes, only {} available",
                Self::ENCODED_SIZE,
                buf.len()
            ));
        }
        let config = bincode::config::legacy();
        let mut slot = &mut buf[..Self::ENCODED_SIZE];
        let written = bincode::serde::encode_into_std_write(self, &mut slot, config)?;
        debug_assert_eq!(written, Self::ENCODED_SIZE);
        Ok(written)
    }

    /// deserialize from the front of `buf`
    fn deserialize_from(buf: &[u8]) -> anyhow::Result<Self> {
        let config = bincode::config::legacy();
        let mut slot = buf;
        let object: Self = bincode::serde::decode_from_std_read(&mut slot, config)?;
        Ok(object)
    }
}
