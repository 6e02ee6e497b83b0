//! Fixed-size secret buffer with wipe-on-release
//!
//! The bytes are boxed so that moving a `SecureBuffer` only moves a pointer:
//! the secret itself is never copied onto a new stack slot.

use crate::error::{Result, TeeError};
use std::fmt;
use zeroize::Zeroize;

/// Exclusively-owned secret byte array, zeroed before its memory is released
pub struct SecureBuffer<const N: usize> {
    bytes: Box<[u8; N]>,
    released: bool,
}

impl<const N: usize> SecureBuffer<N> {
    /// Acquire a zero-filled buffer
    pub fn new() -> Self {
        Self {
            bytes: Box::new([0u8; N]),
            released: false,
        }
    }

    pub const fn size(&self) -> usize {
        N
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Use the secret in place
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8; N]) -> R) -> Result<R> {
        if self.released {
            return Err(TeeError::InvalidParam("secure buffer already released".into()));
        }
        Ok(f(&self.bytes))
    }

    /// Write or transform the secret in place
    pub fn with_bytes_mut<R>(&mut self, f: impl FnOnce(&mut [u8; N]) -> R) -> Result<R> {
        if self.released {
            return Err(TeeError::InvalidParam("secure buffer already released".into()));
        }
        Ok(f(&mut self.bytes))
    }

    /// Wipe the secret and refuse any further access
    pub fn release(&mut self) {
        self.bytes.zeroize();
        self.released = true;
    }

    /// Move the secret into a new owner. The source is wiped and released.
    pub fn take(&mut self) -> Self {
        let mut dest = Self::new();
        if self.released {
            dest.released = true;
            return dest;
        }
        dest.bytes.copy_from_slice(&self.bytes[..]);
        self.release();
        dest
    }

    /// True when every byte of the backing region is zero
    #[cfg(test)]
    pub(crate) fn is_wiped(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }
}

impl<const N: usize> Default for SecureBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Zeroize for SecureBuffer<N> {
    fn zeroize(&mut self) {
        self.bytes.zeroize();
    }
}

impl<const N: usize> Drop for SecureBuffer<N> {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl<const N: usize> fmt::Debug for SecureBuffer<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureBuffer<{}>([REDACTED])", N)
    }
}

/// Securely clear a raw memory region
pub fn secure_clear(data: &mut [u8]) {
    data.zeroize();
}

/// Securely clear a vector, including its spare capacity. The vector is left empty.
pub fn secure_clear_vec(vec: &mut Vec<u8>) {
    vec.zeroize();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_zeroed() {
        let buf = SecureBuffer::<32>::new();
        assert_eq!(buf.size(), 32);
        assert!(buf.is_wiped());
        assert!(!buf.is_released());
    }

    #[test]
    fn test_release_wipes_and_refuses_access() {
        let mut buf = SecureBuffer::<32>::new();
        buf.with_bytes_mut(|b| b.fill(0xAB)).unwrap();
        assert!(!buf.is_wiped());

        buf.release();
        assert!(buf.is_wiped());
        assert!(buf.is_released());
        assert!(buf.with_bytes(|b| b[0]).is_err());
        assert!(buf.with_bytes_mut(|b| b[0] = 1).is_err());
    }

    #[test]
    fn test_take_wipes_source() {
        let mut src = SecureBuffer::<16>::new();
        src.with_bytes_mut(|b| b.copy_from_slice(&[7u8; 16])).unwrap();

        let dest = src.take();
        assert!(src.is_wiped());
        assert!(src.is_released());
        assert_eq!(dest.with_bytes(|b| *b).unwrap(), [7u8; 16]);
    }

    #[test]
    fn test_take_from_released_stays_released() {
        let mut src = SecureBuffer::<8>::new();
        src.release();
        let dest = src.take();
        assert!(dest.is_released());
    }

    #[test]
    fn test_debug_is_redacted() {
        let mut buf = SecureBuffer::<4>::new();
        buf.with_bytes_mut(|b| b.copy_from_slice(&[0xde, 0xad, 0xbe, 0xef])).unwrap();
        let rendered = format!("{:?}", buf);
        assert_eq!(rendered, "SecureBuffer<4>([REDACTED])");
        assert!(!rendered.contains("de"));
    }

    #[test]
    fn test_secure_clear_region() {
        let mut region = [0x5Au8; 24];
        secure_clear(&mut region[4..20]);
        assert!(region[4..20].iter().all(|b| *b == 0));
        assert_eq!(region[0], 0x5A);
        assert_eq!(region[23], 0x5A);
    }

    #[test]
    fn test_secure_clear_vec() {
        let mut v = vec![1u8, 2, 3, 4];
        secure_clear_vec(&mut v);
        assert!(v.iter().all(|b| *b == 0));
    }
}
