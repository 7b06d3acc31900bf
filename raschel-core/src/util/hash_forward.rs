use std::io::{Result, Write};

use crate::hash::ContentHash;

/// Forwards writes to `inner` while digesting exactly the bytes accepted by it.
pub struct HashingForward<W: Write> {
    inner: W,
    hasher: blake3::Hasher,
    written: u64,
}

impl<W: Write> HashingForward<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: blake3::Hasher::new(),
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn finish(self) -> (W, ContentHash) {
        (self.inner, self.hasher.finalize().into())
    }
}

impl<W: Write> Write for HashingForward<W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.inner.write(buf)?;
        // only what the sink took; a short write must not be hashed twice
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;

    #[test]
    fn digest_matches_forwarded_bytes() {
        let mut fw = HashingForward::new(Vec::new());
        fw.write_all(b"line one\n").unwrap();
        fw.write_all(b"line two\n").unwrap();
        assert_eq!(fw.written(), 18);
        let (out, h) = fw.finish();
        assert_eq!(out, b"line one\nline two\n");
        assert_eq!(h, hash_bytes(&out));
    }
}
