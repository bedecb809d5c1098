//! Random-access file adapters that decrypt/encrypt on the fly as the
//! underlying file is read or written, so container code can treat encrypted
//! regions as plain `Read`/`Write`/`Seek` streams.

use crate::crypto::cipher::{CbcCipher, CtrCipher};
use std::io::{self, Read, Seek, SeekFrom, Write};

/// A CTR-encrypted region of a file, keyed and counter-based at byte offset
/// 0 of the region. Only used for non-TWL keyslots: every keyslot this tool
/// writes through (SD, NCCH, CMAC-SD-NAND) is numbered >= 0x18.
pub struct CtrFileIo<F> {
    inner: F,
    key: [u8; 16],
    base_counter: u128,
}

impl<F> CtrFileIo<F> {
    pub fn new(inner: F, key: [u8; 16], base_counter: u128) -> Self {
        Self {
            inner,
            key,
            base_counter,
        }
    }

    pub fn into_inner(self) -> F {
        self.inner
    }
}

impl<F: Read + Seek> Read for CtrFileIo<F> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let cur_offset = self.inner.stream_position()?;
        let n = self.inner.read(out)?;
        if n == 0 {
            return Ok(0);
        }

        let counter = self.base_counter.wrapping_add((cur_offset >> 4) as u128);
        let pad = (cur_offset % 16) as usize;

        let mut scratch = vec![0u8; pad + n];
        scratch[pad..].copy_from_slice(&out[..n]);
        CtrCipher::new(self.key, counter, false).apply_keystream(&mut scratch);
        out[..n].copy_from_slice(&scratch[pad..]);

        Ok(n)
    }
}

impl<F: Write + Seek> Write for CtrFileIo<F> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let cur_offset = self.inner.stream_position()?;
        let counter = self.base_counter.wrapping_add((cur_offset >> 4) as u128);
        let pad = (cur_offset % 16) as usize;

        let mut scratch = vec![0u8; pad + data.len()];
        scratch[pad..].copy_from_slice(data);
        CtrCipher::new(self.key, counter, false).apply_keystream(&mut scratch);

        self.inner.write(&scratch[pad..])
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<F: Seek> Seek for CtrFileIo<F> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

/// A CBC-encrypted, read-only region of a file. Random access re-derives the
/// chaining IV from the preceding ciphertext block (or the region's own IV,
/// at offset 0) on every read, since CBC decryption of block N needs block
/// N-1's ciphertext regardless of where the read starts.
pub struct CbcFileIo<F> {
    inner: F,
    key: [u8; 16],
    region_iv: [u8; 16],
}

impl<F> CbcFileIo<F> {
    pub fn new(inner: F, key: [u8; 16], region_iv: [u8; 16]) -> Self {
        Self {
            inner,
            key,
            region_iv,
        }
    }
}

impl<F: Read + Seek> Read for CbcFileIo<F> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let offset = self.inner.stream_position()?;
        let before = (offset % 16) as usize;

        let iv = if offset - before as u64 == 0 {
            self.region_iv
        } else {
            self.inner.seek(SeekFrom::Current(-(16 + before as i64)))?;
            let mut iv_buf = [0u8; 16];
            self.inner.read_exact(&mut iv_buf)?;
            iv_buf
        };

        let mut leading = vec![0u8; before];
        self.inner.read_exact(&mut leading)?;

        let mut requested = vec![0u8; out.len()];
        let requested_len = self.inner.read(&mut requested)?;
        requested.truncate(requested_len);

        let total = leading.len() + requested.len();
        let trailing = if total % 16 != 0 {
            let pad_len = 16 - (total % 16);
            let mut buf = vec![0u8; pad_len];
            let got = self.inner.read(&mut buf)?;
            buf.truncate(got);
            self.inner.seek(SeekFrom::Current(-(got as i64)))?;
            buf
        } else {
            Vec::new()
        };

        let mut joined = Vec::with_capacity(leading.len() + requested.len() + trailing.len());
        joined.extend_from_slice(&leading);
        joined.extend_from_slice(&requested);
        joined.extend_from_slice(&trailing);

        let decrypted = CbcCipher::new(self.key, iv, false).decrypt(&joined);
        let end = (before + requested_len).min(decrypted.len());
        let n = end.saturating_sub(before);
        out[..n].copy_from_slice(&decrypted[before..end]);

        Ok(n)
    }
}

impl<F: Seek> Seek for CbcFileIo<F> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}
