//! Lagged Fibonacci generator for GC / Wii disc junk data.

use std::io;

use bytes::Buf;
use tracing::instrument;
use zerocopy::{transmute_ref, IntoBytes};

/// Value of `k` for the LFG.
pub const LFG_K: usize = 521;

/// Value of `k` for the LFG in bytes.
pub const LFG_K_BYTES: usize = LFG_K * 4;

/// Value of `j` for the LFG.
pub const LFG_J: usize = 32;

/// Number of 32-bit words in the seed.
pub const SEED_SIZE: usize = 17;

/// Size of the seed in bytes.
pub const SEED_SIZE_BYTES: usize = SEED_SIZE * 4;

/// Lagged Fibonacci generator for GC / Wii disc junk data.
///
/// RVZ stores junk regions as a 17-word seed for this generator instead of
/// the data itself. The output must match the factory padding bit-for-bit,
/// including the quirk of extracting the second byte of each word from bit 18
/// rather than bit 16.
///
/// References (license CC0-1.0):
/// - [WiaAndRvz.md](https://github.com/dolphin-emu/dolphin/blob/a0f555648c27ec0c928f6b1e1fcad5e2d7c4d0c4/docs/WiaAndRvz.md)
/// - [LaggedFibonacciGenerator.cpp](https://github.com/dolphin-emu/dolphin/blob/a0f555648c27ec0c928f6b1e1fcad5e2d7c4d0c4/Source/Core/DiscIO/LaggedFibonacciGenerator.cpp)
pub struct LaggedFibonacci {
    buffer: [u32; LFG_K],
    position: usize,
}

impl Default for LaggedFibonacci {
    #[inline]
    fn default() -> Self { Self { buffer: [0u32; LFG_K], position: 0 } }
}

impl LaggedFibonacci {
    fn init(&mut self) {
        for i in SEED_SIZE..LFG_K {
            self.buffer[i] = (self.buffer[i - SEED_SIZE] << 23)
                ^ (self.buffer[i - SEED_SIZE + 1] >> 9)
                ^ self.buffer[i - 1];
        }
        // Instead of doing the "shift by 18 instead of 16" oddity when actually outputting the data,
        // we can do the shifting (and byteswapping) at this point to make the output code simpler.
        for x in self.buffer.iter_mut() {
            *x = ((*x & 0xFF00FFFF) | (*x >> 2 & 0x00FF0000)).to_be();
        }
        for _ in 0..4 {
            self.forward();
        }
    }

    /// Initializes the LFG with the seed read from a [`Buf`]. The seed is assumed to be big-endian.
    /// This is how padding seeds are stored in RVZ packed streams.
    #[instrument(name = "LaggedFibonacci::init_with_buf", skip_all)]
    pub fn init_with_buf(&mut self, reader: &mut impl Buf) -> io::Result<()> {
        let out = self.buffer[..SEED_SIZE].as_mut_bytes();
        if reader.remaining() < out.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "Filling LFG seed"));
        }
        reader.copy_to_slice(out);
        for x in self.buffer[..SEED_SIZE].iter_mut() {
            *x = u32::from_be(*x);
        }
        self.position = 0;
        self.init();
        Ok(())
    }

    /// Advances the LFG by one step.
    // This gets vectorized and aggressively inlined, so it's better to
    // keep it separate for code size and instruction cache pressure.
    #[inline(never)]
    fn forward(&mut self) {
        for i in 0..LFG_J {
            self.buffer[i] ^= self.buffer[i + LFG_K - LFG_J];
        }
        for i in LFG_J..LFG_K {
            self.buffer[i] ^= self.buffer[i - LFG_J];
        }
    }

    /// Skips `n` bytes of junk data.
    pub fn skip(&mut self, n: usize) {
        self.position += n;
        while self.position >= LFG_K_BYTES {
            self.forward();
            self.position -= LFG_K_BYTES;
        }
    }

    /// Fills the buffer with junk data.
    #[instrument(name = "LaggedFibonacci::fill", skip_all)]
    pub fn fill(&mut self, mut buf: &mut [u8]) {
        while !buf.is_empty() {
            while self.position >= LFG_K_BYTES {
                self.forward();
                self.position -= LFG_K_BYTES;
            }
            let bytes: &[u8; LFG_K_BYTES] = transmute_ref!(&self.buffer);
            let len = buf.len().min(LFG_K_BYTES - self.position);
            buf[..len].copy_from_slice(&bytes[self.position..self.position + len]);
            self.position += len;
            buf = &mut buf[len..];
        }
    }
}
