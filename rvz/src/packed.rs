//! RVZ packed stream decoding.
//!
//! A packed stream is a sequence of frames, each a big-endian `u32` header
//! whose low 31 bits are the frame length. If the high bit is set, a 68-byte
//! LFG seed follows and the frame decodes to generated junk data; otherwise
//! the frame payload is stored literally. Packing lets large junk runs
//! collapse to a seed regardless of how well they compress.

use std::io;

use bytes::{Buf, Bytes};

use crate::{common::SECTOR_SIZE, util::lfg::LaggedFibonacci};

/// Expands a packed stream into `out`, which must be sized to the decoded
/// length. `disc_offset` is where the decoded data lands relative to the
/// stream the junk generator is aligned to (the disc for raw areas, the
/// partition payload for partition data).
pub(crate) fn expand(data: &mut Bytes, disc_offset: u64, out: &mut [u8]) -> io::Result<()> {
    let mut read = 0usize;
    let mut lfg = LaggedFibonacci::default();
    while data.remaining() >= 4 {
        let header = data.get_u32();
        let size = (header & 0x7FFF_FFFF) as usize;
        if read + size > out.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("RVZ packed data overruns group: {} > {}", read + size, out.len()),
            ));
        }
        if header & 0x8000_0000 != 0 {
            // Junk data
            lfg.init_with_buf(data)?;
            lfg.skip(((disc_offset + read as u64) % SECTOR_SIZE as u64) as usize);
            lfg.fill(&mut out[read..read + size]);
        } else {
            // Real data
            if data.remaining() < size {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "Reading RVZ packed data",
                ));
            }
            data.copy_to_slice(&mut out[read..read + size]);
        }
        read += size;
    }
    if data.has_remaining() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Failed to consume all packed group data",
        ));
    }
    if read != out.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("RVZ packed data size mismatch: {} != {}", read, out.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::util::lfg::SEED_SIZE_BYTES;

    fn seed() -> [u8; SEED_SIZE_BYTES] {
        let mut seed = [0u8; SEED_SIZE_BYTES];
        for (i, b) in seed.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(73).wrapping_add(5);
        }
        seed
    }

    #[test]
    fn test_literal_identity() {
        let payload: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        let mut data = BytesMut::new();
        data.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        data.extend_from_slice(&payload);
        let mut data = data.freeze();
        let mut out = vec![0u8; payload.len()];
        expand(&mut data, 0, &mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_padded_frame() {
        let seed = seed();
        let len = 0x8000usize;
        let mut data = BytesMut::new();
        data.extend_from_slice(&(0x8000_0000u32 | len as u32).to_be_bytes());
        data.extend_from_slice(&seed);
        let mut data = data.freeze();
        let mut out = vec![0u8; len];
        let disc_offset = 0x12345u64;
        expand(&mut data, disc_offset, &mut out).unwrap();

        let mut lfg = LaggedFibonacci::default();
        lfg.init_with_buf(&mut Bytes::copy_from_slice(&seed)).unwrap();
        lfg.skip((disc_offset % SECTOR_SIZE as u64) as usize);
        let mut expected = vec![0u8; len];
        lfg.fill(&mut expected);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_mixed_frames() {
        let seed = seed();
        let literal: Vec<u8> = (0..0x123u32).map(|i| (i * 7) as u8).collect();
        let junk_len = 0x400usize;
        let mut data = BytesMut::new();
        data.extend_from_slice(&(literal.len() as u32).to_be_bytes());
        data.extend_from_slice(&literal);
        data.extend_from_slice(&(0x8000_0000u32 | junk_len as u32).to_be_bytes());
        data.extend_from_slice(&seed);
        let mut data = data.freeze();
        let mut out = vec![0u8; literal.len() + junk_len];
        expand(&mut data, 0, &mut out).unwrap();

        assert_eq!(&out[..literal.len()], literal.as_slice());
        let mut lfg = LaggedFibonacci::default();
        lfg.init_with_buf(&mut Bytes::copy_from_slice(&seed)).unwrap();
        // The junk frame starts mid-sector, after the literal bytes
        lfg.skip(literal.len());
        let mut expected = vec![0u8; junk_len];
        lfg.fill(&mut expected);
        assert_eq!(&out[literal.len()..], expected.as_slice());
    }

    #[test]
    fn test_size_mismatch() {
        let mut data = BytesMut::new();
        data.extend_from_slice(&4u32.to_be_bytes());
        data.extend_from_slice(&[1, 2, 3, 4]);
        let mut data = data.freeze();
        let mut out = vec![0u8; 8];
        let err = expand(&mut data, 0, &mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_overrun() {
        let mut data = BytesMut::new();
        data.extend_from_slice(&8u32.to_be_bytes());
        data.extend_from_slice(&[0u8; 8]);
        let mut data = data.freeze();
        let mut out = vec![0u8; 4];
        let err = expand(&mut data, 0, &mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
