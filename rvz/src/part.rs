//! Wii partition decoding: hash tree reconstruction and sector encryption.
//!
//! Partition data is stored as bare 0x7C00-byte sector payloads. On the disc,
//! each 0x8000-byte sector prefixes its payload with a 0x400-byte hash block
//! (H0: 31 hashes of the sector's payload blocks; H1: 8 hashes covering the
//! sector's subgroup; H2: 8 hashes covering the whole 64-sector group), and
//! both halves are AES-128-CBC encrypted under the partition key. All of that
//! is deterministic, so it is rebuilt here rather than stored.

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use rayon::prelude::*;
use tracing::instrument;
use zerocopy::{FromZeros, IntoBytes};

use crate::{
    common::{HashBytes, KeyBytes, SECTOR_SIZE},
    format::{Partition, PartitionData},
    read::Container,
    util::{aes::encrypt_sector, array_ref, array_ref_mut, digest::sha1_hash},
};

/// Size in bytes of the hash block at the start of each Wii sector.
pub(crate) const HASHES_SIZE: usize = 0x400;

/// Size in bytes of the data in each Wii sector, excluding the hash block.
pub(crate) const SECTOR_DATA_SIZE: usize = SECTOR_SIZE - HASHES_SIZE; // 0x7C00

/// Number of H0 hashes in a sector: one per 0x400-byte payload block.
const NUM_H0_HASHES: usize = SECTOR_DATA_SIZE / HASHES_SIZE; // 31

/// Sectors per hash group: 8 subgroups of 8 sectors.
const SECTORS_PER_GROUP: usize = 64;

/// Payload bytes per hash group.
const GROUP_DATA_SIZE: usize = SECTOR_DATA_SIZE * SECTORS_PER_GROUP;

/// Hashes for a single sector group (64 sectors).
#[derive(Clone, FromZeros)]
struct GroupHashes {
    h2_hashes: [HashBytes; 8],
    h1_hashes: [HashBytes; 64],
    h0_hashes: [HashBytes; 1984],
}

impl GroupHashes {
    #[inline]
    fn hashes_for_sector(
        &self,
        sector: usize,
    ) -> (&[HashBytes; 31], &[HashBytes; 8], &[HashBytes; 8]) {
        let h1_hashes = array_ref![self.h1_hashes, sector & !7, 8];
        let h0_hashes = array_ref![self.h0_hashes, sector * 31, 31];
        (h0_hashes, h1_hashes, &self.h2_hashes)
    }

    /// Writes the sector's hash block: each hash level is followed by zero
    /// padding up to the next 0x40 boundary.
    #[inline]
    fn apply(&self, sector_data: &mut [u8; SECTOR_SIZE], sector: usize) {
        let (h0_hashes, h1_hashes, h2_hashes) = self.hashes_for_sector(sector);
        array_ref_mut![sector_data, 0, 0x26C].copy_from_slice(h0_hashes.as_bytes());
        array_ref_mut![sector_data, 0x280, 0xA0].copy_from_slice(h1_hashes.as_bytes());
        array_ref_mut![sector_data, 0x340, 0xA0].copy_from_slice(h2_hashes.as_bytes());
    }
}

#[instrument(skip_all)]
fn hash_sector_group(data: &[u8]) -> io::Result<Box<GroupHashes>> {
    debug_assert_eq!(data.len(), GROUP_DATA_SIZE);
    let mut result = GroupHashes::new_box_zeroed()
        .map_err(|_| io::Error::from(io::ErrorKind::OutOfMemory))?;
    // H0 hashes are independent across sectors
    result
        .h0_hashes
        .par_chunks_exact_mut(NUM_H0_HASHES)
        .zip(data.par_chunks_exact(SECTOR_DATA_SIZE))
        .for_each(|(out_h0_hashes, sector_data)| {
            for (h0_hash, block) in
                out_h0_hashes.iter_mut().zip(sector_data.chunks_exact(HASHES_SIZE))
            {
                *h0_hash = sha1_hash(block);
            }
        });
    for (h2_index, h2_hash) in result.h2_hashes.iter_mut().enumerate() {
        let out_h1_hashes = array_ref_mut![result.h1_hashes, h2_index * 8, 8];
        for (h1_index, h1_hash) in out_h1_hashes.iter_mut().enumerate() {
            let sector = h1_index + h2_index * 8;
            *h1_hash =
                sha1_hash(array_ref![result.h0_hashes, sector * NUM_H0_HASHES, NUM_H0_HASHES]
                    .as_bytes());
        }
        *h2_hash = sha1_hash(out_h1_hashes.as_bytes());
    }
    Ok(result)
}

pub(crate) struct PartitionReader {
    key: KeyBytes,
    group: u32,
    end_group: u32,
    sectors_remaining: u32,
    /// Payload bytes pulled from the group chain so far; the payload-relative
    /// offset at which the next group begins.
    fetched: u64,
    total_payload: u64,
    gbuf: Bytes,
}

impl PartitionReader {
    pub(crate) fn new(partition: &Partition, data: &PartitionData) -> Self {
        Self {
            key: partition.partition_key,
            group: data.group_index.get(),
            end_group: data.group_index.get() + data.num_groups.get(),
            sectors_remaining: data.num_sectors.get(),
            fetched: 0,
            total_payload: data.num_sectors.get() as u64 * SECTOR_DATA_SIZE as u64,
            gbuf: Bytes::new(),
        }
    }

    /// Produces the next batch of encrypted sectors (up to 64), or `None`
    /// once all of the sub-entry's sectors have been emitted.
    #[instrument(name = "PartitionReader::next_chunk", skip_all)]
    pub(crate) fn next_chunk(&mut self, container: &mut Container) -> io::Result<Option<Bytes>> {
        if self.sectors_remaining == 0 {
            return Ok(None);
        }
        let num_sectors = (self.sectors_remaining as usize).min(SECTORS_PER_GROUP);
        let want = num_sectors * SECTOR_DATA_SIZE;

        // Collect the hash group's payload. A group may span multiple hash
        // groups (chunk sizes over 2 MiB) or cover only part of one (smaller
        // chunk sizes); the remainder of a short final hash group stays
        // zero-filled and still participates in hashing.
        let chunk_payload =
            container.chunk_size() as u64 / SECTOR_SIZE as u64 * SECTOR_DATA_SIZE as u64;
        let mut data = BytesMut::zeroed(GROUP_DATA_SIZE);
        let mut pos = 0;
        while pos < want {
            if self.gbuf.is_empty() {
                if self.group == self.end_group {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "unexpected EOF reading partition group data",
                    ));
                }
                let len = (self.total_payload - self.fetched).min(chunk_payload) as usize;
                self.gbuf = container.read_group(self.group, len, self.fetched, true)?;
                self.group += 1;
                self.fetched += len as u64;
            }
            let n = (want - pos).min(self.gbuf.len());
            data[pos..pos + n].copy_from_slice(&self.gbuf[..n]);
            self.gbuf.advance(n);
            pos += n;
        }
        self.sectors_remaining -= num_sectors as u32;
        if self.sectors_remaining == 0 && (self.gbuf.has_remaining() || self.group != self.end_group)
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "partition sub-entry inconsistent",
            ));
        }

        // Hashing must complete before encryption: the payload IV comes from
        // the encrypted hash block, so within one sector the two CBC passes
        // are sequential. Across sectors both passes are independent.
        let hashes = hash_sector_group(&data)?;
        let mut out = BytesMut::zeroed(num_sectors * SECTOR_SIZE);
        out.as_mut().par_chunks_exact_mut(SECTOR_SIZE).enumerate().for_each(
            |(sector, sector_out)| {
                let sector_out = array_ref_mut![sector_out, 0, SECTOR_SIZE];
                hashes.apply(sector_out, sector);
                sector_out[HASHES_SIZE..].copy_from_slice(
                    &data[sector * SECTOR_DATA_SIZE..(sector + 1) * SECTOR_DATA_SIZE],
                );
                encrypt_sector(sector_out, &self.key);
            },
        );
        Ok(Some(out.freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_sector_group_zero() {
        let data = vec![0u8; GROUP_DATA_SIZE];
        let hashes = hash_sector_group(&data).unwrap();
        let zero_h0 = sha1_hash(&[0u8; HASHES_SIZE]);
        assert!(hashes.h0_hashes.iter().all(|h| *h == zero_h0));
        let h1 = sha1_hash(hashes.h0_hashes[..NUM_H0_HASHES].as_bytes());
        assert!(hashes.h1_hashes.iter().all(|h| *h == h1));
        let h2 = sha1_hash(hashes.h1_hashes[..8].as_bytes());
        assert!(hashes.h2_hashes.iter().all(|h| *h == h2));
    }

    #[test]
    fn test_hash_block_layout() {
        let mut data = vec![0u8; GROUP_DATA_SIZE];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let hashes = hash_sector_group(&data).unwrap();
        let mut sector = [0u8; SECTOR_SIZE];
        hashes.apply(&mut sector, 9);
        // H0 hashes of sector 9, then padding
        assert_eq!(sector[..20], sha1_hash(&data[9 * SECTOR_DATA_SIZE..][..HASHES_SIZE])[..]);
        assert!(sector[0x26C..0x280].iter().all(|&b| b == 0));
        // H1 hashes are shared by the sector's subgroup (sectors 8..16)
        assert_eq!(sector[0x280..0x294], sha1_hash(hashes.h0_hashes[8 * 31..][..31].as_bytes())[..]);
        assert!(sector[0x320..0x340].iter().all(|&b| b == 0));
        // H2 hashes are shared by the whole group
        assert_eq!(sector[0x340..0x354], sha1_hash(hashes.h1_hashes[..8].as_bytes())[..]);
        assert!(sector[0x3E0..0x400].iter().all(|&b| b == 0));
    }
}
