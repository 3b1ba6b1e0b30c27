//! Raw area decoding.
//!
//! A raw area is a contiguous range of the disc stored outside any partition:
//! the disc header, metadata, the unencrypted start of each partition, and
//! the gaps between them.

use std::io;

use bytes::{Bytes, BytesMut};

use crate::{
    format::{RawData, DISC_HEAD_SIZE},
    read::Container,
};

pub(crate) struct RawReader {
    group: u32,
    end_group: u32,
    offset: u64,
    end_offset: u64,
}

impl RawReader {
    pub(crate) fn new(raw: &RawData) -> Self {
        Self {
            group: raw.group_index.get(),
            end_group: raw.group_index.get() + raw.num_groups.get(),
            offset: raw.start_offset(),
            end_offset: raw.end_offset(),
        }
    }

    /// Decodes the next group of the area, or `None` once the area's groups
    /// are exhausted.
    pub(crate) fn next_chunk(&mut self, container: &mut Container) -> io::Result<Option<Bytes>> {
        if self.group == self.end_group {
            return Ok(None);
        }
        let chunk_size = container.chunk_size() as u64;
        // The last group of an area may be shorter than the chunk size
        let len = (self.end_offset - self.offset).min(chunk_size) as usize;
        let mut data = container.read_group(self.group, len, self.offset, false)?;
        if self.offset == 0 {
            // The first bytes of the disc are echoed in the disc info
            let mut buf = BytesMut::from(data.as_ref());
            let n = buf.len().min(DISC_HEAD_SIZE);
            buf[..n].copy_from_slice(&container.disc.disc_head[..n]);
            data = buf.freeze();
        }
        self.group += 1;
        self.offset += len as u64;
        Ok(Some(data))
    }
}
