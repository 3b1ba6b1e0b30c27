//! Group decoding.
//!
//! Groups are the unit of storage in an RVZ file: each one holds `chunk_size`
//! bytes of disc data (or the hash-stripped equivalent for partition data),
//! stored compressed, literal, packed, or elided entirely when all zero.

use std::io::{self, Read, Seek, SeekFrom};

use bytes::{Buf, Bytes, BytesMut};
use tracing::instrument;

use crate::{packed, read::Container};

impl Container {
    /// Decodes group `index` into exactly `len` payload bytes.
    ///
    /// `lfg_offset` is the offset used to align junk generation for packed
    /// groups: the absolute disc offset for raw areas, the payload-relative
    /// offset for partition data. Partition groups carry a hash-exception
    /// count prologue which must be zero.
    #[instrument(name = "Container::read_group", skip_all, fields(index = index))]
    pub(crate) fn read_group(
        &mut self,
        index: u32,
        len: usize,
        lfg_offset: u64,
        in_partition: bool,
    ) -> io::Result<Bytes> {
        let Some(group) = self.groups.get(index as usize).cloned() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("group index {} out of range", index),
            ));
        };

        // Special case for all-zero data. Zero groups store nothing, not even
        // the exception list count.
        if group.data_size() == 0 {
            return Ok(BytesMut::zeroed(len).freeze());
        }

        let mut stored = BytesMut::zeroed(group.data_size() as usize);
        self.stream.seek(SeekFrom::Start(group.offset()))?;
        self.stream.read_exact(stored.as_mut())?;

        let mut data = if group.is_compressed() {
            let mut decompressed = BytesMut::zeroed(self.chunk_size() as usize);
            let n = self.decompressor.decompress(stored.as_ref(), decompressed.as_mut())?;
            decompressed.truncate(n);
            decompressed.freeze()
        } else {
            stored.freeze()
        };

        if in_partition {
            if data.remaining() < 2 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "Reading group exception list count",
                ));
            }
            let num_exceptions = data.get_u16();
            if num_exceptions != 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "unsupported: hash exceptions",
                ));
            }
            // Without compression, data starts on the next 4 byte boundary
            if !group.is_compressed() {
                let rem = ((group.offset() + 2) % 4) as usize;
                if data.remaining() < rem {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "Reading group exception list padding",
                    ));
                }
                data.advance(rem);
            }
        }

        if group.packed_size.get() > 0 {
            let mut out = BytesMut::zeroed(len);
            packed::expand(&mut data, lfg_offset, out.as_mut())?;
            Ok(out.freeze())
        } else {
            if data.remaining() != len {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "group {} data size mismatch: {} != {}",
                        index,
                        data.remaining(),
                        len
                    ),
                ));
            }
            Ok(data)
        }
    }
}
