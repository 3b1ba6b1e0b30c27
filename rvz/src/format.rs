//! RVZ container data structures.
//!
//! All multi-byte integers are big-endian. The layout follows the RVZ
//! extension of the WIA format; see the wit and Dolphin documentation for the
//! full history of the format.

use std::mem::size_of;

use zerocopy::{big_endian::*, FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    common::{Compression, DiscKind, HashBytes, KeyBytes, MagicBytes, SECTOR_SIZE},
    util::{digest::sha1_hash, static_assert},
    Error, Result,
};

/// Magic bytes for RVZ files.
pub const RVZ_MAGIC: MagicBytes = *b"RVZ\x01";

pub(crate) const RVZ_VERSION: u32 = 0x01000000;
pub(crate) const RVZ_VERSION_READ_COMPATIBLE: u32 = 0x00030000;

/// Size of the disc header echoed into [`DiscInfo`].
pub const DISC_HEAD_SIZE: usize = 0x80;

/// This struct is stored at offset 0x0 and is 0x48 bytes long. The wit source
/// code says its format will never be changed.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(4))]
pub struct FileHeader {
    pub magic: MagicBytes,
    /// The RVZ format version.
    pub version: U32,
    /// If the reading program supports the version indicated here, it can
    /// read the file. [version](Self::version) can be higher than this.
    pub version_compatible: U32,
    /// The size of the [DiscInfo] struct.
    pub disc_size: U32,
    /// The SHA-1 hash of the [DiscInfo] struct.
    pub disc_hash: HashBytes,
    /// The original size of the ISO.
    pub iso_file_size: U64,
    /// The size of this file.
    pub rvz_file_size: U64,
    /// The SHA-1 hash of this struct, up to but not including
    /// `file_head_hash` itself.
    pub file_head_hash: HashBytes,
}

static_assert!(size_of::<FileHeader>() == 0x48);

impl FileHeader {
    pub fn validate(&self) -> Result<()> {
        if self.magic != RVZ_MAGIC {
            return Err(Error::DiscFormat(format!("bad magic: {:#X?}", self.magic)));
        }
        if self.version_compatible.get() > RVZ_VERSION
            || self.version.get() < RVZ_VERSION_READ_COMPATIBLE
        {
            return Err(Error::DiscFormat(format!(
                "unsupported RVZ version: {:#X}",
                self.version.get()
            )));
        }
        // Hash covers exactly the bytes preceding the hash field
        let bytes = self.as_bytes();
        verify_hash("header", &bytes[..bytes.len() - size_of::<HashBytes>()], &self.file_head_hash)
    }
}

/// This struct is stored at offset 0x48, immediately after [FileHeader].
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(4))]
pub struct DiscInfo {
    /// The disc type. (1 = GameCube, 2 = Wii)
    pub disc_type: U32,
    /// The compression type.
    pub compression: U32,
    /// The compression level used by the compressor.
    ///
    /// Signed to support negative Zstandard levels.
    pub compression_level: I32,
    /// The size of the chunks that data is divided into. Must be one of
    /// 32 KiB, 64 KiB, 128 KiB, 256 KiB, 512 KiB, 1 MiB, or a multiple of
    /// 2 MiB.
    pub chunk_size: U32,
    /// The first 0x80 bytes of the disc image.
    pub disc_head: [u8; DISC_HEAD_SIZE],
    /// The number of [Partition] structs.
    pub num_partitions: U32,
    /// The size of one [Partition] struct.
    pub partition_type_size: U32,
    /// The offset in the file where the [Partition] structs are stored
    /// (uncompressed).
    pub partition_offset: U64,
    /// The SHA-1 hash of the [Partition] structs.
    pub partition_hash: HashBytes,
    /// The number of [RawData] structs.
    pub num_raw_data: U32,
    /// The offset in the file where the [RawData] structs are stored
    /// (compressed).
    pub raw_data_offset: U64,
    /// The total compressed size of the [RawData] structs.
    pub raw_data_size: U32,
    /// The number of [Group] structs.
    pub num_groups: U32,
    /// The offset in the file where the [Group] structs are stored
    /// (compressed).
    pub group_offset: U64,
    /// The total compressed size of the [Group] structs.
    pub group_size: U32,
    /// The number of used bytes in the [compr_data](Self::compr_data) array.
    pub compr_data_len: u8,
    /// Compressor specific data. 5 bytes for LZMA (the lc/lp/pb byte and the
    /// little-endian dictionary size), 1 byte for LZMA2, empty otherwise.
    pub compr_data: [u8; 7],
}

static_assert!(size_of::<DiscInfo>() == 0xDC);

impl DiscInfo {
    pub fn validate(&self) -> Result<()> {
        self.kind()?;
        self.compression()?;
        let chunk_size = self.chunk_size.get() as usize;
        let valid = matches!(
            chunk_size,
            0x8000 | 0x10000 | 0x20000 | 0x40000 | 0x80000 | 0x100000
        ) || (chunk_size != 0 && chunk_size % 0x200000 == 0);
        if !valid {
            return Err(Error::DiscFormat(format!("bad chunk size: {:#X}", chunk_size)));
        }
        if self.compr_data_len as usize > self.compr_data.len() {
            return Err(Error::DiscFormat(format!(
                "invalid compressor data length {}",
                self.compr_data_len
            )));
        }
        Ok(())
    }

    pub fn kind(&self) -> Result<DiscKind> { DiscKind::try_from(self.disc_type.get()) }

    pub fn compression(&self) -> Result<Compression> {
        Compression::try_from(self.compression.get())
    }
}

/// Wii partition data is stored decrypted and with hashes removed: for each
/// 0x8000 bytes on the disc, 0x7C00 bytes are stored in the file (prior to
/// compression). The reading program recalculates the hash tree and
/// re-encrypts each sector with [partition_key](Partition::partition_key).
///
/// This does not include the unencrypted area at the beginning of partitions
/// (ticket, TMD, certificate chain, H3 table); that data lives in [RawData]
/// areas.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(4))]
pub struct Partition {
    /// The title key for this partition (128-bit AES), usable directly
    /// without decryption by the Wii common key.
    pub partition_key: KeyBytes,
    /// Sub-entry 0 conventionally covers the partition's management data
    /// (boot .. fst); sub-entry 1 takes the remaining data. A sub-entry with
    /// zero sectors is unused.
    pub partition_data: [PartitionData; 2],
}

static_assert!(size_of::<Partition>() == 0x30);

#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(4))]
pub struct PartitionData {
    /// The sector on the disc at which this data starts.
    pub first_sector: U32,
    /// The number of sectors on the disc covered by this struct.
    pub num_sectors: U32,
    /// The index of the first [Group] struct that points to the data covered
    /// by this struct. The other group indices follow sequentially.
    pub group_index: U32,
    /// The number of [Group] structs used for this data.
    pub num_groups: U32,
}

static_assert!(size_of::<PartitionData>() == 0x10);

impl PartitionData {
    pub fn start_offset(&self) -> u64 { self.first_sector.get() as u64 * SECTOR_SIZE as u64 }

    pub fn end_offset(&self) -> u64 {
        self.start_offset() + self.num_sectors.get() as u64 * SECTOR_SIZE as u64
    }
}

/// This struct is used for keeping track of disc data that is not stored as
/// [Partition] data. The data is stored as is (other than compression).
///
/// The first [RawData] of a disc has `raw_data_offset` set to 0x80, but the
/// group it references actually contains the full first sector; the offset is
/// rounded down to the previous sector boundary (and the size grown by the
/// same amount) rather than special-casing the first entry.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(4))]
pub struct RawData {
    /// The offset on the disc at which this data starts.
    pub raw_data_offset: U64,
    /// The number of bytes on the disc covered by this struct.
    pub raw_data_size: U64,
    /// The index of the first [Group] struct that points to the data covered
    /// by this struct. The other group indices follow sequentially.
    pub group_index: U32,
    /// The number of [Group] structs used for this data.
    pub num_groups: U32,
}

static_assert!(size_of::<RawData>() == 0x18);

impl RawData {
    pub fn start_offset(&self) -> u64 { self.raw_data_offset.get() & !(SECTOR_SIZE as u64 - 1) }

    pub fn end_offset(&self) -> u64 { self.raw_data_offset.get() + self.raw_data_size.get() }
}

/// This struct points directly to the actual disc data, stored compressed.
///
/// A group normally decodes to `chunk_size` bytes of disc data (or
/// `chunk_size / 0x8000 * 0x7C00` for Wii partition data, which excludes
/// hashes), except the last group of an area, which may decode to less.
#[derive(Clone, Debug, PartialEq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, align(4))]
pub struct Group {
    /// The offset in the file where the data is stored, divided by 4.
    pub data_offset: U32,
    /// The most significant bit is 1 if the data is compressed using the
    /// compression method indicated in [DiscInfo]. The lower 31 bits are the
    /// size of the stored data, including any exception lists. The lower 31
    /// bits being 0 is a special case meaning that every byte of the decoded
    /// data is 0x00.
    pub data_size_and_flag: U32,
    /// The size after decompressing but before decoding the RVZ packing.
    /// If this is 0, RVZ packing is not used for this group.
    pub packed_size: U32,
}

static_assert!(size_of::<Group>() == 0x0C);

impl Group {
    /// The physical byte offset of the group data within the RVZ file.
    #[inline]
    pub fn offset(&self) -> u64 { self.data_offset.get() as u64 * 4 }

    /// The stored byte length of the group data.
    #[inline]
    pub fn data_size(&self) -> u32 { self.data_size_and_flag.get() & 0x7FFFFFFF }

    #[inline]
    pub fn is_compressed(&self) -> bool { self.data_size_and_flag.get() & 0x80000000 != 0 }
}

pub(crate) fn verify_hash(kind: &str, buf: &[u8], expected: &HashBytes) -> Result<()> {
    let out = sha1_hash(buf);
    if out != *expected {
        let mut got_bytes = [0u8; 40];
        let got = base16ct::lower::encode_str(&out, &mut got_bytes).unwrap(); // Safe: fixed buffer size
        let mut expected_bytes = [0u8; 40];
        let expected = base16ct::lower::encode_str(expected, &mut expected_bytes).unwrap(); // Safe: fixed buffer size
        return Err(Error::DiscFormat(format!(
            "{} hash doesn't match: {}, expected {}",
            kind, got, expected
        )));
    }
    Ok(())
}
