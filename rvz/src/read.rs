//! [`RvzReader`] and associated types.

use std::{
    fs::File,
    io,
    io::{BufRead, BufReader, Read, Seek, SeekFrom},
    mem::size_of,
    path::Path,
    sync::Arc,
};

use bytes::{Buf, Bytes};
use tracing::debug;
use zerocopy::IntoBytes;

use crate::{
    common::{Compression, DiscKind},
    format::{verify_hash, DiscInfo, FileHeader, Group, Partition, RawData},
    part::PartitionReader,
    raw::RawReader,
    util::{
        compress::{DecompressionKind, Decompressor},
        impl_read_for_bufread,
        read::{read_arc_slice, read_from, read_vec},
    },
    Error, Result, ResultContext,
};

/// Required trait bounds for reading RVZ files.
pub trait DiscStream: Read + Seek + Send {}

impl<T> DiscStream for T where T: Read + Seek + Send + ?Sized {}

/// An open container: the validated metadata tables plus the underlying
/// stream and decompressor used to decode groups on demand.
pub(crate) struct Container {
    pub(crate) stream: Box<dyn DiscStream>,
    pub(crate) header: FileHeader,
    pub(crate) disc: DiscInfo,
    pub(crate) partitions: Arc<[Partition]>,
    pub(crate) raw_data: Arc<[RawData]>,
    pub(crate) groups: Arc<[Group]>,
    pub(crate) decompressor: Decompressor,
}

impl Container {
    fn open(mut stream: Box<dyn DiscStream>) -> Result<Self> {
        // Load & verify file header
        stream.seek(SeekFrom::Start(0)).context("Seeking to start")?;
        let header: FileHeader = read_from(stream.as_mut()).context("Reading RVZ file header")?;
        header.validate()?;
        debug!("Header: {:?}", header);

        // Load & verify disc info
        if header.disc_size.get() as usize != size_of::<DiscInfo>() {
            return Err(Error::DiscFormat("disc struct has wrong size".to_string()));
        }
        let disc: DiscInfo = read_from(stream.as_mut()).context("Reading RVZ disc info")?;
        verify_hash("disc", disc.as_bytes(), &header.disc_hash)?;
        disc.validate()?;
        debug!("Disc: {:?}", disc);

        // Load & verify partition table (stored uncompressed)
        if disc.num_partitions.get() > 0
            && disc.partition_type_size.get() as usize != size_of::<Partition>()
        {
            return Err(Error::DiscFormat("partition struct has wrong size".to_string()));
        }
        stream
            .seek(SeekFrom::Start(disc.partition_offset.get()))
            .context("Seeking to RVZ partition table")?;
        let partitions: Arc<[Partition]> =
            read_arc_slice(stream.as_mut(), disc.num_partitions.get() as usize)
                .context("Reading RVZ partition table")?;
        verify_hash("partition", partitions.as_ref().as_bytes(), &disc.partition_hash)?;
        debug!("Partitions: {:?}", partitions);

        // Create decompressor. This rejects the Purge method up front, so a
        // container declaring it fails before any stream is decoded.
        let mut decompressor = Decompressor::new(DecompressionKind::from_disc(&disc)?);

        // Load raw data table
        let raw_data: Arc<[RawData]> = read_table(
            stream.as_mut(),
            &mut decompressor,
            disc.raw_data_offset.get(),
            disc.raw_data_size.get(),
            disc.num_raw_data.get(),
            "raw data",
        )?;
        debug!("Num raw data: {}", raw_data.len());

        // Load group table
        let groups: Arc<[Group]> = read_table(
            stream.as_mut(),
            &mut decompressor,
            disc.group_offset.get(),
            disc.group_size.get(),
            disc.num_groups.get(),
            "group",
        )?;
        debug!("Num groups: {}", groups.len());

        let container =
            Self { stream, header, disc, partitions, raw_data, groups, decompressor };
        container.validate_areas()?;
        Ok(container)
    }

    fn validate_areas(&self) -> Result<()> {
        let num_groups = self.disc.num_groups.get();
        let group_range_ok =
            |index: u32, count: u32| index.checked_add(count).is_some_and(|end| end <= num_groups);
        for (idx, rd) in self.raw_data.iter().enumerate() {
            if !group_range_ok(rd.group_index.get(), rd.num_groups.get()) {
                return Err(Error::DiscFormat(format!("raw data {} group index out of range", idx)));
            }
            // Allow the end of the last raw data area to be unaligned
            if idx != self.raw_data.len() - 1
                && rd.end_offset() % crate::common::SECTOR_SIZE as u64 != 0
            {
                return Err(Error::DiscFormat(format!(
                    "raw data {} not aligned to sector: {:#X}..{:#X}",
                    idx,
                    rd.start_offset(),
                    rd.end_offset()
                )));
            }
        }
        for (idx, partition) in self.partitions.iter().enumerate() {
            for pd in &partition.partition_data {
                if pd.num_sectors.get() == 0 {
                    continue;
                }
                if !group_range_ok(pd.group_index.get(), pd.num_groups.get()) {
                    return Err(Error::DiscFormat(format!(
                        "partition {} group index out of range",
                        idx
                    )));
                }
                if pd.end_offset() > self.header.iso_file_size.get() {
                    return Err(Error::DiscFormat(format!(
                        "partition {} extends past the end of the disc",
                        idx
                    )));
                }
            }
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn chunk_size(&self) -> u32 { self.disc.chunk_size.get() }
}

/// Reads a table of `count` entries stored compressed under the disc codec.
fn read_table<T>(
    stream: &mut dyn DiscStream,
    decompressor: &mut Decompressor,
    offset: u64,
    compressed_size: u32,
    count: u32,
    what: &str,
) -> Result<Arc<[T]>>
where
    T: zerocopy::FromBytes + IntoBytes,
{
    stream
        .seek(SeekFrom::Start(offset))
        .with_context(|| format!("Seeking to RVZ {} table", what))?;
    let compressed: Vec<u8> = read_vec(stream, compressed_size as usize)
        .with_context(|| format!("Reading RVZ {} table", what))?;
    let mut table = vec![0u8; count as usize * size_of::<T>()];
    let len = decompressor
        .decompress(&compressed, &mut table)
        .with_context(|| format!("Decompressing RVZ {} table", what))?;
    if len != table.len() {
        return Err(Error::DiscFormat(format!(
            "{} table size mismatch: {} != {}",
            what,
            len,
            table.len()
        )));
    }
    read_arc_slice(&mut table.as_slice(), count as usize)
        .with_context(|| format!("Parsing RVZ {} table", what))
}

enum AreaReader {
    Raw(RawReader),
    Partition(PartitionReader),
}

impl AreaReader {
    fn next_chunk(&mut self, container: &mut Container) -> io::Result<Option<Bytes>> {
        match self {
            AreaReader::Raw(r) => r.next_chunk(container),
            AreaReader::Partition(p) => p.next_chunk(container),
        }
    }
}

/// An open RVZ file and its decompressed read stream.
///
/// This is the primary entry point of the library. Construction parses and
/// validates the container; reading yields exactly
/// [`size()`](RvzReader::size) bytes of the original disc image, in order,
/// then end-of-stream. Implements [`BufRead`], so copies can borrow the
/// internal group buffers directly.
pub struct RvzReader {
    container: Container,
    area: Option<AreaReader>,
    area_end: u64,
    buf: Bytes,
    pos: u64,
}

impl std::fmt::Debug for RvzReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RvzReader")
            .field("area_end", &self.area_end)
            .field("pos", &self.pos)
            .finish_non_exhaustive()
    }
}

impl RvzReader {
    /// Opens an RVZ container from a read stream.
    ///
    /// Validation failures surface here; failures in the compressed body
    /// surface on the read that reaches them.
    pub fn new(stream: Box<dyn DiscStream>) -> Result<Self> {
        let container = Container::open(stream)?;
        Ok(Self { container, area: None, area_end: 0, buf: Bytes::new(), pos: 0 })
    }

    /// Opens an RVZ container from a filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::Io(format!("Failed to open {}", path.display()), e))?;
        Self::new(Box::new(BufReader::new(file)))
    }

    /// The size in bytes of the decompressed disc image.
    #[inline]
    pub fn size(&self) -> u64 { self.container.header.iso_file_size.get() }

    /// The disc kind (GameCube or Wii).
    #[inline]
    pub fn kind(&self) -> DiscKind {
        self.container.disc.kind().unwrap() // Validated at open
    }

    /// The compression method used by the container.
    #[inline]
    pub fn compression(&self) -> Compression {
        self.container.disc.compression().unwrap() // Validated at open
    }

    /// The container's chunk size in bytes.
    #[inline]
    pub fn chunk_size(&self) -> u32 { self.container.chunk_size() }

    /// Installs the reader for the area starting exactly at the current
    /// offset. Raw areas and partition sub-entries together tile the disc;
    /// a miss means the container is inconsistent.
    fn next_area(&mut self) -> io::Result<()> {
        for rd in self.container.raw_data.iter() {
            if rd.start_offset() == self.pos && rd.end_offset() > rd.start_offset() {
                self.area = Some(AreaReader::Raw(RawReader::new(rd)));
                self.area_end = rd.end_offset();
                return Ok(());
            }
        }
        for partition in self.container.partitions.iter() {
            for pd in &partition.partition_data {
                if pd.num_sectors.get() > 0 && pd.start_offset() == self.pos {
                    self.area = Some(AreaReader::Partition(PartitionReader::new(partition, pd)));
                    self.area_end = pd.end_offset();
                    return Ok(());
                }
            }
        }
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("assembly gap at offset {:#X}", self.pos),
        ))
    }

    fn prepare(&mut self) -> io::Result<()> {
        loop {
            if !self.buf.is_empty() || self.pos >= self.size() {
                return Ok(());
            }
            let area = match &mut self.area {
                Some(area) => area,
                None => {
                    self.next_area()?;
                    continue;
                }
            };
            match area.next_chunk(&mut self.container)? {
                Some(chunk) => self.buf = chunk,
                None => {
                    if self.pos != self.area_end {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("unexpected EOF at offset {:#X}", self.pos),
                        ));
                    }
                    self.area = None;
                }
            }
        }
    }
}

impl BufRead for RvzReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.prepare()?;
        let limit = self.size().saturating_sub(self.pos).min(self.buf.len() as u64) as usize;
        Ok(&self.buf[..limit])
    }

    fn consume(&mut self, amt: usize) {
        self.buf.advance(amt);
        self.pos += amt as u64;
    }
}

impl_read_for_bufread!(RvzReader);
