use std::io::{Cursor, Read};

use bytes::Bytes;
use rvz::{common::DiscKind, read::RvzReader, util::lfg::LaggedFibonacci};
use sha1::{Digest, Sha1};

fn sha1(buf: &[u8]) -> [u8; 20] { Sha1::digest(buf).into() }

const SECTOR_SIZE: usize = 0x8000;
const SECTOR_DATA_SIZE: usize = 0x7C00;

#[derive(Clone)]
enum GroupSpec {
    /// All-zero group: no stored data.
    Zero,
    Stored { data: Vec<u8>, compressed: bool, packed_size: u32 },
}

struct RawSpec {
    offset: u64,
    size: u64,
    group_index: u32,
    num_groups: u32,
}

struct PartSpec {
    key: [u8; 16],
    data: [[u32; 4]; 2], // first_sector, num_sectors, group_index, num_groups
}

/// Builds a syntactically valid RVZ container in memory. All hash fields are
/// computed, so the result passes open-time validation by construction.
struct Builder {
    disc_type: u32,
    compression: u32,
    chunk_size: u32,
    disc_head: [u8; 0x80],
    iso_size: u64,
    parts: Vec<PartSpec>,
    raws: Vec<RawSpec>,
    groups: Vec<GroupSpec>,
}

impl Builder {
    fn new(disc_type: u32, chunk_size: u32, iso_size: u64) -> Self {
        Self {
            disc_type,
            compression: 0,
            chunk_size,
            disc_head: [0u8; 0x80],
            iso_size,
            parts: Vec::new(),
            raws: Vec::new(),
            groups: Vec::new(),
        }
    }

    fn compress(&self, data: &[u8]) -> Vec<u8> {
        match self.compression {
            #[cfg(feature = "compress-zstd")]
            5 => zstd_compress(data),
            _ => data.to_vec(),
        }
    }

    fn build(&self) -> Vec<u8> {
        let mut part_table = Vec::new();
        for p in &self.parts {
            part_table.extend_from_slice(&p.key);
            for d in &p.data {
                for v in d {
                    part_table.extend_from_slice(&v.to_be_bytes());
                }
            }
        }
        let mut raw_table = Vec::new();
        for r in &self.raws {
            raw_table.extend_from_slice(&r.offset.to_be_bytes());
            raw_table.extend_from_slice(&r.size.to_be_bytes());
            raw_table.extend_from_slice(&r.group_index.to_be_bytes());
            raw_table.extend_from_slice(&r.num_groups.to_be_bytes());
        }
        let raw_table_c = self.compress(&raw_table);

        let part_off = (0x48 + 0xDC) as u64;
        let raw_off = part_off + part_table.len() as u64;
        let mut pos = raw_off + raw_table_c.len() as u64;

        // Group data blobs, each aligned to 4 so the offset/4 encoding works
        let mut data_section = Vec::new();
        let pad = (4 - (pos % 4) as usize) % 4;
        data_section.resize(data_section.len() + pad, 0);
        pos += pad as u64;
        let mut group_table = Vec::new();
        for g in &self.groups {
            let (offset, size_and_flag, packed_size) = match g {
                GroupSpec::Zero => (0u32, 0u32, 0u32),
                GroupSpec::Stored { data, compressed, packed_size } => {
                    let entry = (
                        (pos / 4) as u32,
                        data.len() as u32 | if *compressed { 0x8000_0000 } else { 0 },
                        *packed_size,
                    );
                    data_section.extend_from_slice(data);
                    pos += data.len() as u64;
                    let pad = (4 - (pos % 4) as usize) % 4;
                    data_section.resize(data_section.len() + pad, 0);
                    pos += pad as u64;
                    entry
                }
            };
            group_table.extend_from_slice(&offset.to_be_bytes());
            group_table.extend_from_slice(&size_and_flag.to_be_bytes());
            group_table.extend_from_slice(&packed_size.to_be_bytes());
        }
        let group_table_c = self.compress(&group_table);
        let group_off = pos;
        let total = pos + group_table_c.len() as u64;

        let mut disc = Vec::with_capacity(0xDC);
        disc.extend_from_slice(&self.disc_type.to_be_bytes());
        disc.extend_from_slice(&self.compression.to_be_bytes());
        disc.extend_from_slice(&0i32.to_be_bytes());
        disc.extend_from_slice(&self.chunk_size.to_be_bytes());
        disc.extend_from_slice(&self.disc_head);
        disc.extend_from_slice(&(self.parts.len() as u32).to_be_bytes());
        disc.extend_from_slice(&48u32.to_be_bytes());
        disc.extend_from_slice(&part_off.to_be_bytes());
        disc.extend_from_slice(&sha1(&part_table));
        disc.extend_from_slice(&(self.raws.len() as u32).to_be_bytes());
        disc.extend_from_slice(&raw_off.to_be_bytes());
        disc.extend_from_slice(&(raw_table_c.len() as u32).to_be_bytes());
        disc.extend_from_slice(&(self.groups.len() as u32).to_be_bytes());
        disc.extend_from_slice(&group_off.to_be_bytes());
        disc.extend_from_slice(&(group_table_c.len() as u32).to_be_bytes());
        disc.push(0); // compr_data_len
        disc.extend_from_slice(&[0u8; 7]);
        assert_eq!(disc.len(), 0xDC);

        let mut header = Vec::with_capacity(0x48);
        header.extend_from_slice(b"RVZ\x01");
        header.extend_from_slice(&0x0100_0000u32.to_be_bytes()); // version
        header.extend_from_slice(&0x0003_0000u32.to_be_bytes()); // version_compatible
        header.extend_from_slice(&0xDCu32.to_be_bytes());
        header.extend_from_slice(&sha1(&disc));
        header.extend_from_slice(&self.iso_size.to_be_bytes());
        header.extend_from_slice(&total.to_be_bytes());
        let head_hash = sha1(&header);
        header.extend_from_slice(&head_hash);
        assert_eq!(header.len(), 0x48);

        let mut out = Vec::with_capacity(total as usize);
        out.extend_from_slice(&header);
        out.extend_from_slice(&disc);
        out.extend_from_slice(&part_table);
        out.extend_from_slice(&raw_table_c);
        out.extend_from_slice(&data_section);
        out.extend_from_slice(&group_table_c);
        assert_eq!(out.len() as u64, total);
        out
    }
}

#[cfg(feature = "compress-zstd")]
fn zstd_compress(data: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; zstd_safe::compress_bound(data.len())];
    let n = zstd_safe::compress(buf.as_mut_slice(), data, 3).expect("zstd compression failed");
    buf.truncate(n);
    buf
}

fn open(data: Vec<u8>) -> rvz::Result<RvzReader> { RvzReader::new(Box::new(Cursor::new(data))) }

fn read_all(data: Vec<u8>) -> std::io::Result<Vec<u8>> {
    let mut reader = open(data).expect("Failed to open container");
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    Ok(out)
}

fn pattern(len: usize, mul: u8, add: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(mul).wrapping_add(add)).collect()
}

#[test]
fn test_zero_group() {
    let mut b = Builder::new(1, 0x8000, 0x8000);
    b.raws.push(RawSpec { offset: 0, size: 0x8000, group_index: 0, num_groups: 1 });
    b.groups.push(GroupSpec::Zero);
    let reader = open(b.build()).unwrap();
    assert_eq!(reader.size(), 0x8000);
    assert_eq!(reader.kind(), DiscKind::GameCube);
    let out = read_all(b.build()).unwrap();
    assert_eq!(out.len(), 0x8000);
    assert!(out.iter().all(|&v| v == 0));
}

#[test]
fn test_literal_groups_and_disc_head_echo() {
    let data0 = pattern(0x8000, 3, 1);
    let data1 = pattern(0x8000, 5, 2);
    let data2 = pattern(0x4000, 7, 3);
    let mut b = Builder::new(1, 0x8000, 0x14000);
    b.disc_head = pattern(0x80, 11, 4).try_into().unwrap();
    b.raws.push(RawSpec { offset: 0, size: 0x14000, group_index: 0, num_groups: 3 });
    for data in [&data0, &data1, &data2] {
        b.groups.push(GroupSpec::Stored {
            data: data.clone(),
            compressed: false,
            packed_size: 0,
        });
    }
    let out = read_all(b.build()).unwrap();
    assert_eq!(out.len(), 0x14000);
    // The first 0x80 bytes come from the disc info echo, not the group
    assert_eq!(&out[..0x80], &b.disc_head[..]);
    assert_eq!(&out[0x80..0x8000], &data0[0x80..]);
    assert_eq!(&out[0x8000..0x10000], &data1[..]);
    assert_eq!(&out[0x10000..], &data2[..]);
}

#[test]
fn test_unaligned_raw_area() {
    // Like the first raw data area of a real disc: offset 0x80, but the
    // group contains the whole first sector
    let data = pattern(0x8000, 13, 7);
    let mut b = Builder::new(1, 0x8000, 0x8000);
    b.disc_head.copy_from_slice(&data[..0x80]);
    b.raws.push(RawSpec { offset: 0x80, size: 0x7F80, group_index: 0, num_groups: 1 });
    b.groups.push(GroupSpec::Stored { data: data.clone(), compressed: false, packed_size: 0 });
    let out = read_all(b.build()).unwrap();
    assert_eq!(out, data);
}

#[test]
fn test_packed_group() {
    let seed: Vec<u8> = pattern(68, 29, 17);
    let mut frame = Vec::new();
    frame.extend_from_slice(&(0x8000_0000u32 | 0x8000).to_be_bytes());
    frame.extend_from_slice(&seed);
    let mut b = Builder::new(1, 0x8000, 0x10000);
    b.raws.push(RawSpec { offset: 0, size: 0x8000, group_index: 0, num_groups: 1 });
    b.raws.push(RawSpec { offset: 0x8000, size: 0x8000, group_index: 1, num_groups: 1 });
    b.groups.push(GroupSpec::Zero);
    b.groups.push(GroupSpec::Stored { data: frame, compressed: false, packed_size: 0x8000 });
    let out = read_all(b.build()).unwrap();
    assert_eq!(out.len(), 0x10000);
    assert!(out[..0x8000].iter().all(|&v| v == 0));

    let mut lfg = LaggedFibonacci::default();
    lfg.init_with_buf(&mut Bytes::copy_from_slice(&seed)).unwrap();
    // The padded stream begins at disc offset 0x8000, a sector boundary
    let mut expected = vec![0u8; 0x8000];
    lfg.fill(&mut expected);
    assert_eq!(&out[0x8000..], &expected[..]);
}

#[cfg(feature = "compress-zstd")]
#[test]
fn test_zstd_container() {
    let data = pattern(0x8000, 3, 9);
    let mut b = Builder::new(1, 0x8000, 0x8000);
    b.compression = 5;
    b.disc_head.copy_from_slice(&data[..0x80]);
    b.raws.push(RawSpec { offset: 0, size: 0x8000, group_index: 0, num_groups: 1 });
    b.groups.push(GroupSpec::Stored {
        data: zstd_compress(&data),
        compressed: true,
        packed_size: 0,
    });
    let reader = open(b.build()).unwrap();
    assert_eq!(reader.compression(), rvz::common::Compression::Zstandard);
    let out = read_all(b.build()).unwrap();
    assert_eq!(out, data);
}

fn wii_builder(payload: &[u8], key: [u8; 16]) -> Builder {
    assert_eq!(payload.len(), 2 * SECTOR_DATA_SIZE);
    let mut b = Builder::new(2, 0x200000, 0x18000);
    b.raws.push(RawSpec { offset: 0, size: 0x8000, group_index: 0, num_groups: 1 });
    b.groups.push(GroupSpec::Zero);
    // Partition data: sectors 1..3, one group
    b.parts.push(PartSpec { key, data: [[1, 2, 1, 1], [0, 0, 0, 0]] });
    // Uncompressed groups align the data to a 4 byte boundary after the
    // 2-byte exception list count
    let mut data = vec![0u8, 0, 0, 0];
    data.extend_from_slice(payload);
    b.groups.push(GroupSpec::Stored { data, compressed: false, packed_size: 0 });
    b
}

fn decrypt_sector(sector: &mut [u8], key: &[u8; 16]) {
    use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};
    assert_eq!(sector.len(), SECTOR_SIZE);
    let iv: [u8; 16] = sector[0x3D0..0x3E0].try_into().unwrap();
    let zero_iv = [0u8; 16];
    <cbc::Decryptor<aes::Aes128>>::new(key.into(), (&zero_iv).into())
        .decrypt_padded_mut::<NoPadding>(&mut sector[..0x400])
        .unwrap();
    <cbc::Decryptor<aes::Aes128>>::new(key.into(), (&iv).into())
        .decrypt_padded_mut::<NoPadding>(&mut sector[0x400..])
        .unwrap();
}

fn check_wii_output(out: &[u8], payload: &[u8], key: &[u8; 16]) {
    assert_eq!(out.len(), 0x18000);
    assert!(out[..0x8000].iter().all(|&v| v == 0));

    let mut sectors = [out[0x8000..0x10000].to_vec(), out[0x10000..].to_vec()];
    for sector in &mut sectors {
        decrypt_sector(sector, key);
    }
    let zero_h0 = sha1(&[0u8; 0x400]);
    for (i, sector) in sectors.iter().enumerate() {
        // Payload survives the hash/encrypt round trip
        assert_eq!(&sector[0x400..], &payload[i * SECTOR_DATA_SIZE..(i + 1) * SECTOR_DATA_SIZE]);
        // H0: one SHA-1 per 1 KiB payload block, then padding
        for block in 0..31 {
            let digest = sha1(&sector[0x400 + block * 0x400..][..0x400]);
            assert_eq!(&sector[block * 20..(block + 1) * 20], &digest[..]);
        }
        assert!(sector[0x26C..0x280].iter().all(|&v| v == 0));
        assert!(sector[0x320..0x340].iter().all(|&v| v == 0));
        assert!(sector[0x3E0..0x400].iter().all(|&v| v == 0));
    }
    // H1 entries hash each sector's H0 array; missing sectors hash as zeros
    let h1_0 = sha1(&sectors[0][..0x26C]);
    let h1_1 = sha1(&sectors[1][..0x26C]);
    let mut zero_h0_array = Vec::new();
    for _ in 0..31 {
        zero_h0_array.extend_from_slice(&zero_h0);
    }
    let h1_zero = sha1(&zero_h0_array);
    for sector in &sectors {
        assert_eq!(&sector[0x280..0x294], &h1_0[..]);
        assert_eq!(&sector[0x294..0x2A8], &h1_1[..]);
        assert_eq!(&sector[0x2A8..0x2BC], &h1_zero[..]);
    }
    // H1 and H2 blocks are identical across the group
    assert_eq!(&sectors[0][0x280..0x320], &sectors[1][0x280..0x320]);
    assert_eq!(&sectors[0][0x340..0x3E0], &sectors[1][0x340..0x3E0]);
    // H2 entry 0 hashes the H1 region
    let h2_0 = sha1(&sectors[0][0x280..0x320]);
    assert_eq!(&sectors[0][0x340..0x354], &h2_0[..]);
}

#[test]
fn test_wii_partition() {
    let payload = pattern(2 * SECTOR_DATA_SIZE, 3, 5);
    let key = *b"\x00\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0A\x0B\x0C\x0D\x0E\x0F";
    let b = wii_builder(&payload, key);
    let reader = open(b.build()).unwrap();
    assert_eq!(reader.kind(), DiscKind::Wii);
    let out = read_all(b.build()).unwrap();
    check_wii_output(&out, &payload, &key);
}

#[cfg(feature = "compress-zstd")]
#[test]
fn test_wii_partition_zstd() {
    let payload = pattern(2 * SECTOR_DATA_SIZE, 9, 1);
    let key = *b"\x52\x56\x5A\x20\x74\x65\x73\x74\x20\x6B\x65\x79\x20\x31\x32\x38";
    let mut b = wii_builder(&payload, key);
    b.compression = 5;
    // Compressed groups store the exception list count inside the compressed
    // stream, with no alignment padding
    let mut plain = vec![0u8, 0];
    plain.extend_from_slice(&payload);
    b.groups[1] = GroupSpec::Stored { data: zstd_compress(&plain), compressed: true, packed_size: 0 };
    let out = read_all(b.build()).unwrap();
    check_wii_output(&out, &payload, &key);
}

#[test]
fn test_header_tamper() {
    let mut b = Builder::new(1, 0x8000, 0x8000);
    b.raws.push(RawSpec { offset: 0, size: 0x8000, group_index: 0, num_groups: 1 });
    b.groups.push(GroupSpec::Zero);
    let mut data = b.build();
    // Flip a bit in iso_file_size
    data[0x24] ^= 0x01;
    let err = open(data).unwrap_err();
    assert!(err.to_string().contains("header hash doesn't match"), "{}", err);
}

#[test]
fn test_disc_tamper() {
    let mut b = Builder::new(1, 0x8000, 0x8000);
    b.raws.push(RawSpec { offset: 0, size: 0x8000, group_index: 0, num_groups: 1 });
    b.groups.push(GroupSpec::Zero);
    let mut data = b.build();
    // Flip a bit in the disc head echo
    data[0x58] ^= 0x80;
    let err = open(data).unwrap_err();
    assert!(err.to_string().contains("disc hash doesn't match"), "{}", err);
}

#[test]
fn test_partition_tamper() {
    let payload = pattern(2 * SECTOR_DATA_SIZE, 3, 5);
    let b = wii_builder(&payload, [7u8; 16]);
    let mut data = b.build();
    // Flip a bit in the partition key
    data[0x124] ^= 0x01;
    let err = open(data).unwrap_err();
    assert!(err.to_string().contains("partition hash doesn't match"), "{}", err);
}

#[test]
fn test_bad_magic() {
    let mut b = Builder::new(1, 0x8000, 0x8000);
    b.raws.push(RawSpec { offset: 0, size: 0x8000, group_index: 0, num_groups: 1 });
    b.groups.push(GroupSpec::Zero);
    let mut data = b.build();
    data[0] = b'X';
    let err = open(data).unwrap_err();
    assert!(err.to_string().contains("bad magic"), "{}", err);
}

#[test]
fn test_wrong_disc_size() {
    let mut b = Builder::new(1, 0x8000, 0x8000);
    b.raws.push(RawSpec { offset: 0, size: 0x8000, group_index: 0, num_groups: 1 });
    b.groups.push(GroupSpec::Zero);
    let mut data = b.build();
    // Patch disc_size and fix up the header hash so only the size check fires
    data[12..16].copy_from_slice(&0xDDu32.to_be_bytes());
    let hash = sha1(&data[..0x34]);
    data[0x34..0x48].copy_from_slice(&hash);
    let err = open(data).unwrap_err();
    assert!(err.to_string().contains("disc struct has wrong size"), "{}", err);
}

#[test]
fn test_purge_rejected() {
    let mut b = Builder::new(1, 0x8000, 0x8000);
    b.compression = 1;
    b.raws.push(RawSpec { offset: 0, size: 0x8000, group_index: 0, num_groups: 1 });
    b.groups.push(GroupSpec::Zero);
    let err = open(b.build()).unwrap_err();
    assert!(err.to_string().contains("purge method not supported"), "{}", err);
}

#[test]
fn test_bad_chunk_size() {
    let mut b = Builder::new(1, 0x6000, 0x8000);
    b.raws.push(RawSpec { offset: 0, size: 0x8000, group_index: 0, num_groups: 1 });
    b.groups.push(GroupSpec::Zero);
    let err = open(b.build()).unwrap_err();
    assert!(err.to_string().contains("bad chunk size"), "{}", err);
}

#[test]
fn test_assembly_gap() {
    // Nothing covers [0, 0x8000)
    let mut b = Builder::new(1, 0x8000, 0x10000);
    b.raws.push(RawSpec { offset: 0x8000, size: 0x8000, group_index: 0, num_groups: 1 });
    b.groups.push(GroupSpec::Zero);
    let err = read_all(b.build()).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    assert!(err.to_string().contains("assembly gap"), "{}", err);
}

#[test]
fn test_group_size_mismatch() {
    // Group stores half the bytes the area needs
    let mut b = Builder::new(1, 0x8000, 0x8000);
    b.raws.push(RawSpec { offset: 0, size: 0x8000, group_index: 0, num_groups: 1 });
    b.groups.push(GroupSpec::Stored {
        data: pattern(0x4000, 3, 3),
        compressed: false,
        packed_size: 0,
    });
    let err = read_all(b.build()).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    assert!(err.to_string().contains("data size mismatch"), "{}", err);
}

#[test]
fn test_group_index_out_of_range() {
    let mut b = Builder::new(1, 0x8000, 0x8000);
    b.raws.push(RawSpec { offset: 0, size: 0x8000, group_index: 4, num_groups: 1 });
    b.groups.push(GroupSpec::Zero);
    let err = open(b.build()).unwrap_err();
    assert!(err.to_string().contains("group index out of range"), "{}", err);
}
