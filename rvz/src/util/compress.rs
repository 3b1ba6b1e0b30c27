use std::io;

use tracing::instrument;

use crate::{common::Compression, format::DiscInfo, Error, Result};

/// Buffer-to-buffer decompressor for the disc's declared codec. Group sizes
/// are bounded by the chunk size, so every stream in the container can be
/// decoded in a single shot into a caller-provided buffer.
pub struct Decompressor {
    pub kind: DecompressionKind,
    #[allow(unused)] // if compression features are disabled
    pub cache: DecompressorCache,
}

#[derive(Default)]
pub enum DecompressorCache {
    #[default]
    None,
    #[cfg(feature = "compress-zstd")]
    Zstandard(zstd_safe::DCtx<'static>),
}

impl Decompressor {
    pub fn new(kind: DecompressionKind) -> Self {
        Self { kind, cache: DecompressorCache::default() }
    }

    #[instrument(name = "Decompressor::decompress", skip_all)]
    pub fn decompress(&mut self, buf: &[u8], out: &mut [u8]) -> io::Result<usize> {
        match &self.kind {
            DecompressionKind::None => {
                if buf.len() > out.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Decompressed data too large: {} > {}", buf.len(), out.len()),
                    ));
                }
                out[..buf.len()].copy_from_slice(buf);
                Ok(buf.len())
            }
            #[cfg(feature = "compress-bzip2")]
            DecompressionKind::Bzip2 => {
                let mut decoder = bzip2::Decompress::new(false);
                let status = decoder.decompress(buf, out)?;
                match status {
                    bzip2::Status::StreamEnd => Ok(decoder.total_out() as usize),
                    _ => Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Bzip2 decompression status {:?}", status),
                    )),
                }
            }
            #[cfg(feature = "compress-lzma")]
            DecompressionKind::Lzma(data) => {
                use lzma_util::{lzma_props_decode, new_lzma_decoder};
                let mut decoder = new_lzma_decoder(&lzma_props_decode(data)?)?;
                let status = decoder.process(buf, out, liblzma::stream::Action::Finish)?;
                match status {
                    liblzma::stream::Status::StreamEnd => Ok(decoder.total_out() as usize),
                    _ => Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("LZMA decompression status {:?}", status),
                    )),
                }
            }
            #[cfg(feature = "compress-lzma")]
            DecompressionKind::Lzma2(data) => {
                use lzma_util::{lzma2_props_decode, new_lzma2_decoder};
                let mut decoder = new_lzma2_decoder(&lzma2_props_decode(data)?)?;
                let status = decoder.process(buf, out, liblzma::stream::Action::Finish)?;
                match status {
                    liblzma::stream::Status::StreamEnd => Ok(decoder.total_out() as usize),
                    _ => Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("LZMA2 decompression status {:?}", status),
                    )),
                }
            }
            #[cfg(feature = "compress-zstd")]
            DecompressionKind::Zstandard => {
                let ctx = match &mut self.cache {
                    DecompressorCache::Zstandard(ctx) => ctx,
                    _ => {
                        let ctx = zstd_safe::DCtx::create();
                        self.cache = DecompressorCache::Zstandard(ctx);
                        match &mut self.cache {
                            DecompressorCache::Zstandard(ctx) => ctx,
                            _ => unreachable!(),
                        }
                    }
                };
                ctx.decompress(out, buf).map_err(zstd_util::map_error_code)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum DecompressionKind {
    None,
    #[cfg(feature = "compress-bzip2")]
    Bzip2,
    #[cfg(feature = "compress-lzma")]
    Lzma(Box<[u8]>),
    #[cfg(feature = "compress-lzma")]
    Lzma2(Box<[u8]>),
    #[cfg(feature = "compress-zstd")]
    Zstandard,
}

impl DecompressionKind {
    pub fn from_disc(disc: &DiscInfo) -> Result<Self> {
        let _data = &disc.compr_data[..disc.compr_data_len as usize];
        match disc.compression()? {
            Compression::None => Ok(Self::None),
            Compression::Purge => Err(Error::Unsupported("purge method not supported".to_string())),
            #[cfg(feature = "compress-bzip2")]
            Compression::Bzip2 => Ok(Self::Bzip2),
            #[cfg(feature = "compress-lzma")]
            Compression::Lzma => Ok(Self::Lzma(Box::from(_data))),
            #[cfg(feature = "compress-lzma")]
            Compression::Lzma2 => Ok(Self::Lzma2(Box::from(_data))),
            #[cfg(feature = "compress-zstd")]
            Compression::Zstandard => Ok(Self::Zstandard),
            #[allow(unreachable_patterns)] // if compression features are disabled
            comp => Err(Error::Unsupported(format!("RVZ compression {}", comp))),
        }
    }
}

#[cfg(feature = "compress-lzma")]
pub mod lzma_util {
    use std::io::{Error, ErrorKind, Result};

    use liblzma::stream::{Filters, LzmaOptions, Stream};

    use crate::util::array_ref;

    /// Decodes the LZMA Properties byte into (lc, lp, pb).
    /// See `lzma_lzma_lclppb_decode` in `liblzma/lzma/lzma_decoder.c`.
    fn lzma_lclppb_decode(byte: u8) -> Result<(u32, u32, u32)> {
        let mut d = byte as u32;
        if d >= (9 * 5 * 5) {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("Invalid LZMA props byte: {}", d),
            ));
        }
        let lc = d % 9;
        d /= 9;
        Ok((lc, d % 5, d / 5))
    }

    /// Decodes LZMA properties.
    /// See `lzma_lzma_props_decode` in `liblzma/lzma/lzma_decoder.c`.
    pub fn lzma_props_decode(props: &[u8]) -> Result<LzmaOptions> {
        if props.len() != 5 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("Invalid LZMA props length: {}", props.len()),
            ));
        }
        let (lc, lp, pb) = lzma_lclppb_decode(props[0])?;
        let mut options = LzmaOptions::new();
        options.literal_context_bits(lc);
        options.literal_position_bits(lp);
        options.position_bits(pb);
        options.dict_size(u32::from_le_bytes(*array_ref![props, 1, 4]));
        Ok(options)
    }

    /// Decodes the LZMA2 dictionary size byte.
    /// See `lzma_lzma2_props_decode` in `liblzma/lzma/lzma2_decoder.c`.
    fn lzma2_dict_size(byte: u8) -> Result<u32> {
        let d = byte as u32;
        match d {
            40 => Ok(u32::MAX),
            0..=39 => Ok((2 | (d & 1)) << (d / 2 + 11)),
            _ => Err(Error::new(ErrorKind::InvalidData, format!("Invalid LZMA2 props byte: {}", d))),
        }
    }

    /// Decodes LZMA2 properties.
    pub fn lzma2_props_decode(props: &[u8]) -> Result<LzmaOptions> {
        if props.len() != 1 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("Invalid LZMA2 props length: {}", props.len()),
            ));
        }
        let mut options = LzmaOptions::new();
        options.dict_size(lzma2_dict_size(props[0])?);
        Ok(options)
    }

    /// Creates a new raw LZMA decoder with the given options.
    pub fn new_lzma_decoder(options: &LzmaOptions) -> Result<Stream> {
        let mut filters = Filters::new();
        filters.lzma1(options);
        Stream::new_raw_decoder(&filters).map_err(Error::from)
    }

    /// Creates a new raw LZMA2 decoder with the given options.
    pub fn new_lzma2_decoder(options: &LzmaOptions) -> Result<Stream> {
        let mut filters = Filters::new();
        filters.lzma2(options);
        Stream::new_raw_decoder(&filters).map_err(Error::from)
    }

}

#[cfg(feature = "compress-zstd")]
mod zstd_util {
    use std::io;

    pub fn map_error_code(code: usize) -> io::Error {
        io::Error::new(io::ErrorKind::Other, zstd_safe::get_error_name(code))
    }
}
