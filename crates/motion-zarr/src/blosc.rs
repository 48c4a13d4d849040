// Blosc: the default chunk codec of zarr v2 stores
//
// A Blosc chunk is a 16-byte header followed by independently compressed
// blocks:
//
//   0       version        1       codec format version
//   2       flags          3       typesize
//   4..8    nbytes         uncompressed size (u32 LE)
//   8..12   blocksize      bytes per block, the last one may be shorter
//   12..16  cbytes         total chunk size including the header
//   16..    bstarts        one u32 offset per block, then the block data
//
// Flags: 0x01 byte shuffle, 0x02 stored uncompressed after the header,
// 0x04 bit shuffle, 0x10 blocks are not split, bits 5..7 the codec.
//
// A block is one stream, or `typesize` streams (one per byte of the type)
// when split. Each stream is a u32 compressed length and its bytes, stored
// raw when the length equals the uncompressed stream size.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use motion_core::{Error, Result};

const HEADER_LEN: usize = 16;
const VERSION: u8 = 2;

const FLAG_SHUFFLE: u8 = 0x01;
const FLAG_MEMCPYED: u8 = 0x02;
const FLAG_BITSHUFFLE: u8 = 0x04;
const FLAG_DONT_SPLIT: u8 = 0x10;

const MAX_SPLITS: usize = 16;
const MIN_BUFFERSIZE: usize = 128;
const MAX_TYPESIZE: usize = 255;

/// Block size used when encoding with `blocksize: 0`.
pub const DEFAULT_BLOCKSIZE: usize = 256 * 1024;

/// Codec inside a Blosc chunk (`cname` in `.zarray`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BloscCodec {
    BloscLz,
    Lz4,
    Lz4hc,
    Snappy,
    Zlib,
    Zstd,
}

impl BloscCodec {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "blosclz" => Ok(Self::BloscLz),
            "lz4" => Ok(Self::Lz4),
            "lz4hc" => Ok(Self::Lz4hc),
            "snappy" => Ok(Self::Snappy),
            "zlib" => Ok(Self::Zlib),
            "zstd" => Ok(Self::Zstd),
            other => Err(Error::UnsupportedCompressor(format!("blosc/{other}"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::BloscLz => "blosclz",
            Self::Lz4 => "lz4",
            Self::Lz4hc => "lz4hc",
            Self::Snappy => "snappy",
            Self::Zlib => "zlib",
            Self::Zstd => "zstd",
        }
    }

    /// Whether chunks written with this codec can be read and written here.
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Lz4 | Self::Lz4hc | Self::Zlib | Self::Zstd)
    }

    fn format_code(&self) -> u8 {
        match self {
            Self::BloscLz => 0,
            Self::Lz4 | Self::Lz4hc => 1,
            Self::Snappy => 2,
            Self::Zlib => 3,
            Self::Zstd => 4,
        }
    }

    fn from_format_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::BloscLz),
            1 => Ok(Self::Lz4),
            2 => Ok(Self::Snappy),
            3 => Ok(Self::Zlib),
            4 => Ok(Self::Zstd),
            other => Err(Error::UnsupportedCompressor(format!(
                "blosc codec format {other}"
            ))),
        }
    }

    fn unsupported(&self) -> Error {
        Error::UnsupportedCompressor(format!("blosc/{}", self.name()))
    }

    fn decompress_into(&self, src: &[u8], dest: &mut [u8]) -> Result<()> {
        let written = match self {
            Self::Lz4 | Self::Lz4hc => lz4_flex::block::decompress_into(src, dest)
                .map_err(|e| corrupt(format!("lz4: {e}")))?,
            Self::Zlib => {
                let mut out = Vec::with_capacity(dest.len());
                ZlibDecoder::new(src).read_to_end(&mut out)?;
                let n = out.len().min(dest.len());
                dest[..n].copy_from_slice(&out[..n]);
                out.len()
            }
            Self::Zstd => {
                let out = zstd::bulk::decompress(src, dest.len())?;
                let n = out.len().min(dest.len());
                dest[..n].copy_from_slice(&out[..n]);
                out.len()
            }
            Self::BloscLz | Self::Snappy => return Err(self.unsupported()),
        };
        if written != dest.len() {
            return Err(corrupt(format!(
                "stream decoded to {written} bytes, expected {}",
                dest.len()
            )));
        }
        Ok(())
    }

    fn compress(&self, src: &[u8], clevel: u8) -> Result<Vec<u8>> {
        match self {
            Self::Lz4 | Self::Lz4hc => Ok(lz4_flex::block::compress(src)),
            Self::Zlib => {
                let mut enc = ZlibEncoder::new(
                    Vec::new(),
                    flate2::Compression::new(u32::from(clevel.min(9))),
                );
                enc.write_all(src)?;
                Ok(enc.finish()?)
            }
            Self::Zstd => Ok(zstd::bulk::compress(src, i32::from(clevel))?),
            Self::BloscLz | Self::Snappy => Err(self.unsupported()),
        }
    }
}

/// Shuffle filter applied before compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shuffle {
    None,
    Byte,
    Bit,
}

impl Shuffle {
    /// numcodecs encoding: 0 none, 1 byte, 2 bit, -1 automatic.
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(Self::None),
            // automatic picks byte shuffle for every multi-byte record type
            1 | -1 => Ok(Self::Byte),
            2 => Ok(Self::Bit),
            other => Err(Error::UnsupportedCompressor(format!(
                "blosc shuffle {other}"
            ))),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::None => 0,
            Self::Byte => 1,
            Self::Bit => 2,
        }
    }
}

/// Encoder settings, mirroring the numcodecs `Blosc` configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloscOptions {
    pub codec: BloscCodec,
    pub clevel: u8,
    pub shuffle: Shuffle,
    /// Bytes per block; 0 picks [`DEFAULT_BLOCKSIZE`].
    pub blocksize: usize,
}

impl Default for BloscOptions {
    fn default() -> Self {
        Self {
            codec: BloscCodec::Lz4,
            clevel: 5,
            shuffle: Shuffle::Byte,
            blocksize: 0,
        }
    }
}

fn corrupt(reason: impl Into<String>) -> Error {
    Error::msg(format!("corrupt blosc chunk: {}", reason.into()))
}

fn read_u32(src: &[u8], at: usize) -> Result<usize> {
    src.get(at..at + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
        .ok_or_else(|| corrupt(format!("truncated at byte {at}")))
}

fn split_count(flags: u8, typesize: usize, bsize: usize, leftover: bool) -> usize {
    let split = flags & FLAG_DONT_SPLIT == 0
        && typesize <= MAX_SPLITS
        && bsize / typesize >= MIN_BUFFERSIZE
        && !leftover;
    if split {
        typesize
    } else {
        1
    }
}

fn shuffle(src: &[u8], dest: &mut [u8], typesize: usize) {
    let n = src.len() / typesize;
    for j in 0..typesize {
        for i in 0..n {
            dest[j * n + i] = src[i * typesize + j];
        }
    }
    let tail = n * typesize;
    dest[tail..].copy_from_slice(&src[tail..]);
}

fn unshuffle(src: &[u8], dest: &mut [u8], typesize: usize) {
    let n = src.len() / typesize;
    for j in 0..typesize {
        for i in 0..n {
            dest[i * typesize + j] = src[j * n + i];
        }
    }
    let tail = n * typesize;
    dest[tail..].copy_from_slice(&src[tail..]);
}

/// Decode one Blosc chunk.
pub fn decompress(src: &[u8]) -> Result<Vec<u8>> {
    if src.len() < HEADER_LEN {
        return Err(corrupt(format!("{} bytes is shorter than the header", src.len())));
    }
    let flags = src[2];
    let typesize = usize::from(src[3]).max(1);
    let nbytes = read_u32(src, 4)?;
    let blocksize = read_u32(src, 8)?;

    if flags & FLAG_MEMCPYED != 0 {
        return src
            .get(HEADER_LEN..HEADER_LEN + nbytes)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| corrupt("stored chunk is truncated"));
    }
    if flags & FLAG_BITSHUFFLE != 0 {
        return Err(Error::UnsupportedCompressor("blosc bitshuffle".into()));
    }
    let codec = BloscCodec::from_format_code(flags >> 5)?;
    let mut out = vec![0u8; nbytes];
    if nbytes == 0 {
        return Ok(out);
    }
    if blocksize == 0 {
        return Err(corrupt("zero block size"));
    }

    let byte_shuffled = flags & FLAG_SHUFFLE != 0 && typesize > 1;
    let nblocks = nbytes.div_ceil(blocksize);
    let mut scratch = vec![0u8; blocksize];
    for b in 0..nblocks {
        let start = b * blocksize;
        let bsize = blocksize.min(nbytes - start);
        let nsplits = split_count(flags, typesize, bsize, start + blocksize > nbytes);
        let neblock = bsize / nsplits;

        let buf = &mut scratch[..bsize];
        let mut pos = read_u32(src, HEADER_LEN + 4 * b)?;
        for s in 0..nsplits {
            let csize = read_u32(src, pos)?;
            pos += 4;
            let stream = src
                .get(pos..pos + csize)
                .ok_or_else(|| corrupt(format!("block {b} is truncated")))?;
            pos += csize;
            let part = &mut buf[s * neblock..(s + 1) * neblock];
            if csize == neblock {
                part.copy_from_slice(stream);
            } else {
                codec.decompress_into(stream, part)?;
            }
        }

        let dest = &mut out[start..start + bsize];
        if byte_shuffled {
            unshuffle(buf, dest, typesize);
        } else {
            dest.copy_from_slice(buf);
        }
    }
    Ok(out)
}

/// Encode `data` as one Blosc chunk. Blocks are written unsplit.
pub fn compress(data: &[u8], typesize: usize, options: &BloscOptions) -> Result<Vec<u8>> {
    if !options.codec.is_supported() {
        return Err(options.codec.unsupported());
    }
    if options.shuffle == Shuffle::Bit {
        return Err(Error::UnsupportedCompressor("blosc bitshuffle".into()));
    }
    let typesize = if (1..=MAX_TYPESIZE).contains(&typesize) {
        typesize
    } else {
        1
    };
    let nbytes = data.len();
    let nbytes_u32 = u32::try_from(nbytes)
        .map_err(|_| Error::msg(format!("chunk of {nbytes} bytes is too large for blosc")))?;

    let mut flags = FLAG_DONT_SPLIT | (options.codec.format_code() << 5);
    let byte_shuffled = options.shuffle == Shuffle::Byte && typesize > 1;
    if byte_shuffled {
        flags |= FLAG_SHUFFLE;
    }

    let requested = match options.blocksize {
        0 => DEFAULT_BLOCKSIZE,
        n => n,
    };
    let blocksize = if nbytes == 0 {
        0
    } else {
        (requested.max(typesize) / typesize * typesize).min(nbytes)
    };

    let mut out = vec![VERSION, 1, flags, typesize as u8];
    out.extend_from_slice(&nbytes_u32.to_le_bytes());
    out.extend_from_slice(&(blocksize as u32).to_le_bytes());
    out.extend_from_slice(&[0; 4]);
    if nbytes == 0 {
        out[2] |= FLAG_MEMCPYED;
        let total = out.len() as u32;
        out[12..16].copy_from_slice(&total.to_le_bytes());
        return Ok(out);
    }

    let nblocks = nbytes.div_ceil(blocksize);
    let bstarts_at = out.len();
    out.resize(bstarts_at + 4 * nblocks, 0);
    let mut shuffled = vec![0u8; blocksize];
    for (b, block) in data.chunks(blocksize).enumerate() {
        let offset = out.len() as u32;
        out[bstarts_at + 4 * b..bstarts_at + 4 * b + 4].copy_from_slice(&offset.to_le_bytes());

        let plain: &[u8] = if byte_shuffled {
            let buf = &mut shuffled[..block.len()];
            shuffle(block, buf, typesize);
            buf
        } else {
            block
        };
        let packed = options.codec.compress(plain, options.clevel)?;
        // incompressible streams are stored raw
        let stream: &[u8] = if packed.len() < plain.len() {
            &packed
        } else {
            plain
        };
        out.extend_from_slice(&(stream.len() as u32).to_le_bytes());
        out.extend_from_slice(stream);
    }

    let total = u32::try_from(out.len())
        .map_err(|_| Error::msg("compressed blosc chunk is too large"))?;
    out[12..16].copy_from_slice(&total.to_le_bytes());
    Ok(out)
}
