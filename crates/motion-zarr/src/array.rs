// ZarrArray: one zarr v2 array in a directory store
//
// On disk an array is a directory holding a `.zarray` JSON document and one
// file per chunk:
//
//   agents/
//     .zarray        {"zarr_format": 2, "shape": [N], "chunks": [C],
//                     "dtype": [...], "compressor": {"id": "blosc", ...},
//                     "fill_value": null, "order": "C", "filters": null}
//     0              rows [0, C)
//     1              rows [C, 2C)
//     ...
//
// Only chunking along axis 0 is supported (trailing chunk dims must equal the
// array dims), which is how every scene archive is laid out. A chunk file is
// always a full chunk, even at the end of the array. Missing chunk files read
// as zeros.

use std::collections::VecDeque;
use std::fs;
use std::io::{Read, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use motion_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::blosc::{self, BloscCodec, BloscOptions, Shuffle};
use crate::dtype::RecordDtype;

/// Default number of decoded chunks kept per array.
pub const DEFAULT_CHUNK_CACHE: usize = 8;

/// Chunk compression codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compressor {
    #[default]
    None,
    Zlib { level: u32 },
    Gzip { level: u32 },
    Blosc(BloscOptions),
}

impl Compressor {
    /// What zarr writes by default: Blosc with lz4 and byte shuffle.
    pub fn blosc_lz4() -> Self {
        Compressor::Blosc(BloscOptions::default())
    }

    /// Parse the `compressor` entry of `.zarray` (`null` or `{"id": ...}`).
    pub fn from_json(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Compressor::None);
        }
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::UnsupportedCompressor(value.to_string()))?;
        let level = value.get("level").and_then(Value::as_u64).unwrap_or(1) as u32;
        match id {
            "zlib" => Ok(Compressor::Zlib { level }),
            "gzip" => Ok(Compressor::Gzip { level }),
            "blosc" => {
                let cname = value.get("cname").and_then(Value::as_str).unwrap_or("lz4");
                let codec = BloscCodec::from_name(cname)?;
                if !codec.is_supported() {
                    return Err(Error::UnsupportedCompressor(format!("blosc/{cname}")));
                }
                let shuffle = value.get("shuffle").and_then(Value::as_i64).unwrap_or(1);
                let shuffle = Shuffle::from_code(shuffle)?;
                if shuffle == Shuffle::Bit {
                    return Err(Error::UnsupportedCompressor("blosc bitshuffle".into()));
                }
                let clevel = value.get("clevel").and_then(Value::as_u64).unwrap_or(5);
                let blocksize = value.get("blocksize").and_then(Value::as_u64).unwrap_or(0);
                Ok(Compressor::Blosc(BloscOptions {
                    codec,
                    clevel: clevel.min(9) as u8,
                    shuffle,
                    blocksize: blocksize as usize,
                }))
            }
            other => Err(Error::UnsupportedCompressor(other.to_string())),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Compressor::None => Value::Null,
            Compressor::Zlib { level } => serde_json::json!({"id": "zlib", "level": level}),
            Compressor::Gzip { level } => serde_json::json!({"id": "gzip", "level": level}),
            Compressor::Blosc(o) => serde_json::json!({
                "id": "blosc",
                "cname": o.codec.name(),
                "clevel": o.clevel,
                "shuffle": o.shuffle.code(),
                "blocksize": o.blocksize,
            }),
        }
    }

    pub fn decode(&self, raw: Vec<u8>) -> Result<Vec<u8>> {
        match self {
            Compressor::None => Ok(raw),
            Compressor::Zlib { .. } => {
                let mut out = Vec::new();
                ZlibDecoder::new(raw.as_slice()).read_to_end(&mut out)?;
                Ok(out)
            }
            Compressor::Gzip { .. } => {
                let mut out = Vec::new();
                GzDecoder::new(raw.as_slice()).read_to_end(&mut out)?;
                Ok(out)
            }
            Compressor::Blosc(_) => blosc::decompress(&raw),
        }
    }

    /// Encode one chunk of records `typesize` bytes wide.
    pub fn encode(&self, data: &[u8], typesize: usize) -> Result<Vec<u8>> {
        match self {
            Compressor::None => Ok(data.to_vec()),
            Compressor::Zlib { level } => {
                let mut enc = ZlibEncoder::new(Vec::new(), flate2::Compression::new(*level));
                enc.write_all(data)?;
                Ok(enc.finish()?)
            }
            Compressor::Gzip { level } => {
                let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::new(*level));
                enc.write_all(data)?;
                Ok(enc.finish()?)
            }
            Compressor::Blosc(opts) => blosc::compress(data, typesize, opts),
        }
    }
}

/// The `.zarray` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArrayMetadata {
    pub zarr_format: u32,
    pub shape: Vec<usize>,
    pub chunks: Vec<usize>,
    pub dtype: Value,
    #[serde(default)]
    pub compressor: Value,
    #[serde(default)]
    pub fill_value: Value,
    pub order: String,
    #[serde(default)]
    pub filters: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension_separator: Option<String>,
}

// Small FIFO of decoded chunks. Sample generation touches a handful of
// neighbouring frames, so a few chunks cover almost every access.
#[derive(Debug)]
struct ChunkCache {
    capacity: usize,
    entries: VecDeque<(usize, Arc<Vec<u8>>)>,
}

impl ChunkCache {
    fn get(&self, idx: usize) -> Option<Arc<Vec<u8>>> {
        self.entries
            .iter()
            .find(|(i, _)| *i == idx)
            .map(|(_, c)| c.clone())
    }

    /// Store `chunk` unless another reader cached `idx` first; returns the
    /// cached copy.
    fn insert(&mut self, idx: usize, chunk: Arc<Vec<u8>>) -> Arc<Vec<u8>> {
        if let Some(existing) = self.get(idx) {
            return existing;
        }
        if self.capacity == 0 {
            return chunk;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((idx, chunk.clone()));
        chunk
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A read handle on one array of the archive.
#[derive(Debug)]
pub struct ZarrArray {
    path: PathBuf,
    meta: ArrayMetadata,
    dtype: RecordDtype,
    compressor: Compressor,
    /// Bytes per row along axis 0 (itemsize times trailing dims).
    row_bytes: usize,
    cache: Mutex<ChunkCache>,
}

impl ZarrArray {
    /// Open the array stored in directory `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_cache(path, DEFAULT_CHUNK_CACHE)
    }

    /// Open with an explicit decoded-chunk cache size (0 disables caching).
    pub fn open_with_cache(path: impl AsRef<Path>, cache_chunks: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let meta_path = path.join(".zarray");
        let text = fs::read_to_string(&meta_path)
            .map_err(|e| Error::malformed(&path, format!("cannot read .zarray: {e}")))?;
        let meta: ArrayMetadata = serde_json::from_str(&text)
            .map_err(|e| Error::malformed(&path, format!("invalid .zarray: {e}")))?;

        if meta.zarr_format != 2 {
            return Err(Error::malformed(
                &path,
                format!("zarr_format {} (only 2 is supported)", meta.zarr_format),
            ));
        }
        if meta.order != "C" {
            return Err(Error::malformed(&path, format!("order {:?}", meta.order)));
        }
        if meta.filters.as_ref().is_some_and(|f| !f.is_empty()) {
            return Err(Error::malformed(&path, "filters are not supported"));
        }
        if meta.shape.is_empty() || meta.shape.len() != meta.chunks.len() {
            return Err(Error::malformed(
                &path,
                format!("shape {:?} vs chunks {:?}", meta.shape, meta.chunks),
            ));
        }
        if meta.chunks[0] == 0 {
            return Err(Error::malformed(&path, "chunk length 0"));
        }
        if meta.shape[1..] != meta.chunks[1..] {
            return Err(Error::malformed(
                &path,
                "arrays must be chunked along axis 0 only",
            ));
        }

        let dtype = RecordDtype::from_json(&meta.dtype)?;
        let compressor = Compressor::from_json(&meta.compressor)?;
        let row_bytes = dtype.itemsize() * meta.shape[1..].iter().product::<usize>();

        tracing::debug!(
            path = %path.display(),
            rows = meta.shape[0],
            chunk = meta.chunks[0],
            ?compressor,
            "opened zarr array"
        );

        Ok(Self {
            path,
            meta,
            dtype,
            compressor,
            row_bytes,
            cache: Mutex::new(ChunkCache {
                capacity: cache_chunks,
                entries: VecDeque::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &ArrayMetadata {
        &self.meta
    }

    pub fn dtype(&self) -> &RecordDtype {
        &self.dtype
    }

    pub fn compressor(&self) -> Compressor {
        self.compressor
    }

    /// Number of rows along axis 0.
    pub fn len(&self) -> usize {
        self.meta.shape[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes per row.
    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    /// Rows per chunk.
    pub fn chunk_len(&self) -> usize {
        self.meta.chunks[0]
    }

    pub fn num_chunks(&self) -> usize {
        self.len().div_ceil(self.chunk_len())
    }

    /// Row range covered by chunk `idx`.
    pub fn chunk_rows(&self, idx: usize) -> Range<usize> {
        let start = idx * self.chunk_len();
        start..(start + self.chunk_len()).min(self.len())
    }

    fn chunk_key(&self, idx: usize) -> String {
        let sep = self.meta.dimension_separator.as_deref().unwrap_or(".");
        let mut key = idx.to_string();
        for _ in 1..self.meta.shape.len() {
            key.push_str(sep);
            key.push('0');
        }
        key
    }

    /// Decoded bytes of chunk `idx` (full chunk length, zero-filled if absent).
    pub fn chunk(&self, idx: usize) -> Result<Arc<Vec<u8>>> {
        if idx >= self.num_chunks() {
            return Err(Error::IndexOutOfRange {
                index: idx,
                len: self.num_chunks(),
            });
        }
        if let Some(c) = self.lock_cache().get(idx) {
            return Ok(c);
        }

        let full = self.chunk_len() * self.row_bytes;
        let valid = self.chunk_rows(idx).len() * self.row_bytes;
        let file = self.path.join(self.chunk_key(idx));
        let decoded = match fs::read(&file) {
            Ok(raw) => self.compressor.decode(raw).map_err(|e| match e {
                Error::UnsupportedCompressor(_) => e,
                e => Error::malformed(&self.path, format!("chunk {idx} failed to decode: {e}")),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => vec![0u8; full],
            Err(e) => return Err(e.into()),
        };
        if decoded.len() != full && decoded.len() != valid {
            return Err(Error::malformed(
                &self.path,
                format!(
                    "chunk {idx} holds {} bytes, expected {full}",
                    decoded.len()
                ),
            ));
        }
        tracing::trace!(path = %self.path.display(), chunk = idx, "decoded chunk");

        Ok(self.lock_cache().insert(idx, Arc::new(decoded)))
    }

    /// Number of decoded chunks currently cached.
    pub fn cached_chunks(&self) -> usize {
        self.lock_cache().len()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, ChunkCache> {
        // cached chunks are immutable, a poisoned lock is still consistent
        self.cache.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Raw bytes of rows `range`, possibly spanning several chunks.
    pub fn read_rows(&self, range: Range<usize>) -> Result<Vec<u8>> {
        if range.start > range.end || range.end > self.len() {
            return Err(Error::IndexOutOfRange {
                index: range.end,
                len: self.len(),
            });
        }
        let mut out = Vec::with_capacity(range.len() * self.row_bytes);
        let cl = self.chunk_len();
        let mut row = range.start;
        while row < range.end {
            let idx = row / cl;
            let chunk = self.chunk(idx)?;
            let chunk_start = idx * cl;
            let stop = range.end.min(chunk_start + cl);
            let a = (row - chunk_start) * self.row_bytes;
            let b = (stop - chunk_start) * self.row_bytes;
            out.extend_from_slice(&chunk[a..b]);
            row = stop;
        }
        Ok(out)
    }

    /// Raw bytes of a single row.
    pub fn read_row(&self, index: usize) -> Result<Vec<u8>> {
        if index >= self.len() {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        self.read_rows(index..index + 1)
    }

    /// Write a new array to `path` from row-major record bytes.
    ///
    /// `data` must hold a whole number of rows of `row_shape` records each.
    pub fn create(
        path: impl AsRef<Path>,
        dtype: &RecordDtype,
        row_shape: &[usize],
        data: &[u8],
        chunk_len: usize,
        compressor: Compressor,
    ) -> Result<Self> {
        let path = path.as_ref();
        let row_bytes = dtype.itemsize() * row_shape.iter().product::<usize>();
        if row_bytes == 0 || data.len() % row_bytes != 0 || chunk_len == 0 {
            return Err(Error::ShapeMismatch {
                expected: vec![row_bytes],
                got: vec![data.len()],
            });
        }
        let rows = data.len() / row_bytes;
        fs::create_dir_all(path)?;

        let mut shape = vec![rows];
        shape.extend_from_slice(row_shape);
        let mut chunks = vec![chunk_len];
        chunks.extend_from_slice(row_shape);
        let meta = ArrayMetadata {
            zarr_format: 2,
            shape,
            chunks,
            dtype: dtype.to_json(),
            compressor: compressor.to_json(),
            fill_value: Value::Null,
            order: "C".to_string(),
            filters: None,
            dimension_separator: None,
        };
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| Error::msg(format!("cannot serialize .zarray: {e}")))?;
        fs::write(path.join(".zarray"), json)?;

        let chunk_bytes = chunk_len * row_bytes;
        let suffix = ".0".repeat(row_shape.len());
        for (idx, piece) in data.chunks(chunk_bytes).enumerate() {
            let mut full = piece.to_vec();
            full.resize(chunk_bytes, 0);
            let encoded = compressor.encode(&full, dtype.itemsize())?;
            fs::write(path.join(format!("{idx}{suffix}")), encoded)?;
        }
        Self::open(path)
    }
}
