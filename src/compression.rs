//! Pluggable compression backend.
//!
//! Containers are compressed by the worker pool through the [`Compressor`]
//! trait. The id of the compressor that produced a record is stored in the
//! record's meta byte, so the reader can pick the matching decompressor from a
//! [`CompressorRegistry`].

use crate::error::{BuslogError, Result};
use std::borrow::Cow;
use std::sync::Arc;

/// Highest compressor id that fits in the record meta byte (bits 1-3).
pub const MAX_COMPRESSOR_ID: u8 = 7;

/// Interface for compression algorithms.
///
/// Implementations are shared by every compression worker, so they must not
/// keep mutable state between calls. Both directions must be deterministic
/// and the compressed form must be self-delimiting.
pub trait Compressor: Send + Sync + std::fmt::Debug {
    /// Returns the unique id stored in the record meta byte.
    /// 0 is reserved for no compression.
    fn id(&self) -> u8;

    /// Compresses a sealed container payload.
    ///
    /// May borrow the input when no transformation is applied.
    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>>;

    /// Restores a payload produced by [`Compressor::compress`].
    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>>;
}

// --- No Compression (Pass-through) ---

/// A compressor that stores container payloads unchanged (id 0).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompression;

impl Compressor for NoCompression {
    fn id(&self) -> u8 {
        0
    }

    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(data))
    }

    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(data))
    }
}

// --- LZ4 Implementation ---

#[cfg(feature = "lz4_flex")]
/// A compressor using the LZ4 block format (id 1).
///
/// The uncompressed length is prepended as a little-endian `u32`, which makes
/// each compressed block self-delimiting.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Compressor;

#[cfg(feature = "lz4_flex")]
impl Compressor for Lz4Compressor {
    fn id(&self) -> u8 {
        1
    }

    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Owned(lz4_flex::compress_prepend_size(data)))
    }

    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let vec = lz4_flex::decompress_size_prepended(data)
            .map_err(|e| BuslogError::Compression(e.to_string()))?;
        Ok(Cow::Owned(vec))
    }
}

/// Returns the compressor used when the configuration names none.
pub fn default_compressor() -> Arc<dyn Compressor> {
    #[cfg(feature = "lz4_flex")]
    {
        Arc::new(Lz4Compressor)
    }
    #[cfg(not(feature = "lz4_flex"))]
    {
        Arc::new(NoCompression)
    }
}

// --- REGISTRY ---

/// Maps compressor ids found on disk back to implementations.
#[derive(Debug, Clone)]
pub struct CompressorRegistry {
    algorithms: Vec<Option<Arc<dyn Compressor>>>,
}

impl CompressorRegistry {
    /// Creates a registry with the built-in algorithms registered.
    ///
    /// *   ID 0: `NoCompression`
    /// *   ID 1: `Lz4Compressor` (if the `lz4_flex` feature is enabled)
    pub fn new() -> Self {
        let mut reg = Self {
            algorithms: vec![None; usize::from(MAX_COMPRESSOR_ID) + 1],
        };

        reg.algorithms[0] = Some(Arc::new(NoCompression));

        #[cfg(feature = "lz4_flex")]
        {
            reg.algorithms[1] = Some(Arc::new(Lz4Compressor));
        }

        reg
    }

    /// Registers a compressor under its own id, replacing any previous one.
    ///
    /// # Errors
    /// Returns `BuslogError::Config` if the id does not fit in the meta byte.
    pub fn register(&mut self, algo: Arc<dyn Compressor>) -> Result<()> {
        let id = algo.id();
        match self.algorithms.get_mut(usize::from(id)) {
            Some(slot) => {
                *slot = Some(algo);
                Ok(())
            }
            None => Err(BuslogError::Config(format!(
                "compressor id {id} exceeds the maximum of {MAX_COMPRESSOR_ID}"
            ))),
        }
    }

    /// Retrieves a compressor by its id.
    ///
    /// # Errors
    /// Returns `BuslogError::Compression` if the id is not registered.
    pub fn get(&self, id: u8) -> Result<&dyn Compressor> {
        if let Some(algo) = self.algorithms.get(usize::from(id)).and_then(|opt| opt.as_ref()) {
            return Ok(algo.as_ref());
        }

        Err(BuslogError::Compression(format!(
            "Algorithm ID {id} is not registered or available"
        )))
    }

    /// Human readable name of an algorithm id, for reports.
    pub fn name_of(id: u8) -> String {
        match id {
            0 => "None".to_string(),
            1 => "LZ4".to_string(),
            _ => format!("Custom({id})"),
        }
    }
}

impl Default for CompressorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
