//! Store tuning knobs.

/// Blob store configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// zlib level (0-9) for compressed records and the built-in delta codec.
    pub compression_level: u32,
    /// How many blobs of a diff chain, counted back from the candidate base,
    /// are tried as diff bases by `write_smallest`.
    pub max_chain_candidates: usize,
}

impl StoreConfig {
    /// Read overrides from `REWIND_COMPRESSION_LEVEL` and
    /// `REWIND_MAX_CHAIN_CANDIDATES`, falling back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let compression_level: u32 = std::env::var("REWIND_COMPRESSION_LEVEL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.compression_level);

        let max_chain_candidates: usize = std::env::var("REWIND_MAX_CHAIN_CANDIDATES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_chain_candidates);

        Self {
            compression_level: compression_level.min(9),
            max_chain_candidates: max_chain_candidates.max(1),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            compression_level: 6,
            max_chain_candidates: 16,
        }
    }
}
