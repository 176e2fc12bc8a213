//! Log configuration.

/// Default segment size: 64 MiB.
pub const DEFAULT_SEGMENT_SIZE_BYTES: u64 = 64 * 1024 * 1024;

/// Configuration carried through `create`/`open`.
///
/// The segment size is an explicit option rather than a process-wide
/// tunable, so tests can exercise rotation with tiny segments without
/// touching global state.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Size each segment file is preallocated to, and the threshold at
    /// which the tail is cut.
    pub segment_size_bytes: u64,

    /// Whether the decoder skips records whose CRC does not match the
    /// running chain instead of failing. Torn tails are unaffected; only
    /// non-torn mismatches are skipped.
    pub continue_on_crc_error: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            segment_size_bytes: DEFAULT_SEGMENT_SIZE_BYTES,
            continue_on_crc_error: false,
        }
    }
}

impl WalConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the segment size in bytes.
    #[must_use]
    pub const fn segment_size_bytes(mut self, size: u64) -> Self {
        self.segment_size_bytes = size;
        self
    }

    /// Sets whether decoding continues past non-torn CRC mismatches.
    #[must_use]
    pub const fn continue_on_crc_error(mut self, value: bool) -> Self {
        self.continue_on_crc_error = value;
        self
    }
}
