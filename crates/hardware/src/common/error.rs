//! Simulator error definitions.
//!
//! Three failure classes exist, with very different severities:
//! 1. **ConfigParse:** rejected configuration, fatal at init.
//! 2. **InvalidState:** a component observed an impossible FIFO or
//!    state-machine transition, fatal with a diagnostic.
//! 3. **Deadlock:** the stalled-instruction detector fired, fatal after a
//!    partition/fabric state dump.
//!
//! Backpressure is deliberately *not* an error: a full queue increments a
//! stall counter and the producer retries on its next eligible tick. Issue
//! paths report "did not issue" by return value, never through this enum.

use thiserror::Error;

/// Fatal simulator errors.
#[derive(Debug, Error)]
pub enum SimError {
    /// A configuration string or field was rejected at init.
    #[error("configuration parse error: {reason} (in `{source_text}`)")]
    ConfigParse {
        /// What was wrong.
        reason: String,
        /// The offending configuration text.
        source_text: String,
    },

    /// A unit observed an impossible transition; the simulation state is
    /// no longer trustworthy.
    #[error("invalid simulator state: {0}")]
    InvalidState(String),

    /// The deadlock detector fired: no instruction committed for the
    /// detection window while memory or the fabric stayed busy.
    #[error(
        "deadlock detected at cycle {cycle}: last writeback on core {last_core}, \
         {partitions_busy} partition(s) busy, fabric busy = {icnt_busy}"
    )]
    Deadlock {
        /// Cycle at which the detector fired.
        cycle: u64,
        /// Core that performed the most recent writeback.
        last_core: usize,
        /// Number of memory partitions still holding in-flight work.
        partitions_busy: usize,
        /// Whether the interconnect still held flits or packets.
        icnt_busy: bool,
    },
}

impl SimError {
    /// Shorthand for a [`SimError::ConfigParse`] from string-ish parts.
    pub fn config(reason: impl Into<String>, source_text: impl Into<String>) -> Self {
        Self::ConfigParse {
            reason: reason.into(),
            source_text: source_text.into(),
        }
    }
}
