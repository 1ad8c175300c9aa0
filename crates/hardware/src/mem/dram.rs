//! DRAM channel timing models.
//!
//! Two models exist behind one trait:
//! 1. **FixedLatency:** every access costs the same number of DRAM cycles
//!    (the "simple" model).
//! 2. **RowBuffer:** CAS on a row hit, PRE+RAS+CAS on a row switch, RAS+CAS
//!    on a cold bank (the "full" model).

use crate::common::Address;

/// Per-access latency model of one DRAM channel.
pub trait DramTiming {
    /// Cycles required to service an access to `addr`, updating any
    /// row-buffer state.
    fn access_latency(&mut self, addr: Address) -> u64;
}

/// Fixed-latency channel; every access takes the same number of cycles.
pub struct FixedLatency {
    latency: u64,
}

impl FixedLatency {
    /// Creates a channel with the given fixed latency in DRAM cycles.
    pub const fn new(latency: u64) -> Self {
        Self { latency }
    }
}

impl DramTiming for FixedLatency {
    fn access_latency(&mut self, _addr: Address) -> u64 {
        self.latency
    }
}

/// Row-buffer-aware channel; models CAS, RAS, and precharge latencies.
pub struct RowBuffer {
    last_row: Option<Address>,
    t_cas: u64,
    t_ras: u64,
    t_pre: u64,
    row_mask: Address,
}

impl RowBuffer {
    /// Creates a channel with the given timing parameters (in DRAM cycles)
    /// and a 2 KiB row.
    pub const fn new(t_cas: u64, t_ras: u64, t_pre: u64) -> Self {
        Self {
            last_row: None,
            t_cas,
            t_ras,
            t_pre,
            row_mask: !2047,
        }
    }
}

impl DramTiming for RowBuffer {
    fn access_latency(&mut self, addr: Address) -> u64 {
        let row = addr & self.row_mask;
        match self.last_row {
            Some(open_row) if open_row == row => self.t_cas,
            Some(_) => {
                self.last_row = Some(row);
                self.t_pre + self.t_ras + self.t_cas
            }
            None => {
                self.last_row = Some(row);
                self.t_ras + self.t_cas
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_latency_is_constant() {
        let mut channel = FixedLatency::new(100);
        assert_eq!(channel.access_latency(0x0), 100);
        assert_eq!(channel.access_latency(0xDEAD_0000), 100);
    }

    #[test]
    fn test_row_buffer_hit_and_switch() {
        let mut channel = RowBuffer::new(14, 14, 14);
        // cold bank: RAS + CAS
        assert_eq!(channel.access_latency(0x0000), 28);
        // same row: CAS only
        assert_eq!(channel.access_latency(0x0040), 14);
        // different row: PRE + RAS + CAS
        assert_eq!(channel.access_latency(0x2000), 42);
        // back on the new row
        assert_eq!(channel.access_latency(0x2100), 14);
    }
}
