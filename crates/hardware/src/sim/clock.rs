//! Multi-domain clock stepper.
//!
//! Four virtual clocks (CORE, ICNT, L2, DRAM) advance at their configured
//! frequencies. Each step selects every domain whose virtual time has
//! caught up with the earliest front and advances it by one period; the
//! returned mask tells the cycle loop which domains to tick. Equal-time
//! ties resolve L2 < ICNT < DRAM < CORE.
//!
//! Lockstep mode activates all four domains on every step, which makes
//! scenario tests deterministic in core cycles.

use crate::config::ClockConfig;

/// Set of clock domains active on one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DomainMask(u8);

impl DomainMask {
    /// Shader core domain.
    pub const CORE: Self = Self(0b0001);
    /// L2 domain.
    pub const L2: Self = Self(0b0010);
    /// Interconnect domain.
    pub const ICNT: Self = Self(0b0100);
    /// DRAM domain.
    pub const DRAM: Self = Self(0b1000);
    /// Every domain.
    pub const ALL: Self = Self(0b1111);

    /// Whether `other`'s domains are all active in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// The four virtual clocks.
pub struct ClockDomains {
    core_time: f64,
    icnt_time: f64,
    l2_time: f64,
    dram_time: f64,
    core_period: f64,
    icnt_period: f64,
    l2_period: f64,
    dram_period: f64,
    lockstep: bool,
}

impl ClockDomains {
    /// Builds the stepper from configured frequencies (MHz → ns periods).
    pub fn new(config: &ClockConfig, lockstep: bool) -> Self {
        let period = |freq_mhz: f64| 1000.0 / freq_mhz;
        Self {
            core_time: 0.0,
            icnt_time: 0.0,
            l2_time: 0.0,
            dram_time: 0.0,
            core_period: period(config.core_freq_mhz),
            icnt_period: period(config.icnt_freq_mhz),
            l2_period: period(config.l2_freq_mhz),
            dram_period: period(config.dram_freq_mhz),
            lockstep,
        }
    }

    /// Selects and advances the next domains.
    pub fn next_domains(&mut self) -> DomainMask {
        if self.lockstep {
            self.core_time += self.core_period;
            return DomainMask::ALL;
        }
        let mut smallest = self.core_time.min(self.icnt_time).min(self.dram_time);
        let mut mask = DomainMask::default();
        if self.l2_time <= smallest {
            smallest = self.l2_time;
            mask = mask.with(DomainMask::L2);
            self.l2_time += self.l2_period;
        }
        if self.icnt_time <= smallest {
            mask = mask.with(DomainMask::ICNT);
            self.icnt_time += self.icnt_period;
        }
        if self.dram_time <= smallest {
            mask = mask.with(DomainMask::DRAM);
            self.dram_time += self.dram_period;
        }
        if self.core_time <= smallest {
            mask = mask.with(DomainMask::CORE);
            self.core_time += self.core_period;
        }
        mask
    }

    /// Virtual times, for tests and diagnostics: (core, icnt, l2, dram).
    pub const fn times(&self) -> (f64, f64, f64, f64) {
        (self.core_time, self.icnt_time, self.l2_time, self.dram_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clocks(core: f64, icnt: f64, l2: f64, dram: f64) -> ClockDomains {
        ClockDomains::new(
            &ClockConfig {
                core_freq_mhz: core,
                icnt_freq_mhz: icnt,
                l2_freq_mhz: l2,
                dram_freq_mhz: dram,
            },
            false,
        )
    }

    #[test]
    fn test_equal_frequencies_tick_together() {
        let mut clocks = clocks(1000.0, 1000.0, 1000.0, 1000.0);
        for _ in 0..4 {
            let mask = clocks.next_domains();
            assert!(mask.contains(DomainMask::ALL));
        }
    }

    #[test]
    fn test_slow_dram_ticks_less_often() {
        // DRAM at half the core frequency ticks on every other step
        let mut clocks = clocks(1000.0, 1000.0, 1000.0, 500.0);
        let mut dram_ticks = 0;
        let mut core_ticks = 0;
        for _ in 0..10 {
            let mask = clocks.next_domains();
            if mask.contains(DomainMask::DRAM) {
                dram_ticks += 1;
            }
            if mask.contains(DomainMask::CORE) {
                core_ticks += 1;
            }
        }
        assert!(core_ticks > dram_ticks);
        assert!(dram_ticks >= core_ticks / 2);
    }

    #[test]
    fn test_clocks_monotone() {
        let mut clocks = clocks(1365.0, 1365.0, 683.0, 877.0);
        let mut previous = clocks.times();
        for _ in 0..100 {
            let _ = clocks.next_domains();
            let now = clocks.times();
            assert!(now.0 >= previous.0);
            assert!(now.1 >= previous.1);
            assert!(now.2 >= previous.2);
            assert!(now.3 >= previous.3);
            previous = now;
        }
    }

    #[test]
    fn test_lockstep_always_all() {
        let mut clocks = ClockDomains::new(&ClockConfig::default(), true);
        for _ in 0..5 {
            assert_eq!(clocks.next_domains(), DomainMask::ALL);
        }
    }
}
