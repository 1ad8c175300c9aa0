//! Property tests for FIFOs, masks, and histograms.

use proptest::prelude::*;

use warpsim_core::common::fifo::Fifo;
use warpsim_core::common::masks::{ByteMask, SECTOR_SIZE};
use warpsim_core::stats::{LinearHistogram, Pow2Histogram};

proptest! {
    /// A FIFO never exceeds its capacity and preserves order under any
    /// interleaving of pushes and pops.
    #[test]
    fn fifo_bounded_and_ordered(ops in prop::collection::vec(any::<bool>(), 1..200)) {
        let mut fifo: Fifo<u32> = Fifo::new("prop", 8);
        let mut model = std::collections::VecDeque::new();
        let mut next = 0u32;
        for push in ops {
            if push {
                if !fifo.full() {
                    fifo.push(next);
                    model.push_back(next);
                    next += 1;
                }
            } else {
                prop_assert_eq!(fifo.pop(), model.pop_front());
            }
            prop_assert!(fifo.len() <= fifo.capacity());
            prop_assert_eq!(fifo.len(), model.len());
        }
    }

    /// Every dirty byte lands in exactly the sector that contains it.
    #[test]
    fn byte_mask_sectors_cover_span(offset in 0u32..96, len in 1u32..32) {
        let mask = ByteMask::span(offset, len);
        let sectors = mask.to_sectors();
        prop_assert!(sectors.get(offset / SECTOR_SIZE));
        prop_assert!(sectors.get((offset + len - 1) / SECTOR_SIZE));
    }

    /// The pow2 histogram accounts for every sample exactly once and its
    /// average reflects the true sum.
    #[test]
    fn pow2_histogram_conserves_samples(samples in prop::collection::vec(0u64..1_000_000, 1..100)) {
        let mut histogram = Pow2Histogram::new("prop", 32);
        for &s in &samples {
            histogram.add(s);
        }
        let total: u64 = histogram.bins().iter().sum();
        prop_assert_eq!(total, samples.len() as u64);
        let sum: u64 = samples.iter().sum();
        let expected = sum as f64 / samples.len() as f64;
        prop_assert!((histogram.avg() - expected).abs() < 1e-6);
        prop_assert_eq!(histogram.max(), samples.iter().copied().max().unwrap_or(0));
    }

    /// Linear histogram samples land in the bucket selected by the stride,
    /// saturating at the top.
    #[test]
    fn linear_histogram_bucketing(sample in 0u64..10_000, stride in 1u64..100) {
        let n_bins = 16;
        let mut histogram = LinearHistogram::new("prop", stride, n_bins);
        histogram.add(sample);
        let expected = ((sample / stride) as usize).min(n_bins - 1);
        prop_assert_eq!(histogram.bins()[expected], 1);
    }
}
