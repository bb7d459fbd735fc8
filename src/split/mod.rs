//! Train/test partitioning
//!
//! Each class's surviving rows are divided into a training and a testing
//! subset according to [`crate::config::SplitOptions`]. Three selection
//! modes are supported:
//!
//! - `Random` — shuffle, then take the requested number for training. The
//!   shuffle is seeded from the split options when a seed is set; otherwise
//!   from OS entropy, in which case partitions differ between runs.
//! - `Block` — first rows train, remaining rows test.
//! - `Alternate` — even rows train, odd rows test; requested counts are
//!   ignored in this mode.
//!
//! A requested training count of 0 means "half of the surviving rows"; the
//! other half tests. Both subsets must end up non-empty, since a classifier
//! cannot be fit or scored on nothing.
//!
//! [`norm_scales`] computes the per-class factor applied to every event
//! weight, correcting class imbalance according to [`NormMode`].

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::config::{NormMode, SplitMode};
use crate::{Error, Result};

/// Partition of one class's surviving rows, as row indices into the
/// cut-filtered batch. Both index lists are sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSplit {
    /// Rows assigned to training
    pub train: Vec<usize>,
    /// Rows assigned to testing
    pub test: Vec<usize>,
}

/// Partition `n_rows` rows into train and test subsets.
///
/// `n_train` of 0 requests half the rows for training.
///
/// # Errors
/// Returns [`Error::Configuration`] if fewer than 2 rows are available, or
/// if the requested training count leaves no rows for testing.
pub fn partition(
    n_rows: usize,
    n_train: usize,
    mode: SplitMode,
    rng: &mut StdRng,
) -> Result<ClassSplit> {
    if n_rows < 2 {
        return Err(Error::Configuration(format!(
            "{n_rows} surviving row(s); at least 2 are needed to split into train and test"
        )));
    }

    if mode == SplitMode::Alternate {
        let (train, test) = (0..n_rows).partition(|i| i % 2 == 0);
        return Ok(ClassSplit { train, test });
    }

    let n_train = if n_train == 0 { n_rows / 2 } else { n_train };
    if n_train >= n_rows {
        return Err(Error::Configuration(format!(
            "{n_train} training rows requested but only {n_rows} survive the cut; \
             none would be left for testing"
        )));
    }

    match mode {
        SplitMode::Random => {
            let mut indices: Vec<usize> = (0..n_rows).collect();
            indices.shuffle(rng);
            let mut train = indices[..n_train].to_vec();
            let mut test = indices[n_train..].to_vec();
            train.sort_unstable();
            test.sort_unstable();
            Ok(ClassSplit { train, test })
        }
        SplitMode::Block => Ok(ClassSplit {
            train: (0..n_train).collect(),
            test: (n_train..n_rows).collect(),
        }),
        SplitMode::Alternate => unreachable!("handled above"),
    }
}

/// Per-class event-weight scale factors `(signal, background)`.
///
/// - [`NormMode::None`] leaves weights as evaluated.
/// - [`NormMode::NumEvents`] renormalizes each class independently so its
///   average event weight is 1.
/// - [`NormMode::EqualNumEvents`] renormalizes both classes so each carries
///   a total weight equal to the signal event count.
///
/// # Errors
/// Returns [`Error::Configuration`] if a class to be renormalized has zero
/// total event weight.
pub fn norm_scales(
    norm: NormMode,
    signal_sum: f64,
    n_signal: usize,
    background_sum: f64,
    n_background: usize,
) -> Result<(f64, f64)> {
    #[allow(clippy::cast_precision_loss)]
    let (n_sig, n_bkg) = (n_signal as f64, n_background as f64);
    let check = |sum: f64, class: &str| -> Result<f64> {
        if sum <= 0.0 {
            return Err(Error::Configuration(format!(
                "{class} class has non-positive total event weight ({sum}); \
                 cannot renormalize"
            )));
        }
        Ok(sum)
    };
    match norm {
        NormMode::None => Ok((1.0, 1.0)),
        NormMode::NumEvents => Ok((
            n_sig / check(signal_sum, "signal")?,
            n_bkg / check(background_sum, "background")?,
        )),
        NormMode::EqualNumEvents => Ok((
            n_sig / check(signal_sum, "signal")?,
            n_sig / check(background_sum, "background")?,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    #[test]
    fn test_partition_zero_means_half() {
        let split = partition(10, 0, SplitMode::Block, &mut rng(1)).unwrap();
        assert_eq!(split.train, (0..5).collect::<Vec<_>>());
        assert_eq!(split.test, (5..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_partition_block_honors_count() {
        let split = partition(10, 7, SplitMode::Block, &mut rng(1)).unwrap();
        assert_eq!(split.train.len(), 7);
        assert_eq!(split.test, vec![7, 8, 9]);
    }

    #[test]
    fn test_partition_alternate() {
        let split = partition(5, 0, SplitMode::Alternate, &mut rng(1)).unwrap();
        assert_eq!(split.train, vec![0, 2, 4]);
        assert_eq!(split.test, vec![1, 3]);
    }

    #[test]
    fn test_partition_random_seeded_is_deterministic() {
        let a = partition(100, 60, SplitMode::Random, &mut rng(42)).unwrap();
        let b = partition(100, 60, SplitMode::Random, &mut rng(42)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.train.len(), 60);
        assert_eq!(a.test.len(), 40);
    }

    #[test]
    fn test_partition_too_few_rows() {
        let err = partition(1, 0, SplitMode::Random, &mut rng(1)).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_partition_nothing_left_for_testing() {
        let err = partition(10, 10, SplitMode::Random, &mut rng(1)).unwrap_err();
        assert!(err.to_string().contains("left for testing"));
    }

    #[test]
    fn test_norm_scales_num_events() {
        let (s, b) = norm_scales(NormMode::NumEvents, 5.0, 10, 40.0, 20).unwrap();
        assert!((s - 2.0).abs() < 1e-12);
        assert!((b - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_norm_scales_equal_num_events() {
        let (s, b) = norm_scales(NormMode::EqualNumEvents, 5.0, 10, 40.0, 20).unwrap();
        assert!((s - 2.0).abs() < 1e-12);
        assert!((b - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_norm_scales_none() {
        assert_eq!(norm_scales(NormMode::None, 0.0, 0, 0.0, 0).unwrap(), (1.0, 1.0));
    }

    #[test]
    fn test_norm_scales_zero_weight_rejected() {
        let err = norm_scales(NormMode::NumEvents, 0.0, 10, 40.0, 20).unwrap_err();
        assert!(err.to_string().contains("signal"));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;
        use rand::SeedableRng;

        proptest! {
            /// Every partition is disjoint and complete.
            #[test]
            fn prop_partition_disjoint_and_complete(
                n_rows in 2usize..500,
                n_train in 0usize..400,
                seed in 0u64..1000,
                mode_pick in 0u8..3,
            ) {
                let mode = match mode_pick {
                    0 => SplitMode::Random,
                    1 => SplitMode::Block,
                    _ => SplitMode::Alternate,
                };
                let mut rng = StdRng::seed_from_u64(seed);
                let Ok(split) = partition(n_rows, n_train, mode, &mut rng) else {
                    // over-requested training count; nothing more to check
                    return Ok(());
                };
                let mut all: Vec<usize> =
                    split.train.iter().chain(split.test.iter()).copied().collect();
                all.sort_unstable();
                prop_assert_eq!(all, (0..n_rows).collect::<Vec<_>>());
                prop_assert!(!split.train.is_empty());
                prop_assert!(!split.test.is_empty());
            }
        }
    }
}
