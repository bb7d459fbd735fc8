//! Classifier evaluation
//!
//! Standard separation and efficiency metrics computed from the discriminant
//! score distributions of the test partitions, plus a train/test
//! Kolmogorov-Smirnov comparison per class as an overtraining check.
//!
//! All statistics are event-weighted. Score distributions are compared on a
//! fixed binning over the combined score range; efficiency curves sweep a
//! fixed grid of thresholds from the highest score down.

use serde::{Deserialize, Serialize};

/// Bins used for the separation integral.
const SCORE_BINS: usize = 100;

/// Threshold grid points for the efficiency sweep.
const ROC_POINTS: usize = 100;

/// Discriminant scores with matching event weights for one class partition.
#[derive(Debug, Clone)]
pub struct ScoredSample {
    /// Per-event discriminant scores
    pub scores: Vec<f64>,
    /// Per-event weights, parallel to `scores`
    pub weights: Vec<f64>,
}

impl ScoredSample {
    /// Sum of event weights.
    #[must_use]
    pub fn sum_weights(&self) -> f64 {
        self.weights.iter().sum()
    }
}

/// Weighted first and second moments of a score distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreStats {
    /// Number of events
    pub n: usize,
    /// Sum of event weights
    pub sum_weights: f64,
    /// Weighted mean score
    pub mean: f64,
    /// Weighted RMS around the mean
    pub rms: f64,
}

/// One point of the efficiency curve at a given score threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RocPoint {
    /// Score threshold (events with score >= cut are accepted)
    pub cut: f64,
    /// Weighted fraction of signal accepted
    pub eff_signal: f64,
    /// Weighted fraction of background rejected
    pub rej_background: f64,
}

/// The working point maximizing `S / sqrt(S + B)` on the test partitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestCut {
    /// Score threshold
    pub cut: f64,
    /// Significance at the threshold
    pub significance: f64,
    /// Signal efficiency at the threshold
    pub eff_signal: f64,
    /// Background efficiency at the threshold
    pub eff_background: f64,
}

/// Everything the evaluation stage knows about one trained method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Signal test-partition score statistics
    pub signal_test: ScoreStats,
    /// Background test-partition score statistics
    pub background_test: ScoreStats,
    /// Signal training-partition score statistics
    pub signal_train: ScoreStats,
    /// Background training-partition score statistics
    pub background_train: ScoreStats,
    /// Binned separation integral of the test score distributions, in [0, 1]
    pub separation: f64,
    /// Area under the efficiency curve, in [0, 1]
    pub roc_integral: f64,
    /// Efficiency curve over the threshold grid
    pub roc: Vec<RocPoint>,
    /// Best working point found on the threshold grid
    pub best_cut: BestCut,
    /// KS distance between signal train and test score distributions
    pub ks_signal: f64,
    /// KS distance between background train and test score distributions
    pub ks_background: f64,
}

/// Evaluate one trained method from its four scored partitions.
#[must_use]
pub fn evaluate(
    signal_train: &ScoredSample,
    background_train: &ScoredSample,
    signal_test: &ScoredSample,
    background_test: &ScoredSample,
) -> EvaluationReport {
    let roc = roc_curve(signal_test, background_test);
    EvaluationReport {
        signal_test: stats(signal_test),
        background_test: stats(background_test),
        signal_train: stats(signal_train),
        background_train: stats(background_train),
        separation: separation(signal_test, background_test),
        roc_integral: roc_integral(&roc),
        best_cut: best_cut(signal_test, background_test, &roc),
        roc,
        ks_signal: ks_distance(signal_train, signal_test),
        ks_background: ks_distance(background_train, background_test),
    }
}

/// Weighted mean and RMS.
#[must_use]
pub fn stats(sample: &ScoredSample) -> ScoreStats {
    let sum_weights = sample.sum_weights();
    if sum_weights <= 0.0 {
        return ScoreStats {
            n: sample.scores.len(),
            sum_weights,
            mean: 0.0,
            rms: 0.0,
        };
    }
    let mean = sample
        .scores
        .iter()
        .zip(&sample.weights)
        .map(|(s, w)| s * w)
        .sum::<f64>()
        / sum_weights;
    let var = sample
        .scores
        .iter()
        .zip(&sample.weights)
        .map(|(s, w)| w * (s - mean) * (s - mean))
        .sum::<f64>()
        / sum_weights;
    ScoreStats {
        n: sample.scores.len(),
        sum_weights,
        mean,
        rms: var.max(0.0).sqrt(),
    }
}

/// Binned separation `0.5 * sum (s - b)^2 / (s + b)` of the unit-normalized
/// score distributions; 0 for identical shapes, 1 for disjoint ones.
#[must_use]
pub fn separation(signal: &ScoredSample, background: &ScoredSample) -> f64 {
    let (lo, hi) = combined_range(signal, background);
    if hi <= lo {
        return 0.0;
    }
    let width = (hi - lo) / SCORE_BINS as f64;
    let fill = |sample: &ScoredSample| -> Vec<f64> {
        let mut hist = vec![0.0; SCORE_BINS];
        let total = sample.sum_weights();
        if total <= 0.0 {
            return hist;
        }
        for (score, weight) in sample.scores.iter().zip(&sample.weights) {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let bin = (((score - lo) / width) as usize).min(SCORE_BINS - 1);
            hist[bin] += weight / total;
        }
        hist
    };
    let sig = fill(signal);
    let bkg = fill(background);
    let mut sum = 0.0;
    for (s, b) in sig.iter().zip(&bkg) {
        if s + b > 0.0 {
            sum += (s - b) * (s - b) / (s + b);
        }
    }
    0.5 * sum
}

/// Efficiency curve over a fixed threshold grid, highest cut first.
#[must_use]
pub fn roc_curve(signal: &ScoredSample, background: &ScoredSample) -> Vec<RocPoint> {
    let (lo, hi) = combined_range(signal, background);
    let cuts: Vec<f64> = if hi > lo {
        // start one step above the highest score so the curve begins at
        // zero efficiency, then sweep down to the lowest score
        let step = (hi - lo) / ROC_POINTS as f64;
        (0..=ROC_POINTS + 1)
            .map(|i| hi + step - step * (i as f64))
            .collect()
    } else {
        vec![lo + 0.5, lo - 0.5]
    };
    let sig_total = signal.sum_weights();
    let bkg_total = background.sum_weights();
    cuts.iter()
        .map(|&cut| {
            let eff_signal = accepted_fraction(signal, cut, sig_total);
            let eff_background = accepted_fraction(background, cut, bkg_total);
            RocPoint {
                cut,
                eff_signal,
                rej_background: 1.0 - eff_background,
            }
        })
        .collect()
}

/// Trapezoidal area under the (efficiency, rejection) curve.
#[must_use]
pub fn roc_integral(roc: &[RocPoint]) -> f64 {
    let mut area = 0.0;
    for pair in roc.windows(2) {
        let de = pair[1].eff_signal - pair[0].eff_signal;
        area += 0.5 * (pair[0].rej_background + pair[1].rej_background) * de;
    }
    area
}

/// Working point maximizing `S / sqrt(S + B)` over the threshold grid, with
/// `S` and `B` the weighted counts accepted by the cut.
#[must_use]
pub fn best_cut(
    signal: &ScoredSample,
    background: &ScoredSample,
    roc: &[RocPoint],
) -> BestCut {
    let sig_total = signal.sum_weights();
    let bkg_total = background.sum_weights();
    let mut best = BestCut {
        cut: roc.first().map_or(0.0, |p| p.cut),
        significance: 0.0,
        eff_signal: 0.0,
        eff_background: 0.0,
    };
    for point in roc {
        let s = point.eff_signal * sig_total;
        let b = (1.0 - point.rej_background) * bkg_total;
        if s + b <= 0.0 {
            continue;
        }
        let significance = s / (s + b).sqrt();
        if significance > best.significance {
            best = BestCut {
                cut: point.cut,
                significance,
                eff_signal: point.eff_signal,
                eff_background: 1.0 - point.rej_background,
            };
        }
    }
    best
}

/// Weighted two-sample Kolmogorov-Smirnov distance (the statistic, not a
/// p-value): the maximum absolute difference between the two weighted
/// empirical CDFs.
#[must_use]
pub fn ks_distance(a: &ScoredSample, b: &ScoredSample) -> f64 {
    let total_a = a.sum_weights();
    let total_b = b.sum_weights();
    if total_a <= 0.0 || total_b <= 0.0 {
        return 0.0;
    }
    let mut sorted_a: Vec<(f64, f64)> = a.scores.iter().copied().zip(a.weights.iter().copied()).collect();
    let mut sorted_b: Vec<(f64, f64)> = b.scores.iter().copied().zip(b.weights.iter().copied()).collect();
    sorted_a.sort_by(|x, y| x.0.partial_cmp(&y.0).unwrap_or(std::cmp::Ordering::Equal));
    sorted_b.sort_by(|x, y| x.0.partial_cmp(&y.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut i = 0;
    let mut j = 0;
    let mut cdf_a = 0.0;
    let mut cdf_b = 0.0;
    let mut distance: f64 = 0.0;
    while i < sorted_a.len() || j < sorted_b.len() {
        let next_a = sorted_a.get(i).map(|(s, _)| *s);
        let next_b = sorted_b.get(j).map(|(s, _)| *s);
        let value = match (next_a, next_b) {
            (Some(va), Some(vb)) => va.min(vb),
            (Some(va), None) => va,
            (None, Some(vb)) => vb,
            (None, None) => break,
        };
        while i < sorted_a.len() && sorted_a[i].0 <= value {
            cdf_a += sorted_a[i].1 / total_a;
            i += 1;
        }
        while j < sorted_b.len() && sorted_b[j].0 <= value {
            cdf_b += sorted_b[j].1 / total_b;
            j += 1;
        }
        distance = distance.max((cdf_a - cdf_b).abs());
    }
    distance
}

fn combined_range(a: &ScoredSample, b: &ScoredSample) -> (f64, f64) {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for score in a.scores.iter().chain(&b.scores) {
        lo = lo.min(*score);
        hi = hi.max(*score);
    }
    if lo.is_infinite() {
        (0.0, 0.0)
    } else {
        (lo, hi)
    }
}

fn accepted_fraction(sample: &ScoredSample, cut: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    sample
        .scores
        .iter()
        .zip(&sample.weights)
        .filter(|(score, _)| **score >= cut)
        .map(|(_, weight)| weight)
        .sum::<f64>()
        / total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(scores: Vec<f64>) -> ScoredSample {
        let weights = vec![1.0; scores.len()];
        ScoredSample { scores, weights }
    }

    #[test]
    fn test_stats_weighted_mean_and_rms() {
        let sample = ScoredSample {
            scores: vec![1.0, 3.0],
            weights: vec![3.0, 1.0],
        };
        let stats = stats(&sample);
        assert!((stats.mean - 1.5).abs() < 1e-12);
        // var = (3*(0.5)^2 + 1*(1.5)^2) / 4 = 0.75
        assert!((stats.rms - 0.75f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_separation_disjoint_distributions() {
        let signal = unit(vec![1.0, 1.1, 1.2, 0.9]);
        let background = unit(vec![-1.0, -1.1, -1.2, -0.9]);
        let sep = separation(&signal, &background);
        assert!((sep - 1.0).abs() < 1e-12, "separation {sep}");
    }

    #[test]
    fn test_separation_identical_distributions() {
        let signal = unit(vec![0.0, 0.5, 1.0]);
        let sep = separation(&signal, &signal.clone());
        assert!(sep.abs() < 1e-12);
    }

    #[test]
    fn test_roc_integral_perfect_classifier() {
        let signal = unit(vec![1.0, 0.9, 0.8]);
        let background = unit(vec![-1.0, -0.9, -0.8]);
        let roc = roc_curve(&signal, &background);
        let auc = roc_integral(&roc);
        assert!(auc > 0.97, "AUC {auc} for disjoint classes");
    }

    #[test]
    fn test_roc_integral_degenerate_scores_is_chance() {
        let signal = unit(vec![0.5, 0.5]);
        let background = unit(vec![0.5, 0.5]);
        let roc = roc_curve(&signal, &background);
        let auc = roc_integral(&roc);
        assert!((auc - 0.5).abs() < 1e-12, "AUC {auc}");
    }

    #[test]
    fn test_best_cut_prefers_pure_signal_region() {
        let signal = unit(vec![1.0, 1.0, 1.0, 1.0]);
        let background = unit(vec![-1.0, -1.0, -1.0, 0.95]);
        let roc = roc_curve(&signal, &background);
        let best = best_cut(&signal, &background, &roc);
        // accepting all signal and one background event:
        // 4/sqrt(5) ~ 1.79; pure signal: 4/sqrt(4) = 2
        assert!(best.cut > 0.95, "cut {}", best.cut);
        assert!((best.significance - 2.0).abs() < 1e-9);
        assert!((best.eff_signal - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ks_identical_samples_is_zero() {
        let a = unit(vec![0.1, 0.4, 0.7]);
        assert!(ks_distance(&a, &a.clone()).abs() < 1e-12);
    }

    #[test]
    fn test_ks_disjoint_samples_is_one() {
        let a = unit(vec![0.0, 0.1, 0.2]);
        let b = unit(vec![1.0, 1.1, 1.2]);
        assert!((ks_distance(&a, &b) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_evaluate_assembles_report() {
        let sig_train = unit(vec![0.8, 0.9, 1.0]);
        let bkg_train = unit(vec![-0.8, -0.9, -1.0]);
        let sig_test = unit(vec![0.7, 0.85, 0.95]);
        let bkg_test = unit(vec![-0.7, -0.85, -0.95]);
        let report = evaluate(&sig_train, &bkg_train, &sig_test, &bkg_test);
        assert_eq!(report.signal_test.n, 3);
        assert!(report.separation > 0.9);
        assert!(report.roc_integral > 0.9);
        assert!(report.ks_signal < 0.5);
        assert!(!report.roc.is_empty());
    }
}
