//! Boosted decision trees
//!
//! AdaBoost (Freund & Schapire 1997) over shallow weighted decision trees.
//! Each boosting round fits a greedy gini-minimizing tree on the reweighted
//! sample, then raises the weight of misclassified events by
//! `((1 - err) / err)^shrinkage`. The ensemble score is the weighted vote
//! average in [-1, 1], higher meaning more signal-like.
//!
//! Recognized options: `NTrees` (rounds, default 10), `MaxDepth` (default 1,
//! i.e. decision stumps), `Shrinkage` (boost-weight damping, default 1).

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::{BoostedTree, ClassSample, Method, MethodOptions, ModelParameters};
use crate::config::MethodKind;
use crate::{Error, Result};

/// Weighted error below which a tree is treated as perfect and boosting
/// stops (its boost weight would otherwise diverge).
const MIN_ERROR: f64 = 1e-10;

/// One node of a decision tree. Events with `x[feature] < threshold` go
/// left, the rest go right.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum TreeNode {
    /// Terminal node voting for one class
    Leaf {
        /// True if this leaf votes signal
        signal_like: bool,
    },
    /// Internal split on one feature
    Split {
        /// Feature column index
        feature: usize,
        /// Split threshold
        threshold: f64,
        /// Subtree for `x[feature] < threshold`
        left: Box<TreeNode>,
        /// Subtree for `x[feature] >= threshold`
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    /// Vote of this tree for one event: +1 signal, -1 background.
    #[must_use]
    pub fn vote(&self, row: ndarray::ArrayView1<'_, f64>) -> f64 {
        match self {
            Self::Leaf { signal_like } => {
                if *signal_like {
                    1.0
                } else {
                    -1.0
                }
            }
            Self::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if row[*feature] < *threshold {
                    left.vote(row)
                } else {
                    right.vote(row)
                }
            }
        }
    }
}

/// Boosted decision tree method.
pub struct BoostedTrees {
    name: String,
    n_trees: usize,
    max_depth: usize,
    shrinkage: f64,
    trees: Option<Vec<BoostedTree>>,
}

impl BoostedTrees {
    /// Create an unfitted BDT method from its option string.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] on unknown or malformed options.
    pub fn new(name: &str, options: &MethodOptions) -> Result<Self> {
        options.reject_unknown(&["NTrees", "MaxDepth", "Shrinkage"])?;
        let n_trees = options.get_parsed("NTrees", 10usize)?;
        let max_depth = options.get_parsed("MaxDepth", 1usize)?;
        let shrinkage = options.get_parsed("Shrinkage", 1.0f64)?;
        if n_trees == 0 || max_depth == 0 {
            return Err(Error::Configuration(
                "NTrees and MaxDepth must be at least 1".to_string(),
            ));
        }
        if shrinkage <= 0.0 {
            return Err(Error::Configuration(
                "Shrinkage must be positive".to_string(),
            ));
        }
        Ok(Self {
            name: name.to_string(),
            n_trees,
            max_depth,
            shrinkage,
            trees: None,
        })
    }

    fn untrained(&self) -> Error {
        Error::Training {
            method: self.name.clone(),
            reason: "method has not been trained".to_string(),
        }
    }
}

impl Method for BoostedTrees {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MethodKind {
        MethodKind::Bdt
    }

    fn train(&mut self, signal: &ClassSample, background: &ClassSample) -> Result<()> {
        let n_features = signal.x.ncols();
        if n_features == 0 || n_features != background.x.ncols() {
            return Err(Error::Training {
                method: self.name.clone(),
                reason: "feature dimension mismatch between classes".to_string(),
            });
        }
        if signal.is_empty() || background.is_empty() {
            return Err(Error::Training {
                method: self.name.clone(),
                reason: "empty training sample".to_string(),
            });
        }

        // merged sample: signal rows first, labels +1 / -1
        let n_total = signal.len() + background.len();
        let mut x = Array2::<f64>::zeros((n_total, n_features));
        for (i, row) in signal.x.rows().into_iter().enumerate() {
            x.row_mut(i).assign(&row);
        }
        for (i, row) in background.x.rows().into_iter().enumerate() {
            x.row_mut(signal.len() + i).assign(&row);
        }
        let labels: Vec<f64> = std::iter::repeat(1.0)
            .take(signal.len())
            .chain(std::iter::repeat(-1.0).take(background.len()))
            .collect();

        let mut weights: Vec<f64> = signal
            .w
            .iter()
            .chain(background.w.iter())
            .copied()
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(Error::Training {
                method: self.name.clone(),
                reason: "non-positive total event weight".to_string(),
            });
        }
        for w in &mut weights {
            *w /= total;
        }

        let rows: Vec<usize> = (0..n_total).collect();
        let mut trees = Vec::with_capacity(self.n_trees);
        for round in 0..self.n_trees {
            let tree = build_tree(&x, &labels, &weights, &rows, 0, self.max_depth);
            let err: f64 = rows
                .iter()
                .filter(|&&i| tree.vote(x.row(i)) != labels[i])
                .map(|&i| weights[i])
                .sum();

            if err >= 0.5 {
                // no better than chance on the reweighted sample; boosting
                // cannot continue
                tracing::debug!(method = %self.name, round, err, "boosting stopped early");
                break;
            }
            let err = err.max(MIN_ERROR);
            let alpha = self.shrinkage * ((1.0 - err) / err).ln();
            let misclassified_scale = alpha.exp();
            let mut sum = 0.0;
            for &i in &rows {
                if tree.vote(x.row(i)) != labels[i] {
                    weights[i] *= misclassified_scale;
                }
                sum += weights[i];
            }
            for w in &mut weights {
                *w /= sum;
            }
            let perfect = err <= MIN_ERROR;
            trees.push(BoostedTree {
                weight: alpha,
                tree,
            });
            if perfect {
                break;
            }
        }

        if trees.is_empty() {
            return Err(Error::Training {
                method: self.name.clone(),
                reason: "no tree performed better than chance on the training sample"
                    .to_string(),
            });
        }
        self.trees = Some(trees);
        Ok(())
    }

    fn score(&self, x: &Array2<f64>) -> Result<Vec<f64>> {
        let trees = self.trees.as_ref().ok_or_else(|| self.untrained())?;
        let total_weight: f64 = trees.iter().map(|t| t.weight).sum();
        Ok(x
            .rows()
            .into_iter()
            .map(|row| {
                let vote: f64 = trees.iter().map(|t| t.weight * t.tree.vote(row)).sum();
                vote / total_weight
            })
            .collect())
    }

    fn parameters(&self) -> Result<ModelParameters> {
        let trees = self.trees.as_ref().ok_or_else(|| self.untrained())?;
        Ok(ModelParameters::Bdt {
            trees: trees.clone(),
        })
    }
}

/// Greedy weighted-gini tree construction over the given row subset.
fn build_tree(
    x: &Array2<f64>,
    labels: &[f64],
    weights: &[f64],
    rows: &[usize],
    depth: usize,
    max_depth: usize,
) -> TreeNode {
    let (w_sig, w_bkg) = class_weights(labels, weights, rows);
    let leaf = TreeNode::Leaf {
        signal_like: w_sig >= w_bkg,
    };
    if depth >= max_depth || w_sig == 0.0 || w_bkg == 0.0 || rows.len() < 2 {
        return leaf;
    }
    let Some((feature, threshold)) = best_split(x, labels, weights, rows) else {
        return leaf;
    };
    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
        .iter()
        .partition(|&&i| x[[i, feature]] < threshold);
    TreeNode::Split {
        feature,
        threshold,
        left: Box::new(build_tree(x, labels, weights, &left_rows, depth + 1, max_depth)),
        right: Box::new(build_tree(
            x, labels, weights, &right_rows, depth + 1, max_depth,
        )),
    }
}

fn class_weights(labels: &[f64], weights: &[f64], rows: &[usize]) -> (f64, f64) {
    let mut w_sig = 0.0;
    let mut w_bkg = 0.0;
    for &i in rows {
        if labels[i] > 0.0 {
            w_sig += weights[i];
        } else {
            w_bkg += weights[i];
        }
    }
    (w_sig, w_bkg)
}

fn gini(w_sig: f64, w_bkg: f64) -> f64 {
    let total = w_sig + w_bkg;
    if total <= 0.0 {
        return 0.0;
    }
    let p_sig = w_sig / total;
    let p_bkg = w_bkg / total;
    total * (1.0 - p_sig * p_sig - p_bkg * p_bkg)
}

/// Best `(feature, threshold)` minimizing the summed child gini impurity,
/// or `None` if no split improves on the node itself.
fn best_split(
    x: &Array2<f64>,
    labels: &[f64],
    weights: &[f64],
    rows: &[usize],
) -> Option<(usize, f64)> {
    let (w_sig, w_bkg) = class_weights(labels, weights, rows);
    let parent = gini(w_sig, w_bkg);
    let mut best: Option<(usize, f64, f64)> = None;

    for feature in 0..x.ncols() {
        let mut sorted: Vec<usize> = rows.to_vec();
        sorted.sort_by(|&a, &b| {
            x[[a, feature]]
                .partial_cmp(&x[[b, feature]])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut left_sig = 0.0;
        let mut left_bkg = 0.0;
        for k in 0..sorted.len() - 1 {
            let i = sorted[k];
            if labels[i] > 0.0 {
                left_sig += weights[i];
            } else {
                left_bkg += weights[i];
            }
            let here = x[[i, feature]];
            let next = x[[sorted[k + 1], feature]];
            if next <= here {
                continue;
            }
            let left_w = left_sig + left_bkg;
            let right_w = (w_sig - left_sig) + (w_bkg - left_bkg);
            if left_w <= 0.0 || right_w <= 0.0 {
                continue;
            }
            let score = gini(left_sig, left_bkg) + gini(w_sig - left_sig, w_bkg - left_bkg);
            if score < parent - 1e-12
                && best.map_or(true, |(_, _, best_score)| score < best_score)
            {
                best = Some((feature, (here + next) / 2.0, score));
            }
        }
    }
    best.map(|(feature, threshold, _)| (feature, threshold))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn sample(rows: Vec<Vec<f64>>) -> ClassSample {
        let n_features = rows[0].len();
        let x = Array2::from_shape_vec(
            (rows.len(), n_features),
            rows.into_iter().flatten().collect(),
        )
        .unwrap();
        let w = vec![1.0; x.nrows()];
        ClassSample { x, w }
    }

    fn bdt(options: &str) -> BoostedTrees {
        BoostedTrees::new("BDT", &MethodOptions::parse(options).unwrap()).unwrap()
    }

    #[test]
    fn test_single_stump_separates_disjoint_classes() {
        let signal = sample(vec![vec![2.0], vec![3.0], vec![4.0]]);
        let background = sample(vec![vec![-2.0], vec![-3.0], vec![-4.0]]);
        let mut method = bdt("NTrees=10:MaxDepth=1");
        method.train(&signal, &background).unwrap();

        // a perfect first stump stops boosting
        let ModelParameters::Bdt { trees } = method.parameters().unwrap() else {
            panic!("expected BDT parameters");
        };
        assert_eq!(trees.len(), 1);

        let sig = method.score(&signal.x).unwrap();
        let bkg = method.score(&background.x).unwrap();
        assert!(sig.iter().all(|s| *s > 0.0));
        assert!(bkg.iter().all(|b| *b < 0.0));
    }

    #[test]
    fn test_depth_two_solves_interval_class() {
        // signal in the middle, background on both sides; one stump cannot
        // separate this, a depth-2 tree can
        let signal = sample(vec![vec![0.0], vec![0.5], vec![-0.5]]);
        let background = sample(vec![vec![-3.0], vec![-4.0], vec![3.0], vec![4.0]]);
        let mut method = bdt("NTrees=20:MaxDepth=2");
        method.train(&signal, &background).unwrap();

        let sig = method.score(&signal.x).unwrap();
        let bkg = method.score(&background.x).unwrap();
        assert!(sig.iter().all(|s| *s > 0.0), "signal scores {sig:?}");
        assert!(bkg.iter().all(|b| *b < 0.0), "background scores {bkg:?}");
    }

    #[test]
    fn test_score_range_is_bounded() {
        let signal = sample(vec![vec![1.0, 2.0], vec![2.0, 1.0], vec![1.5, 1.5]]);
        let background = sample(vec![vec![-1.0, 0.0], vec![0.0, -1.0], vec![-1.5, 0.5]]);
        let mut method = bdt("NTrees=5:MaxDepth=2");
        method.train(&signal, &background).unwrap();
        for score in method.score(&signal.x).unwrap() {
            assert!((-1.0..=1.0).contains(&score));
        }
    }

    #[test]
    fn test_options_validated() {
        assert!(BoostedTrees::new("BDT", &MethodOptions::parse("NTrees=0").unwrap()).is_err());
        assert!(
            BoostedTrees::new("BDT", &MethodOptions::parse("Shrinkage=-1").unwrap()).is_err()
        );
        assert!(BoostedTrees::new("BDT", &MethodOptions::parse("NCycles=3").unwrap()).is_err());
    }

    #[test]
    fn test_score_before_train_fails() {
        let method = bdt("");
        assert!(method.score(&arr2(&[[0.0]])).is_err());
    }

    #[test]
    fn test_tree_vote_walks_splits() {
        let tree = TreeNode::Split {
            feature: 0,
            threshold: 0.0,
            left: Box::new(TreeNode::Leaf { signal_like: false }),
            right: Box::new(TreeNode::Leaf { signal_like: true }),
        };
        let x = arr2(&[[-1.0], [1.0]]);
        assert_eq!(tree.vote(x.row(0)), -1.0);
        assert_eq!(tree.vote(x.row(1)), 1.0);
    }
}
