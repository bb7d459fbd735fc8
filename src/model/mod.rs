//! Trainable classification methods
//!
//! A booked method is anything that can be fit on weighted signal/background
//! training samples and then produce a per-event discriminant score, higher
//! meaning more signal-like. Methods are constructed from a
//! [`MethodSpec`](crate::config::MethodSpec) by [`build_method`]; each booking
//! is trained and evaluated independently of the others.
//!
//! Hyperparameters travel as colon-separated `key=value` strings
//! (`"NTrees=10:MaxDepth=1"`), parsed into [`MethodOptions`] with unknown
//! keys rejected up front.

mod bdt;
mod fisher;

pub use bdt::{BoostedTrees, TreeNode};
pub use fisher::FisherDiscriminant;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config::{MethodKind, MethodSpec};
use crate::{Error, Result};

/// Feature matrix plus per-event weights for one class partition.
///
/// Rows are events, columns are features in declaration order. Weights
/// already include the event-weight expression, the class abundance weight,
/// and the normalization-mode scale factor.
#[derive(Debug, Clone)]
pub struct ClassSample {
    /// Feature values, events x features
    pub x: Array2<f64>,
    /// Per-event weights, one per row of `x`
    pub w: Vec<f64>,
}

impl ClassSample {
    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    /// True if the sample holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.x.nrows() == 0
    }

    /// Sum of event weights.
    #[must_use]
    pub fn sum_weights(&self) -> f64 {
        self.w.iter().sum()
    }
}

/// A trainable classifier.
pub trait Method {
    /// Booking name (unique within a run).
    fn name(&self) -> &str;

    /// Classifier kind.
    fn kind(&self) -> MethodKind;

    /// Fit on the training partitions of both classes.
    ///
    /// # Errors
    /// Returns [`Error::Training`] on degenerate inputs (empty samples,
    /// dimension mismatch, singular scatter matrix, ...).
    fn train(&mut self, signal: &ClassSample, background: &ClassSample) -> Result<()>;

    /// Discriminant score for each row of `x`, higher = more signal-like.
    ///
    /// # Errors
    /// Returns [`Error::Training`] if called before a successful
    /// [`Method::train`].
    fn score(&self, x: &Array2<f64>) -> Result<Vec<f64>>;

    /// Serializable parameters of the trained model.
    ///
    /// # Errors
    /// Returns [`Error::Training`] if called before a successful
    /// [`Method::train`].
    fn parameters(&self) -> Result<ModelParameters>;
}

/// Trained model parameters, as persisted into the results container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelParameters {
    /// Linear discriminant: `score = coefficients . x + offset`
    Fisher {
        /// One coefficient per declared feature, in declaration order
        coefficients: Vec<f64>,
        /// Offset centering the weighted mean score at zero
        offset: f64,
        /// Input rescaling applied before the linear form, if any
        transform: Option<NormTransform>,
    },
    /// Boosted ensemble of shallow decision trees
    Bdt {
        /// Trees with their boost weights, in boosting order
        trees: Vec<BoostedTree>,
    },
}

/// One member of a boosted ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedTree {
    /// Boost weight (vote strength) of this tree
    pub weight: f64,
    /// Root of the decision tree
    pub tree: TreeNode,
}

/// Per-feature rescaling of inputs to the range [-1, 1], fitted on the
/// training sample and replayed at scoring time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormTransform {
    /// Per-feature minimum seen in training
    pub min: Vec<f64>,
    /// Per-feature maximum seen in training
    pub max: Vec<f64>,
}

impl NormTransform {
    /// Fit the per-feature range over the rows of the given matrices.
    #[must_use]
    pub fn fit(samples: &[&Array2<f64>]) -> Self {
        let n_features = samples.first().map_or(0, |x| x.ncols());
        let mut min = vec![f64::INFINITY; n_features];
        let mut max = vec![f64::NEG_INFINITY; n_features];
        for x in samples {
            for row in x.rows() {
                for (j, value) in row.iter().enumerate() {
                    min[j] = min[j].min(*value);
                    max[j] = max[j].max(*value);
                }
            }
        }
        Self { min, max }
    }

    /// Rescale a copy of `x` to [-1, 1] per feature. Features with a
    /// degenerate range map to 0.
    #[must_use]
    pub fn apply(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = x.clone();
        for mut row in out.rows_mut() {
            for (j, value) in row.iter_mut().enumerate() {
                let range = self.max[j] - self.min[j];
                *value = if range > 0.0 {
                    2.0 * (*value - self.min[j]) / range - 1.0
                } else {
                    0.0
                };
            }
        }
        out
    }
}

/// Input rescaling selection, from the `VarTransform` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VarTransform {
    /// Use features as-is
    #[default]
    None,
    /// Rescale each feature to [-1, 1] using training-set ranges
    Norm,
}

/// Parsed method option string: colon-separated `key=value` tokens.
#[derive(Debug, Clone, Default)]
pub struct MethodOptions {
    entries: Vec<(String, String)>,
}

impl MethodOptions {
    /// Parse an option string such as `"NTrees=10:MaxDepth=1"`.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] on tokens without `=`.
    pub fn parse(options: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for token in options.split(':') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let Some((key, value)) = token.split_once('=') else {
                return Err(Error::Configuration(format!(
                    "method option '{token}' is not of the form key=value"
                )));
            };
            entries.push((key.trim().to_string(), value.trim().to_string()));
        }
        Ok(Self { entries })
    }

    /// Value for `key`, case-insensitive.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Parse the value for `key` into `T`, or fall back to `default`.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the value does not parse.
    pub fn get_parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.get(key) {
            None => Ok(default),
            Some(text) => text.parse().map_err(|_| {
                Error::Configuration(format!("method option {key}={text}: invalid value"))
            }),
        }
    }

    /// Parse the `VarTransform` option.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] on an unknown transform name.
    pub fn var_transform(&self) -> Result<VarTransform> {
        match self.get("VarTransform") {
            None => Ok(VarTransform::None),
            Some(value) if value.eq_ignore_ascii_case("none") => Ok(VarTransform::None),
            Some(value) if value.eq_ignore_ascii_case("norm") => Ok(VarTransform::Norm),
            Some(other) => Err(Error::Configuration(format!(
                "unknown VarTransform '{other}' (expected None or Norm)"
            ))),
        }
    }

    /// Reject options whose keys are not in `known`.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] naming the first unknown key.
    pub fn reject_unknown(&self, known: &[&str]) -> Result<()> {
        for (key, _) in &self.entries {
            if !known.iter().any(|k| k.eq_ignore_ascii_case(key)) {
                return Err(Error::Configuration(format!(
                    "unknown method option '{key}' (known: {})",
                    known.join(", ")
                )));
            }
        }
        Ok(())
    }
}

/// Construct a method from its booking spec.
///
/// # Errors
/// Returns [`Error::Configuration`] on malformed or unknown options.
pub fn build_method(spec: &MethodSpec) -> Result<Box<dyn Method>> {
    let options = MethodOptions::parse(&spec.options)
        .map_err(|e| prefix_method(&spec.name, &e))?;
    let method: Box<dyn Method> = match spec.kind {
        MethodKind::Fisher => Box::new(
            FisherDiscriminant::new(&spec.name, &options)
                .map_err(|e| prefix_method(&spec.name, &e))?,
        ),
        MethodKind::Bdt => Box::new(
            BoostedTrees::new(&spec.name, &options).map_err(|e| prefix_method(&spec.name, &e))?,
        ),
    };
    Ok(method)
}

fn prefix_method(name: &str, err: &Error) -> Error {
    Error::Configuration(format!("method '{name}': {err}"))
}
