//! Training configuration
//!
//! Everything a run needs is assembled into one [`TrainingConfig`] record:
//! dataset locations, per-class selection cuts, the ordered feature list, the
//! event-weight expression, the split policy, and the booked methods.
//!
//! The record is plain data. Construction performs no I/O; paths, columns,
//! and expression syntax are checked by the pipeline when it uses them, with
//! two exceptions handled locally by [`TrainingConfig::validate`]: an empty
//! feature list and a duplicated feature name are rejected before any file is
//! opened, because no later stage can make sense of either.
//!
//! Configs are ordinary JSON documents (`serde`). [`TrainingConfig::default`]
//! reproduces the embedded constants of the analysis this tool grew out of,
//! so `mva-train` with no config file runs the reference setup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Location of one labeled class of events: a Parquet file plus the name of
/// the event table it carries.
///
/// Parquet has no multi-table container, so the table name is checked against
/// the file's `"table"` key-value metadata entry when present (see
/// [`crate::storage::EventTable::load`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRef {
    /// Path to the Parquet file
    pub path: PathBuf,
    /// Event table name expected inside the file
    pub table: String,
}

impl DatasetRef {
    /// Create a dataset reference.
    pub fn new(path: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            table: table.into(),
        }
    }
}

/// Declared numeric type of an input feature column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureType {
    /// 32-bit float column
    #[serde(rename = "F", alias = "f", alias = "float")]
    Float,
    /// 64-bit float column
    #[serde(rename = "D", alias = "d", alias = "double")]
    Double,
    /// Integer column (32 or 64 bit)
    #[serde(rename = "I", alias = "i", alias = "int")]
    Int,
}

/// One input column used for classification.
///
/// Declaration order is preserved: it fixes the ordering of model
/// coefficients but has no effect on training outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    /// Column name, as found in both event tables
    pub name: String,
    /// Declared numeric type
    #[serde(default = "FeatureSpec::default_dtype")]
    pub dtype: FeatureType,
}

impl FeatureSpec {
    /// Declare a feature column.
    pub fn new(name: impl Into<String>, dtype: FeatureType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }

    const fn default_dtype() -> FeatureType {
        FeatureType::Float
    }
}

/// How surviving rows are divided between training and testing subsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SplitMode {
    /// Shuffle rows, then take the requested number for training.
    /// Seedless shuffling uses OS entropy and is not reproducible across
    /// runs; set [`SplitOptions::seed`] for deterministic partitions.
    #[default]
    Random,
    /// First rows train, remaining rows test (input order)
    Block,
    /// Even rows train, odd rows test (input order)
    Alternate,
}

/// How class imbalance is corrected when event weights are renormalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NormMode {
    /// Leave event weights exactly as evaluated
    None,
    /// Renormalize each class so its average event weight is 1
    #[default]
    NumEvents,
    /// Renormalize so both classes carry the same total weight as the
    /// signal class has events
    EqualNumEvents,
}

/// Split policy consumed by [`crate::split::prepare_split`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitOptions {
    /// Signal rows assigned to training; 0 means half of the surviving rows
    pub n_train_signal: usize,
    /// Background rows assigned to training; 0 means half
    pub n_train_background: usize,
    /// Row selection mode
    pub mode: SplitMode,
    /// Event-weight renormalization mode
    pub norm: NormMode,
    /// Shuffle seed for [`SplitMode::Random`]; `None` draws from OS entropy
    pub seed: Option<u64>,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            n_train_signal: 0,
            n_train_background: 0,
            mode: SplitMode::Random,
            norm: NormMode::NumEvents,
            seed: None,
        }
    }
}

/// Kind of trainable classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodKind {
    /// Linear Fisher discriminant
    Fisher,
    /// Boosted decision trees (AdaBoost over shallow trees)
    Bdt,
}

impl MethodKind {
    /// Canonical lowercase label used in logs and the results container.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Fisher => "fisher",
            Self::Bdt => "bdt",
        }
    }
}

/// One booked method: kind, display name, and an option string of
/// colon-separated `key=value` tokens (e.g. `"VarTransform=None"` or
/// `"NTrees=10:MaxDepth=1"`). Parsed in [`crate::model`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSpec {
    /// Classifier kind
    pub kind: MethodKind,
    /// Name identifying this booking in logs and results
    pub name: String,
    /// Colon-separated hyperparameter string
    #[serde(default)]
    pub options: String,
}

impl MethodSpec {
    /// Book a method under a name with an option string.
    pub fn new(kind: MethodKind, name: impl Into<String>, options: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            options: options.into(),
        }
    }
}

/// Complete configuration record for one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Run title; also names the default output file (`mva.<title>.json`)
    pub title: String,
    /// Signal dataset location
    pub signal: DatasetRef,
    /// Background dataset location
    pub background: DatasetRef,
    /// Selection cut applied to signal rows
    pub signal_cut: String,
    /// Selection cut applied to background rows
    pub background_cut: String,
    /// Relative abundance weight of the signal dataset
    pub signal_class_weight: f64,
    /// Relative abundance weight of the background dataset
    pub background_class_weight: f64,
    /// Input feature columns, in declaration order
    pub features: Vec<FeatureSpec>,
    /// Per-event weight formula, applied uniformly during training
    pub weight_expression: String,
    /// Train/test split policy
    pub split: SplitOptions,
    /// Booked methods, trained and evaluated independently
    pub methods: Vec<MethodSpec>,
    /// Results container path; `None` derives `mva.<title>.json` in the
    /// working directory
    pub output: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            title: "classification".to_string(),
            signal: DatasetRef::new(
                "skimmed/hp800/hp800.higgs.11466938._000001.out.parquet",
                "nominal_Loose",
            ),
            background: DatasetRef::new(
                "skimmed/ttbar/ttbar.higgs.11468615._000002.out.parquet",
                "nominal_Loose",
            ),
            // SR63 region: exactly six jets, three of them b-tagged at 70%
            signal_cut: "nJets == 6 && nBTags_70 == 3".to_string(),
            background_cut: "nJets == 6 && nBTags_70 == 3".to_string(),
            signal_class_weight: 1.0,
            background_class_weight: 1.0,
            features: vec![
                FeatureSpec::new("dEtajj_MaxdEta", FeatureType::Float),
                FeatureSpec::new("HT_jets", FeatureType::Float),
                FeatureSpec::new("dRbb_MaxPt_70", FeatureType::Float),
                FeatureSpec::new("dRlepbb_MindR_70", FeatureType::Float),
                FeatureSpec::new("dRbb_MaxM_70", FeatureType::Float),
                FeatureSpec::new("Mbb_MindR_70", FeatureType::Float),
            ],
            weight_expression: "fabs(weight_leptonSF * weight_bTagSF_70 * weight_mc \
                                * weight_pileup * weight_jvt * weight_ttbb_Norm \
                                * weight_ttbb_Shape_SherpaNominal)"
                .to_string(),
            split: SplitOptions::default(),
            methods: vec![MethodSpec::new(
                MethodKind::Fisher,
                "Fisher",
                "VarTransform=None",
            )],
            output: None,
        }
    }
}

impl TrainingConfig {
    /// Load a configuration from a JSON file.
    ///
    /// Missing fields fall back to their defaults, so a config may specify
    /// only what differs from the reference setup.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the file does not exist and
    /// [`Error::Configuration`] if it is not valid JSON for this schema.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("config file {}", path.display()))
            } else {
                Error::Io(e)
            }
        })?;
        serde_json::from_str(&text).map_err(|e| {
            Error::Configuration(format!("config file {}: {e}", path.display()))
        })
    }

    /// Resolved results container path.
    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("mva.{}.json", self.title)))
    }

    /// Check the parts of the record no later stage can repair.
    ///
    /// Everything else (paths, column existence, expression syntax) is
    /// checked by the pipeline at the point of use.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if no features are declared or a
    /// feature name appears twice.
    pub fn validate(&self) -> Result<()> {
        if self.features.is_empty() {
            return Err(Error::Configuration(
                "no input features declared; at least one is required".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for feature in &self.features {
            if !seen.insert(feature.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "feature '{}' declared more than once",
                    feature.name
                )));
            }
        }
        let mut names = HashSet::new();
        for method in &self.methods {
            if !names.insert(method.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "method name '{}' booked more than once",
                    method.name
                )));
            }
        }
        Ok(())
    }
}
