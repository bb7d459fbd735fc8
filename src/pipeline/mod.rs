//! Training pipeline driver
//!
//! [`Trainer`] owns the whole run as one explicit object: the configuration,
//! the open results container, the booked methods, and the prepared data.
//! The call sequence is fixed and strictly sequential:
//!
//! ```text
//! Trainer::new -> prepare_split -> train_all -> test_all -> evaluate_all -> close
//! ```
//!
//! [`Trainer::run`] executes the sequence in one call. Stages check that
//! their predecessor ran; nothing here retries or recovers — any error
//! aborts the run and the container is never finalized (the output file is
//! left empty).
//!
//! Validation placement follows the principle "fail before work": feature
//! list problems fail in [`Trainer::new`], missing files and columns fail in
//! [`Trainer::prepare_split`] before any model is fit, and empty selections
//! fail there too.

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::config::{FeatureSpec, FeatureType, TrainingConfig};
use crate::eval::{evaluate, ScoredSample};
use crate::expr::Expression;
use crate::model::{build_method, ClassSample, Method};
use crate::report::{MethodResult, ResultsFile};
use crate::split::{norm_scales, partition};
use crate::storage::{apply_mask, column_as_f64, EventTable};
use crate::{Error, Result};

/// The training pipeline for one run.
pub struct Trainer {
    config: TrainingConfig,
    output: ResultsFile,
    methods: Vec<BookedMethod>,
    data: Option<PreparedData>,
    scores: Vec<MethodScores>,
}

struct BookedMethod {
    options: String,
    method: Box<dyn Method>,
    trained: bool,
}

struct PreparedData {
    train_signal: ClassSample,
    train_background: ClassSample,
    test_signal: ClassSample,
    test_background: ClassSample,
}

struct MethodScores {
    signal_train: ScoredSample,
    background_train: ScoredSample,
    signal_test: ScoredSample,
    background_test: ScoredSample,
}

impl std::fmt::Debug for Trainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trainer").finish_non_exhaustive()
    }
}

impl Trainer {
    /// Validate the configuration, open the results container, and book the
    /// configured methods.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for an empty or duplicated feature
    /// list and for malformed method options, and [`Error::Io`] if the
    /// output path is not writable.
    pub fn new(config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        let mut output = ResultsFile::create(config.output_path(), &config)?;
        let methods = config
            .methods
            .iter()
            .map(|spec| {
                Ok(BookedMethod {
                    options: spec.options.clone(),
                    method: build_method(spec)?,
                    trained: false,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        output.run_mut().start();
        info!(
            title = %config.title,
            output = %output.path().display(),
            methods = methods.len(),
            "run opened"
        );
        Ok(Self {
            config,
            output,
            methods,
            data: None,
            scores: Vec::new(),
        })
    }

    /// Number of booked methods.
    #[must_use]
    pub fn booked_count(&self) -> usize {
        self.methods.len()
    }

    /// Load both datasets, apply the selection cuts, evaluate event
    /// weights, and partition each class into train/test subsets.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] for missing files/tables,
    /// [`Error::Configuration`] for unknown columns or malformed
    /// expressions, and [`Error::EmptyTrainingSet`] if a cut leaves a class
    /// with zero rows.
    pub fn prepare_split(&mut self) -> Result<()> {
        // the weight formula is parsed exactly once and then bound to each
        // class's schema
        let weight_expr = Expression::parse(&self.config.weight_expression)?;

        let signal = self.prepare_class(
            "signal",
            &self.config.signal,
            &self.config.signal_cut,
            &weight_expr,
            self.config.signal_class_weight,
        )?;
        let background = self.prepare_class(
            "background",
            &self.config.background,
            &self.config.background_cut,
            &weight_expr,
            self.config.background_class_weight,
        )?;

        let (sig_scale, bkg_scale) = norm_scales(
            self.config.split.norm,
            signal.weights.iter().sum(),
            signal.x.nrows(),
            background.weights.iter().sum(),
            background.x.nrows(),
        )?;

        let mut rng = match self.config.split.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        // signal is always partitioned first so that a seeded run is
        // reproducible
        let sig_split = partition(
            signal.x.nrows(),
            self.config.split.n_train_signal,
            self.config.split.mode,
            &mut rng,
        )
        .map_err(|e| class_context("signal", &e))?;
        let bkg_split = partition(
            background.x.nrows(),
            self.config.split.n_train_background,
            self.config.split.mode,
            &mut rng,
        )
        .map_err(|e| class_context("background", &e))?;

        info!(
            signal_train = sig_split.train.len(),
            signal_test = sig_split.test.len(),
            background_train = bkg_split.train.len(),
            background_test = bkg_split.test.len(),
            "train/test split prepared"
        );

        self.data = Some(PreparedData {
            train_signal: gather(&signal.x, &signal.weights, sig_scale, &sig_split.train),
            test_signal: gather(&signal.x, &signal.weights, sig_scale, &sig_split.test),
            train_background: gather(
                &background.x,
                &background.weights,
                bkg_scale,
                &bkg_split.train,
            ),
            test_background: gather(
                &background.x,
                &background.weights,
                bkg_scale,
                &bkg_split.test,
            ),
        });
        Ok(())
    }

    /// Fit every booked method on the training partitions, in booking order.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if called before
    /// [`Trainer::prepare_split`], or [`Error::Training`] from a failed fit.
    pub fn train_all(&mut self) -> Result<()> {
        let data = self.data.as_ref().ok_or_else(|| {
            Error::Configuration("prepare_split must be called before train_all".to_string())
        })?;
        for booked in &mut self.methods {
            info!(method = booked.method.name(), "training");
            booked
                .method
                .train(&data.train_signal, &data.train_background)?;
            booked.trained = true;
        }
        Ok(())
    }

    /// Score every trained method on all four partitions.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if called before
    /// [`Trainer::train_all`].
    pub fn test_all(&mut self) -> Result<()> {
        let data = self.data.as_ref().ok_or_else(|| {
            Error::Configuration("prepare_split must be called before test_all".to_string())
        })?;
        if self.methods.iter().any(|b| !b.trained) {
            return Err(Error::Configuration(
                "train_all must be called before test_all".to_string(),
            ));
        }
        self.scores.clear();
        for booked in &self.methods {
            debug!(method = booked.method.name(), "scoring partitions");
            self.scores.push(MethodScores {
                signal_train: scored(&*booked.method, &data.train_signal)?,
                background_train: scored(&*booked.method, &data.train_background)?,
                signal_test: scored(&*booked.method, &data.test_signal)?,
                background_test: scored(&*booked.method, &data.test_background)?,
            });
        }
        Ok(())
    }

    /// Compute evaluation metrics for every method and store the results in
    /// the container.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if called before
    /// [`Trainer::test_all`].
    pub fn evaluate_all(&mut self) -> Result<()> {
        if self.scores.len() != self.methods.len() {
            return Err(Error::Configuration(
                "test_all must be called before evaluate_all".to_string(),
            ));
        }
        for (booked, scores) in self.methods.iter().zip(&self.scores) {
            let evaluation = evaluate(
                &scores.signal_train,
                &scores.background_train,
                &scores.signal_test,
                &scores.background_test,
            );
            info!(
                method = booked.method.name(),
                separation = evaluation.separation,
                roc_integral = evaluation.roc_integral,
                significance = evaluation.best_cut.significance,
                "evaluated"
            );
            self.output.push(MethodResult {
                name: booked.method.name().to_string(),
                kind: booked.method.kind(),
                options: booked.options.clone(),
                parameters: booked.method.parameters()?,
                evaluation,
            });
        }
        Ok(())
    }

    /// Finalize and sync the results container.
    ///
    /// # Errors
    /// Returns [`Error::Io`] or [`Error::Json`] from the final write.
    pub fn close(self) -> Result<std::path::PathBuf> {
        let path = self.output.close()?;
        info!(output = %path.display(), "run closed");
        Ok(path)
    }

    /// Execute the full sequence: prepare, train, test, evaluate, close.
    ///
    /// # Errors
    /// Propagates the first error of any stage.
    pub fn run(mut self) -> Result<std::path::PathBuf> {
        self.prepare_split()?;
        self.train_all()?;
        self.test_all()?;
        self.evaluate_all()?;
        self.close()
    }

    /// Load one class, apply its cut, and evaluate event weights.
    fn prepare_class(
        &self,
        class: &str,
        dataset: &crate::config::DatasetRef,
        cut_source: &str,
        weight_expr: &Expression,
        class_weight: f64,
    ) -> Result<PreparedClass> {
        let table = EventTable::load(dataset)?;
        info!(
            class,
            path = %dataset.path.display(),
            table = table.name(),
            rows = table.num_rows(),
            "dataset loaded"
        );
        check_features(&table, &self.config.features, class)?;

        let schema = table.schema();
        let cut = Expression::parse(cut_source)?.compile(&schema)?;
        let mask = cut.evaluate_mask(table.batch())?;
        let selected = apply_mask(table.batch(), &mask)?;
        if selected.num_rows() == 0 {
            return Err(Error::EmptyTrainingSet {
                class: class.to_string(),
                cut: cut_source.to_string(),
            });
        }
        debug!(class, selected = selected.num_rows(), "cut applied");

        let weights: Vec<f64> = weight_expr
            .compile(&schema)?
            .evaluate(&selected)?
            .into_iter()
            .map(|w| w * class_weight)
            .collect();
        let negative = weights.iter().filter(|w| **w < 0.0).count();
        if negative > 0 {
            warn!(class, negative, "events with negative weight enter the fit");
        }

        let x = feature_matrix(&selected, &self.config.features)?;
        Ok(PreparedClass { x, weights })
    }
}

struct PreparedClass {
    x: Array2<f64>,
    weights: Vec<f64>,
}

fn class_context(class: &str, err: &Error) -> Error {
    match err {
        Error::Configuration(msg) => Error::Configuration(format!("{class}: {msg}")),
        other => Error::Configuration(format!("{class}: {other}")),
    }
}

/// Check that every declared feature exists in the table with a numeric
/// type. A declared/physical type category mismatch is tolerated with a
/// warning; the values are cast to `f64` either way.
fn check_features(table: &EventTable, features: &[FeatureSpec], class: &str) -> Result<()> {
    use arrow::datatypes::DataType;
    let schema = table.schema();
    for feature in features {
        let field = schema.field_with_name(&feature.name).map_err(|_| {
            Error::Configuration(format!(
                "feature '{}' not found in {class} table '{}'",
                feature.name,
                table.name()
            ))
        })?;
        let physical_int = matches!(field.data_type(), DataType::Int32 | DataType::Int64);
        let physical_float = matches!(field.data_type(), DataType::Float32 | DataType::Float64);
        if !physical_int && !physical_float {
            return Err(Error::Configuration(format!(
                "feature '{}' in {class} table has non-numeric type {:?}",
                feature.name,
                field.data_type()
            )));
        }
        let declared_int = feature.dtype == FeatureType::Int;
        if declared_int != physical_int {
            warn!(
                class,
                feature = %feature.name,
                declared = ?feature.dtype,
                physical = ?field.data_type(),
                "declared feature type does not match column type"
            );
        }
    }
    Ok(())
}

/// Assemble the feature matrix (events x features, declaration order).
fn feature_matrix(
    batch: &arrow::record_batch::RecordBatch,
    features: &[FeatureSpec],
) -> Result<Array2<f64>> {
    let columns: Vec<Vec<f64>> = features
        .iter()
        .map(|f| column_as_f64(batch, &f.name))
        .collect::<Result<_>>()?;
    Ok(Array2::from_shape_fn(
        (batch.num_rows(), features.len()),
        |(i, j)| columns[j][i],
    ))
}

/// Select the rows of one partition, applying the class scale factor.
fn gather(x: &Array2<f64>, weights: &[f64], scale: f64, indices: &[usize]) -> ClassSample {
    ClassSample {
        x: x.select(Axis(0), indices),
        w: indices.iter().map(|&i| weights[i] * scale).collect(),
    }
}

fn scored(method: &dyn Method, sample: &ClassSample) -> Result<ScoredSample> {
    Ok(ScoredSample {
        scores: method.score(&sample.x)?,
        weights: sample.w.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingConfig;

    fn config_in(dir: &std::path::Path) -> TrainingConfig {
        TrainingConfig {
            output: Some(dir.join("mva.test.json")),
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn test_new_rejects_zero_features() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainingConfig {
            features: Vec::new(),
            ..config_in(dir.path())
        };
        let err = Trainer::new(config).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_new_rejects_unwritable_output() {
        let config = TrainingConfig {
            output: Some("/nonexistent-dir/mva.json".into()),
            ..TrainingConfig::default()
        };
        let err = Trainer::new(config).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_stage_order_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = Trainer::new(config_in(dir.path())).unwrap();
        assert!(trainer.train_all().is_err());
        assert!(trainer.test_all().is_err());
        assert!(trainer.evaluate_all().is_err());
    }

    #[test]
    fn test_missing_input_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut trainer = Trainer::new(config_in(dir.path())).unwrap();
        // default config points at paths that do not exist here
        let err = trainer.prepare_split().unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
