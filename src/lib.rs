//! # fisher-mva: Signal/Background Classification Trainer
//!
//! Trains binary classifiers (a linear Fisher discriminant, optionally
//! boosted decision trees) separating "signal" from "background" events
//! stored in columnar Parquet tables.
//!
//! A run is one strictly sequential pipeline: load the two labeled
//! datasets, apply per-class selection cuts, evaluate a per-event weight
//! formula, split surviving rows into train/test partitions, fit each
//! booked method, evaluate it on the test partition, and persist model
//! parameters plus quality metrics into a JSON results container.
//!
//! ## Example
//!
//! ```rust,no_run
//! use fisher_mva::config::TrainingConfig;
//! use fisher_mva::pipeline::Trainer;
//!
//! let mut config = TrainingConfig::default();
//! config.split.seed = Some(42); // reproducible partitions
//!
//! let output = Trainer::new(config)?.run()?;
//! println!("results written to {}", output.display());
//! # Ok::<(), fisher_mva::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod eval;
pub mod expr;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod split;
pub mod storage;

pub use error::{Error, Result};
