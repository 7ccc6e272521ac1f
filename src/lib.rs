//! Plateflow - batch orchestration for image-processing workflow steps.
//!
//! A step of a microscopy experiment is split into independent run jobs
//! plus one collect job. Plateflow plans those jobs into batch files,
//! submits them as a task tree to an execution engine, monitors the tree
//! to completion and finally merges the per-job outputs into the
//! experiment's records.
//!
//! # Modules
//!
//! - [`plan`] - Batch planning and batch file persistence
//! - [`submission`] - Submission lifecycle bookkeeping
//! - [`monitor`] - Polling loop and status snapshots
//! - [`collect`] - Collect coordination over finished submissions
//! - [`engine`] - Task trees and execution engines
//! - [`steps`] - Step definitions and the step registry
//! - [`store`] - Persistent job store
//! - [`structure`] - Experiment structure snapshots
//! - [`runner`] - Step driver and multi-stage workflow runner
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Configuration loading and merging
//! - [`ui`] - Prompts, spinners, tables and terminal output
//!
//! # Example
//!
//! ```
//! use plateflow::steps::StepRegistry;
//!
//! let registry = StepRegistry::with_builtins();
//! assert!(registry.get("corilla").is_some());
//! assert!(registry.require("segment").is_err());
//! ```

pub mod cli;
pub mod collect;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod plan;
pub mod runner;
pub mod steps;
pub mod store;
pub mod structure;
pub mod submission;
pub mod ui;
pub mod workspace;

pub use error::{PlateflowError, Result};
