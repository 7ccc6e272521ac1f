//! Structural view of an experiment.
//!
//! The structural store (plates, acquisitions, wells, sites, channels) is an
//! external collaborator. plateflow reads a snapshot of it from
//! `<experiment>/structure.yml` and never mutates it during planning.

mod snapshot;
mod source;

pub use snapshot::{
    Acquisition, AcquisitionRef, Channel, ImageFile, Plate, StructuralSnapshot,
};
pub use source::{load_snapshot, save_snapshot};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentId(pub u64);

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExperimentId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(ExperimentId)
    }
}

impl From<u64> for ExperimentId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}
