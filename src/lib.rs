#[macro_use]
pub mod ddag;
pub mod graph;

pub use ddag::common::config::{FitConfig, InferenceConfig};
pub use ddag::common::error::{DagError, Result};
pub use ddag::fit::{ClassifierKind, FitMethod};
pub use ddag::format::{NetworkFile, TabularCpd, TabularNetwork};
pub use ddag::inference::{EliminationSchedule, ExactInference, FactorElimination, ImportanceEstimate};
pub use ddag::influence::{EfficientInfluenceFunction, EvaluationMode, InferenceMethod, InfluenceQuery};
pub use ddag::DiscreteDag;
pub use graph::{Dag, Imset, Node};
