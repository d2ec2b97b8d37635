pub mod elimination;
pub mod factor;
pub mod importance;

pub use elimination::EliminationSchedule;
pub use factor::{ExactInference, FactorElimination};
pub use importance::ImportanceEstimate;
