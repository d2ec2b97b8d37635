pub mod dag;
pub mod imset;

pub use dag::{Dag, Node};
pub use imset::Imset;
