#[macro_use]
pub mod common;
pub mod edits;
pub mod fit;
pub mod format;
pub mod inference;
pub mod influence;
pub mod network;
pub mod sampling;
pub mod table;

pub use network::DiscreteDag;
