pub mod error;
mod baum_welch;
pub mod model;
mod render;
mod trellis;
mod utils;
mod viterbi;
pub mod wdag;

pub use error::HmmError;
pub use model::Hmm;
pub use utils::{lnsum, LOG_ZERO};
pub use wdag::{BestPath, Edge, EdgeLabel, Wdag};
