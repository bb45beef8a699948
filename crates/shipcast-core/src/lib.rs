pub mod score;
pub mod seed;
pub mod types;

pub use types::*;
