//! Secret records and their tags

mod types;

pub use types::*;
