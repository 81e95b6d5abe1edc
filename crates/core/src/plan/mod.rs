#![forbid(unsafe_code)]

mod builder;
mod delta;
mod ops;

pub use builder::*;
pub use delta::*;
pub use ops::*;
