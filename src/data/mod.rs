//! Bricked volume data, the dataset handle and the served file catalog

pub mod brick;
pub mod catalog;
pub mod transform;
pub mod volume;

pub use brick::*;
pub use catalog::*;
pub use transform::*;
pub use volume::*;
