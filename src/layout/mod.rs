pub mod ops;
pub mod resolver;
pub mod wrap;
