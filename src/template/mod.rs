pub mod job;
pub mod model;
