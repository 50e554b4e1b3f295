pub mod evaluation;
pub mod job;
pub mod store;
pub mod training;
