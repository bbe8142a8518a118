pub mod agent;
pub mod structured;
pub mod tooling;
pub mod transcript;
