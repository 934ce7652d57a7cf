pub mod options;
pub mod orchestrator;
