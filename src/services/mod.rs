pub mod adapters;
pub mod analyzer;
pub mod clock;
pub mod llm;
pub mod orchestrator;
pub mod output;
pub mod poller;
pub mod queue;
pub mod references;
pub mod storage;
pub mod store;
pub mod validation;
