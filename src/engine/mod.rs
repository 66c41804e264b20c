pub mod aggregator;
pub mod export;
pub mod history;
pub mod normalizer;
pub mod orchestrator;
pub mod types;

pub use history::HistoryStore;
pub use orchestrator::Orchestrator;
