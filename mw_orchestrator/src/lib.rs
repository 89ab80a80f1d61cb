pub mod burst;
pub mod orchestrator;

pub use burst::BurstEntry;
pub use burst::BurstQueue;
pub use burst::BurstSink;
pub use orchestrator::Orchestrator;
pub use orchestrator::OrchestratorConfig;
