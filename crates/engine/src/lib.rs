pub mod broker;
pub mod coordinator;
pub mod lifecycle;
pub mod orchestrator;
pub mod persist;

pub use broker::BrokerClient;
pub use coordinator::ExecutionCoordinator;
pub use lifecycle::{Engine, EngineHandle};
pub use orchestrator::PortfolioOrchestrator;
pub use persist::{enqueue, PersistEvent, PersistenceWorker};
