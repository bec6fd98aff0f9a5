pub mod decide;
pub mod dispatch;
pub mod error;
pub mod graph;
pub mod registry;
pub mod service;
pub mod sink;
pub mod titles;
pub mod tools;

pub use decide::{Decision, DecisionStep};
pub use dispatch::Dispatcher;
pub use error::EngineError;
pub use graph::{ChatGraph, Node, TurnOutcome};
pub use registry::{RegistryError, ToolRegistry};
pub use service::{ChatService, SessionSummary};
pub use sink::EventSink;
pub use titles::TitleGenerator;
pub use tools::{create_default_registry, ToolsConfig};
