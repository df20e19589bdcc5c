//! flowlite-core — flow-node execution and retry engine.
//!
//! The crate drives one flow-node instance through its lifecycle
//! (initializing → ready → executing → completed / failed), schedules
//! asynchronous work units through named, persisted job descriptors and
//! triggers, and implements the failed-work recovery protocols: flow-node
//! retry and failed-job replay.
//!
//! Persistence, connectors and the transaction boundary are external
//! collaborators consumed through traits ([`store::EngineStore`],
//! [`connector::ConnectorExecutor`], [`store::TransactionService`]);
//! in-memory implementations ship for tests and embedded use.

pub mod connector;
pub mod errors;
pub mod events;
pub mod executor;
pub mod retrier;
pub mod scheduler;
pub mod states;
pub mod store;
pub mod store_memory;
pub mod types;

pub use connector::{ConnectorExecutor, ConnectorResetStrategy, MemoryConnectorService};
pub use errors::{EngineError, Result};
pub use events::RuntimeEvent;
pub use executor::{ContainerRegistry, FlowNodeExecutor};
pub use retrier::FlowNodeRetrier;
pub use scheduler::{JobHandler, JobRegistry, SchedulerConfig, SchedulerService};
pub use states::{ExecOutcome, FlowNodeState, StateRegistry};
pub use store::{EngineStore, TransactionService, TxnHandle};
pub use store_memory::{MemoryStore, NoopTransactionService};
pub use types::*;
