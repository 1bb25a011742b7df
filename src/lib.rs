pub mod budget;
pub mod cancel;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod error;
pub mod harness;
pub mod lifecycle;
pub mod ports;

pub use budget::{allocate_round, ResponseStats, TurnAllocation};
pub use cancel::{CancelReason, CancellationContext};
pub use config::{load_config, OrchestratorConfig};
pub use dispatch::{DispatchService, RespondRequest};
pub use domain::*;
pub use engine::{TurnEngine, TurnOutput, TurnRequest, TurnStart};
pub use error::{Result, SwarmError};
pub use lifecycle::{SagaStatus, SwarmLifecycle};
