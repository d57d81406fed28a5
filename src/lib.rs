pub mod broadcast;
pub mod config;
pub mod error;
pub mod health;
pub mod history;
pub mod metrics;
pub mod middleware;
pub mod persistence;
pub mod provider;
pub mod queue;
pub mod room;
pub mod session;
pub mod transport;

pub use config::Config;
pub use error::{AppError, Result};

use std::sync::Arc;

use health::StartTime;
use metrics::Metrics;
use persistence::Persistence;
use provider::ProviderGateway;
use room::reconciliation::ReconciliationLoop;
use room::SharedRoom;

/// Shared across every request and transport handler. The room itself
/// lives behind its own lock inside `SharedRoom`; everything else here
/// is either immutable after startup or internally synchronised.
pub struct AppState {
    pub config: Arc<Config>,
    pub room: SharedRoom,
    pub provider: ProviderGateway,
    pub persistence: Arc<Persistence>,
    pub reconciliation: Arc<ReconciliationLoop>,
    pub metrics: Arc<Metrics>,
    pub start_time: StartTime,
}
