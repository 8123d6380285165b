// Taskmesh
//
// A task routing and agent supervision mesh: pluggable agents process typed
// tasks, a router assigns work by capability and selection strategy with
// bounded retries, and a supervisor keeps the pool healthy through periodic
// probes and restarts.

pub mod agents;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod network;
pub mod router;
pub mod scheduler;
pub mod tasks;
pub mod testing;

// Re-export commonly used types
pub use agents::{Agent, AgentError, AgentHealth, AgentInfo, AgentMetrics, AgentStatus};
pub use config::{ConfigError, HealthConfig, NetworkConfig, RouterConfig, SchedulerConfig};
pub use error::{MeshError, MeshResult};
pub use events::NetworkEvent;
pub use metrics::MetricsSnapshot;
pub use network::{HealthReport, HealthStatus, Network};
pub use router::{
    BackoffStrategy, RetryPolicy, RouteOutcome, Router, RouterError, SelectionStrategy,
};
pub use scheduler::Scheduler;
pub use tasks::{Task, TaskStatus};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
