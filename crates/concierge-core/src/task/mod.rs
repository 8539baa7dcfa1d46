pub mod executor;
pub mod router;
pub mod types;

pub use executor::{Capability, CapabilityRegistry, TaskExecutor, UNSUPPORTED_TASK};
pub use router::{RoutingRule, TaskRouter, GENERAL_TASK};
pub use types::{TaskOutcome, TaskRequest};
