pub mod agent;
pub mod registry;
pub mod router;

pub use registry::{HealthCheckSpec, HealthStatus, InstanceRecord, Registry};
pub use router::DynamicRouter;
