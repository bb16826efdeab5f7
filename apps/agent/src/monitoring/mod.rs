/// Monitoring engine - probes targets and keeps the probe loops in step with
/// the controller's target list
pub mod checker;
pub mod executor;
pub mod interval;
pub mod scheduler;

pub use executor::MonitoringExecutor;
pub use scheduler::MonitoringScheduler;
