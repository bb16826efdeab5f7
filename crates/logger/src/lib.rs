mod tracing;

pub use self::tracing::{init, init_tracing};
