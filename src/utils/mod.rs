pub mod logging;
mod timeout;

pub use logging::init_logging;
pub(crate) use timeout::with_timeout;
