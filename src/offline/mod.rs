//! Controls captured without connectivity and their replay into the store.

mod queue;
mod sync;

pub use queue::{PendingControl, PendingQueue, SyncStatus};
pub use sync::{ControlSink, SyncEngine, SyncReport};
