//! Non-conformity tracking: escalation from failed checkpoints, the
//! `ouverte -> en_cours -> fermee` lifecycle and its audit trail.

mod escalation;
mod lifecycle;
mod tracker;

pub use escalation::{auto_create_from_item, EscalationPolicy};
pub use lifecycle::{check_transition, next_status};
pub use tracker::NcTracker;
