//! Safe-to-Load control sessions: drafting from the catalog, checklist
//! updates, signatures and status derivation.

mod draft;
mod edit;
mod manager;
mod status;

pub use draft::draft_control;
pub(crate) use edit::{apply_item_update, finalize_snapshot, set_observations, sign_snapshot};
pub use manager::{ControlManager, FinalizeOutcome};
pub use status::derive_status;
