pub mod control;
pub mod non_conformite;
pub mod stats;

pub use control::{
    ControlItem, ControlSession, ControlStatus, ControlWithItems, ImportOutcome, ItemUpdate, Location,
    NewControl, Signature, SignatureRole,
};
pub use non_conformite::{
    NcDetailsUpdate, NcFilter, NcHistoryEntry, NcStatus, NcType, NewNonConformite,
    NonConformite,
};
pub use stats::{DateRange, HseqStats};
