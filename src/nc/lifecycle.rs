use crate::{
    db::models::NcStatus,
    error::{HseqError, HseqResult},
};

/// The only step allowed from `status`, if any. Closing always goes through
/// `EnCours`, so an issue cannot be closed without being worked on.
pub fn next_status(status: NcStatus) -> Option<NcStatus> {
    match status {
        NcStatus::Ouverte => Some(NcStatus::EnCours),
        NcStatus::EnCours => Some(NcStatus::Fermee),
        NcStatus::Fermee => None,
    }
}

pub fn check_transition(from: NcStatus, to: NcStatus) -> HseqResult<()> {
    if next_status(from) == Some(to) {
        Ok(())
    } else {
        Err(HseqError::InvalidTransition {
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        })
    }
}
