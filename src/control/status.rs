use crate::{
    db::models::{ControlItem, ControlStatus},
    error::{HseqError, HseqResult},
};

/// Final status of a control from its checklist.
///
/// Any unevaluated item rejects the derivation. Otherwise a failed critical
/// item means `Refuse`, failures confined to non-critical items mean
/// `NonConforme`, and a clean checklist is `Conforme`.
pub fn derive_status(control_id: &str, items: &[ControlItem]) -> HseqResult<ControlStatus> {
    let unevaluated = items.iter().filter(|i| i.is_conforme.is_none()).count();
    if unevaluated > 0 {
        return Err(HseqError::IncompleteInspection {
            control_id: control_id.to_string(),
            unevaluated,
        });
    }

    let failed: Vec<&ControlItem> = items.iter().filter(|i| i.is_failed()).collect();
    let status = if failed.is_empty() {
        ControlStatus::Conforme
    } else if failed.iter().any(|i| i.is_critical) {
        ControlStatus::Refuse
    } else {
        ControlStatus::NonConforme
    };
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(code: &str, is_critical: bool, is_conforme: Option<bool>) -> ControlItem {
        ControlItem {
            id: format!("item-{code}"),
            control_id: "ctl".into(),
            category: "cat".into(),
            checkpoint_code: code.into(),
            label: code.into(),
            is_critical,
            is_conforme,
            comment: None,
            photos: Vec::new(),
            position: 0,
        }
    }

    #[test]
    fn all_conforme_is_conforme() {
        let items = vec![item("a", true, Some(true)), item("b", false, Some(true))];
        assert_eq!(derive_status("ctl", &items).unwrap(), ControlStatus::Conforme);
    }

    #[test]
    fn non_critical_failure_is_non_conforme() {
        let items = vec![
            item("a", true, Some(true)),
            item("b", false, Some(false)),
            item("c", false, Some(false)),
        ];
        assert_eq!(
            derive_status("ctl", &items).unwrap(),
            ControlStatus::NonConforme
        );
    }

    #[test]
    fn any_critical_failure_is_refuse() {
        let items = vec![
            item("a", false, Some(false)),
            item("b", true, Some(false)),
            item("c", false, Some(false)),
            item("d", true, Some(true)),
        ];
        assert_eq!(derive_status("ctl", &items).unwrap(), ControlStatus::Refuse);

        let only_critical = vec![item("a", true, Some(false)), item("b", false, Some(true))];
        assert_eq!(
            derive_status("ctl", &only_critical).unwrap(),
            ControlStatus::Refuse
        );
    }

    #[test]
    fn unevaluated_item_is_incomplete() {
        let items = vec![item("a", true, Some(false)), item("b", false, None)];
        match derive_status("ctl", &items) {
            Err(HseqError::IncompleteInspection { unevaluated, .. }) => assert_eq!(unevaluated, 1),
            other => panic!("unexpected {other:?}"),
        }
    }
}
