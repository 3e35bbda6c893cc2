use super::{Category, Checkpoint};

fn checkpoint(code: &str, label: &str, is_critical: bool) -> Checkpoint {
    Checkpoint {
        code: code.into(),
        label: label.into(),
        is_critical,
    }
}

fn category(code: &str, label: &str, checkpoints: Vec<Checkpoint>) -> Category {
    Category {
        code: code.into(),
        label: label.into(),
        checkpoints,
    }
}

/// Default Safe-to-Load checklist for tanker and general cargo trucks.
pub(super) fn categories() -> Vec<Category> {
    vec![
        category(
            "documents",
            "Documents de bord",
            vec![
                checkpoint("doc_carte_grise", "Carte grise présente", false),
                checkpoint("doc_assurance", "Attestation d'assurance valide", true),
                checkpoint("doc_visite_technique", "Visite technique valide", true),
                checkpoint("doc_permis", "Permis du conducteur valide", true),
            ],
        ),
        category(
            "pneumatiques",
            "Pneumatiques",
            vec![
                checkpoint("pneu_pression", "Pression des pneus", false),
                checkpoint("pneu_usure", "Usure de la bande de roulement", true),
                checkpoint("pneu_secours", "Roue de secours", false),
            ],
        ),
        category(
            "freinage",
            "Freinage",
            vec![
                checkpoint("frein_service", "Frein de service", true),
                checkpoint("frein_parking", "Frein de stationnement", true),
                checkpoint("frein_fuites_air", "Absence de fuite d'air", false),
            ],
        ),
        category(
            "eclairage",
            "Éclairage et signalisation",
            vec![
                checkpoint("ecl_feux_avant", "Feux avant", false),
                checkpoint("ecl_feux_stop", "Feux stop", false),
                checkpoint("ecl_clignotants", "Clignotants", false),
                checkpoint("ecl_gyrophare", "Gyrophare", false),
            ],
        ),
        category(
            "securite",
            "Équipements de sécurité",
            vec![
                checkpoint("sec_extincteurs", "Extincteurs chargés et scellés", true),
                checkpoint("sec_triangle", "Triangle de présignalisation", false),
                checkpoint("sec_trousse", "Trousse de premiers secours", false),
                checkpoint("sec_epi", "EPI du conducteur", false),
                checkpoint("sec_ceinture", "Ceinture de sécurité", true),
            ],
        ),
        category(
            "chargement",
            "Citerne et chargement",
            vec![
                checkpoint("chg_etancheite", "Étanchéité de la citerne", true),
                checkpoint("chg_vannes", "Vannes et clapets fermés", true),
                checkpoint("chg_mise_terre", "Câble de mise à la terre", true),
                checkpoint("chg_arrimage", "Arrimage du chargement", false),
            ],
        ),
    ]
}
