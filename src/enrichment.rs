//! Drug Enrichment (C8): deterministic, no-LLM drug dossier lookup plus
//! the allergy/contraindication cross-check.

use std::collections::{HashMap, HashSet};

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::model::{DiagnosisTree, DrugDossier};
use crate::router::ToolRouter;

/// Collects the deduplicated (case-insensitive), generic-name drug set
/// mined from the LLM's diagnosis tree.
pub fn drug_names_in(tree: &DiagnosisTree) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for diagnosis in tree {
        for treatment in &diagnosis.treatments {
            for name in &treatment.drug_names {
                let key = name.to_lowercase();
                if seen.insert(key) {
                    names.push(name.clone());
                }
            }
        }
    }
    names
}

async fn lookup_one(
    router: &ToolRouter,
    drug_name: &str,
    cancel: &CancellationToken,
) -> Option<DrugDossier> {
    if !router.has_tool("search_bnf_drug") || !router.has_tool("get_bnf_drug_info") {
        return None;
    }

    let search = router
        .call_cancellable("search_bnf_drug", serde_json::json!({ "name": drug_name }), cancel)
        .await
        .ok()?;
    let hits: Vec<serde_json::Value> = serde_json::from_str(&search.text()).ok()?;
    let url = hits.first()?.get("url")?.as_str()?.to_string();

    let detail = router
        .call_cancellable("get_bnf_drug_info", serde_json::json!({ "url": url }), cancel)
        .await
        .ok()?;
    let mut dossier: DrugDossier = serde_json::from_str(&detail.text()).unwrap_or_default();
    dossier.url = url;
    Some(dossier)
}

/// Runs the enrichment pipeline: resolves each drug name's dossier
/// concurrently, then attaches into every treatment where that name
/// appears (spec §4.8). A missing drug contributes no dossier — the
/// operation never fails for a single miss.
pub async fn run(
    tree: &mut DiagnosisTree,
    router: &ToolRouter,
    cancel: &CancellationToken,
) -> Vec<String> {
    let mut warnings = Vec::new();
    let names = drug_names_in(tree);

    let outcomes = join_all(
        names
            .iter()
            .map(|name| async move { (name.clone(), lookup_one(router, name, cancel).await) }),
    )
    .await;

    let mut dossiers: HashMap<String, DrugDossier> = HashMap::new();
    for (name, dossier) in outcomes {
        match dossier {
            Some(d) => {
                dossiers.insert(name, d);
            }
            None => {
                warn!(drug = %name, "no dossier resolved");
                warnings.push(format!("no dossier found for '{name}'"));
            }
        }
    }

    for diagnosis in tree.iter_mut() {
        for treatment in diagnosis.treatments.iter_mut() {
            for drug_name in &treatment.drug_names {
                if let Some(dossier) = dossiers.get(drug_name) {
                    treatment.bnf_info.insert(drug_name.clone(), dossier.clone());
                }
            }
        }
    }

    warnings
}

const PENICILLIN_FAMILY: &[&str] = &["penicillin", "amoxicillin", "ampicillin", "flucloxacillin"];
const NSAID_FAMILY: &[&str] = &["ibuprofen", "naproxen", "diclofenac", "aspirin"];

/// Deterministic allergy/contraindication cross-check, grounded in the
/// original's `_generate_summary` substring check (SPEC_FULL.md §4).
pub fn allergy_warnings(tree: &DiagnosisTree, allergies: Option<&str>) -> Vec<String> {
    let Some(allergies) = allergies else {
        return Vec::new();
    };
    let allergies_lower = allergies.to_lowercase();
    let mut warnings = Vec::new();

    let flags_penicillin = allergies_lower.contains("penicillin");
    let flags_nsaid = allergies_lower.contains("nsaid") || allergies_lower.contains("ibuprofen");

    for diagnosis in tree {
        for treatment in &diagnosis.treatments {
            for drug_name in &treatment.drug_names {
                let drug_lower = drug_name.to_lowercase();
                if flags_penicillin && PENICILLIN_FAMILY.iter().any(|d| drug_lower.contains(d)) {
                    warnings.push(format!(
                        "{drug_name} is in the penicillin family; patient reports a penicillin allergy"
                    ));
                }
                if flags_nsaid && NSAID_FAMILY.iter().any(|d| drug_lower.contains(d)) {
                    warnings.push(format!(
                        "{drug_name} is an NSAID; patient reports an NSAID allergy"
                    ));
                }
                if let Some(dossier) = treatment.bnf_info.get(drug_name) {
                    if dossier
                        .contraindications
                        .to_lowercase()
                        .contains(&allergies_lower)
                    {
                        warnings.push(format!(
                            "{drug_name}'s contraindications mention the patient's reported allergy"
                        ));
                    }
                }
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Confidence, Diagnosis, Treatment};

    fn tree_with_drug(name: &str) -> DiagnosisTree {
        vec![Diagnosis {
            name: "Test".to_string(),
            confidence: Confidence::High,
            treatments: vec![Treatment {
                label: "first-line".to_string(),
                drug_names: vec![name.to_string()],
                notes: String::new(),
                bnf_info: HashMap::new(),
            }],
        }]
    }

    #[test]
    fn flags_penicillin_family_against_allergy() {
        let tree = tree_with_drug("Amoxicillin");
        let warnings = allergy_warnings(&tree, Some("penicillin"));
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn no_allergies_yields_no_warnings() {
        let tree = tree_with_drug("Amoxicillin");
        assert!(allergy_warnings(&tree, None).is_empty());
    }

    #[test]
    fn drug_names_deduplicated_case_insensitively() {
        let mut tree = tree_with_drug("Dexamethasone");
        tree[0].treatments.push(Treatment {
            label: "second".to_string(),
            drug_names: vec!["dexamethasone".to_string()],
            notes: String::new(),
            bnf_info: HashMap::new(),
        });
        assert_eq!(drug_names_in(&tree), vec!["Dexamethasone".to_string()]);
    }
}
