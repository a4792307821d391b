//! Region Selector (C4): pure function mapping an ISO-3166 alpha-2 code to
//! an ordered list of server names, falling back to `INTERNATIONAL`.

use crate::model::{RegionConfig, ResourceType, ResultKey, SearchConfig};

/// `min_results_threshold` resolved per DESIGN.md's Open Question
/// decision: the legacy path's hard-coded constant (2) is authoritative
/// for every built-in profile.
const DEFAULT_MIN_RESULTS_THRESHOLD: usize = 2;

fn scenario_params(key: &str) -> serde_json::Value {
    serde_json::json!({ key: "{scenario}" })
}

fn search(resource_type: ResourceType, tool_name: &str, result_key: ResultKey) -> SearchConfig {
    SearchConfig {
        resource_type,
        tool_name: tool_name.to_string(),
        tool_params: scenario_params("query"),
        result_key,
        deduplicate: true,
    }
}

/// Maps a normalized ISO country code to its region profile.
pub fn select(country_code: Option<&str>) -> RegionConfig {
    let normalized = country_code
        .map(str::trim)
        .map(str::to_uppercase)
        .filter(|s| !s.is_empty());

    match normalized.as_deref() {
        Some("GB") => RegionConfig {
            region_name: "GB".to_string(),
            server_names: vec![
                "NICE".to_string(),
                "BNF".to_string(),
                "CKS".to_string(),
                "PATIENT_INFO".to_string(),
            ],
            searches: vec![
                search(ResourceType::Nice, "search_nice_guidelines", ResultKey::Guidelines),
                search(ResourceType::Cks, "search_cks_topics", ResultKey::CksTopics),
            ],
            pubmed_fallback: true,
            pubmed_unconditional: false,
            min_results_threshold: DEFAULT_MIN_RESULTS_THRESHOLD,
        },
        Some("IN") => RegionConfig {
            region_name: "IN".to_string(),
            server_names: vec![
                "FOGSI".to_string(),
                "ICMR".to_string(),
                "STG".to_string(),
                "RSSDI".to_string(),
                "CSI".to_string(),
                "NCG".to_string(),
                "IAP".to_string(),
                "PATIENT_INFO".to_string(),
            ],
            searches: vec![
                search(ResourceType::Fogsi, "search_fogsi_guidelines", ResultKey::Guidelines),
                search(ResourceType::Nice, "search_icmr_guidelines", ResultKey::Guidelines),
            ],
            pubmed_fallback: true,
            // India always searches PubMed in addition to FOGSI (spec SPEC_FULL §4).
            pubmed_unconditional: true,
            min_results_threshold: DEFAULT_MIN_RESULTS_THRESHOLD,
        },
        Some("US") => RegionConfig {
            region_name: "US".to_string(),
            server_names: vec![
                "USPSTF".to_string(),
                "CDC".to_string(),
                "IDSA".to_string(),
                "ADA".to_string(),
                "AHA_ACC".to_string(),
                "AAP".to_string(),
                "PATIENT_INFO".to_string(),
            ],
            searches: vec![search(
                ResourceType::Nice,
                "search_uspstf_guidelines",
                ResultKey::Guidelines,
            )],
            pubmed_fallback: true,
            pubmed_unconditional: false,
            min_results_threshold: DEFAULT_MIN_RESULTS_THRESHOLD,
        },
        Some("AU") => RegionConfig {
            region_name: "AU".to_string(),
            server_names: vec!["NHMRC".to_string(), "PATIENT_INFO".to_string()],
            searches: vec![search(
                ResourceType::Nice,
                "search_nhmrc_guidelines",
                ResultKey::Guidelines,
            )],
            pubmed_fallback: true,
            pubmed_unconditional: false,
            min_results_threshold: DEFAULT_MIN_RESULTS_THRESHOLD,
        },
        _ => RegionConfig {
            region_name: "INTERNATIONAL".to_string(),
            server_names: vec!["PUBMED".to_string(), "PATIENT_INFO".to_string()],
            searches: vec![],
            pubmed_fallback: false,
            pubmed_unconditional: true,
            min_results_threshold: DEFAULT_MIN_RESULTS_THRESHOLD,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::select;

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(select(Some("GB")).region_name, select(Some("gb")).region_name);
        assert_eq!(select(Some("GB")).region_name, select(Some(" GB ")).region_name);
    }

    #[test]
    fn unknown_codes_fall_back_to_international() {
        let region = select(Some("FR"));
        assert_eq!(region.region_name, "INTERNATIONAL");
        assert_eq!(region.server_names, vec!["PUBMED", "PATIENT_INFO"]);
    }

    #[test]
    fn missing_code_falls_back_to_international() {
        assert_eq!(select(None).region_name, "INTERNATIONAL");
    }

    #[test]
    fn india_runs_pubmed_unconditionally() {
        assert!(select(Some("IN")).pubmed_unconditional);
    }
}
