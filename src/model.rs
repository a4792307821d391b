//! Shared data model (spec §3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A tool published by a knowledge server's `tools/list` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// How to spawn one knowledge-server subprocess.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
}

/// A tagged enum of opaque hit records from the fleet's search tools,
/// exposing only the facade spec §9 calls for: `title`, `url`, identity key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source")]
pub enum Hit {
    Nice {
        reference: String,
        title: String,
        url: Option<String>,
        #[serde(flatten)]
        extra: serde_json::Map<String, serde_json::Value>,
    },
    Cks {
        title: String,
        url: Option<String>,
        #[serde(flatten)]
        extra: serde_json::Map<String, serde_json::Value>,
    },
    Bnf {
        title: String,
        url: String,
        #[serde(flatten)]
        extra: serde_json::Map<String, serde_json::Value>,
    },
    Fogsi {
        title: String,
        url: String,
        #[serde(flatten)]
        extra: serde_json::Map<String, serde_json::Value>,
    },
    PubMed {
        title: String,
        url: Option<String>,
        #[serde(flatten)]
        extra: serde_json::Map<String, serde_json::Value>,
    },
}

impl Hit {
    pub fn title(&self) -> &str {
        match self {
            Hit::Nice { title, .. }
            | Hit::Cks { title, .. }
            | Hit::Bnf { title, .. }
            | Hit::Fogsi { title, .. }
            | Hit::PubMed { title, .. } => title,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Hit::Nice { url, .. } | Hit::Cks { url, .. } | Hit::PubMed { url, .. } => {
                url.as_deref()
            }
            Hit::Bnf { url, .. } | Hit::Fogsi { url, .. } => Some(url.as_str()),
        }
    }

    /// Per-bucket identity key used for dedup (spec §4.5): title lowercased
    /// for most sources, URL for BNF/FOGSI, reference for NICE.
    pub fn identity_key(&self) -> String {
        match self {
            Hit::Nice { reference, .. } => reference.to_lowercase(),
            Hit::Bnf { url, .. } | Hit::Fogsi { url, .. } => url.to_lowercase(),
            Hit::Cks { title, .. } | Hit::PubMed { title, .. } => title.to_lowercase(),
        }
    }
}

/// A tag from a closed enum of search-result resource kinds (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Nice,
    Cks,
    BnfSummary,
    Fogsi,
    PubMed,
}

/// Which bucket in `SearchResultSet` a `SearchConfig` populates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKey {
    Guidelines,
    CksTopics,
    BnfSummaries,
    PubmedArticles,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Kept for data-model fidelity with spec §3's `SearchConfig`; not
    /// read anywhere, since dispatch runs off `result_key`/`tool_name`.
    pub resource_type: ResourceType,
    pub tool_name: String,
    /// Template where `{scenario}` is interpolated into tool arguments.
    pub tool_params: serde_json::Value,
    pub result_key: ResultKey,
    pub deduplicate: bool,
}

#[derive(Debug, Clone)]
pub struct RegionConfig {
    pub region_name: String,
    pub server_names: Vec<String>,
    pub searches: Vec<SearchConfig>,
    pub pubmed_fallback: bool,
    pub pubmed_unconditional: bool,
    pub min_results_threshold: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResultSet {
    pub guidelines: Vec<Hit>,
    pub cks_topics: Vec<Hit>,
    pub bnf_summaries: Vec<Hit>,
    pub pubmed_articles: Vec<Hit>,
}

impl SearchResultSet {
    pub fn total_guidelines(&self) -> usize {
        self.guidelines.len() + self.cks_topics.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DrugDossier {
    pub url: String,
    #[serde(default = "not_available")]
    pub indications: String,
    #[serde(default = "not_available")]
    pub dosage: String,
    #[serde(default = "not_available")]
    pub contraindications: String,
    #[serde(default = "not_available")]
    pub cautions: String,
    #[serde(default = "not_available")]
    pub side_effects: String,
    #[serde(default = "not_available")]
    pub interactions: String,
}

fn not_available() -> String {
    "Not available".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Treatment {
    pub label: String,
    pub drug_names: Vec<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub bnf_info: HashMap<String, DrugDossier>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnosis {
    pub name: String,
    pub confidence: Confidence,
    pub treatments: Vec<Treatment>,
}

pub type DiagnosisTree = Vec<Diagnosis>;

#[derive(Debug, Clone, Serialize)]
pub struct ClinicalReport {
    pub diagnoses: DiagnosisTree,
    pub summary: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthRow {
    pub server: String,
    pub status: String,
    pub latency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affects: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: usize,
    pub total: usize,
    pub rows: Vec<HealthRow>,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.healthy == self.total
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let show_affects = self.rows.iter().any(|row| row.affects.is_some());
        out.push_str("# Knowledge Server Health Check\n\n");
        if show_affects {
            out.push_str("| Server | Status | Latency | Affects |\n");
            out.push_str("|--------|--------|---------|---------|\n");
            for row in &self.rows {
                let affects = row.affects.as_deref().unwrap_or("-");
                out.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    row.server, row.status, row.latency, affects
                ));
            }
        } else {
            out.push_str("| Server | Status | Latency |\n");
            out.push_str("|--------|--------|---------|\n");
            for row in &self.rows {
                out.push_str(&format!(
                    "| {} | {} | {} |\n",
                    row.server, row.status, row.latency
                ));
            }
        }
        out.push_str(&format!(
            "\nStatus: {}/{} servers healthy\n",
            self.healthy, self.total
        ));
        out
    }
}
