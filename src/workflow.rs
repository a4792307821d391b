//! Workflow Orchestrator (C9) and Guideline Analysis Sub-pipeline (C10):
//! the two alternative top-level entry points, both satisfying the same
//! external contract (spec §4.9/§4.10).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Config;
use crate::enrichment;
use crate::llm::LlmClient;
use crate::model::{ClinicalReport, DiagnosisTree, SpawnSpec};
use crate::region;
use crate::registry::SessionRegistry;
use crate::router::ToolRouter;
use crate::{agent, detail, search};

fn spawn_specs(servers_dir: &std::path::Path, names: &[String]) -> Vec<SpawnSpec> {
    names
        .iter()
        .map(|name| SpawnSpec {
            name: name.clone(),
            command: servers_dir
                .join(name.to_lowercase())
                .to_string_lossy()
                .into_owned(),
            args: vec![],
        })
        .collect()
}

fn render_summary(tree: &DiagnosisTree) -> String {
    if tree.is_empty() {
        return "No diagnoses could be determined for this scenario.".to_string();
    }
    let mut out = String::new();
    for diagnosis in tree {
        out.push_str(&format!(
            "{} (confidence: {:?})\n",
            diagnosis.name, diagnosis.confidence
        ));
        for treatment in &diagnosis.treatments {
            out.push_str(&format!("  - {}: {}\n", treatment.label, treatment.drug_names.join(", ")));
        }
    }
    out
}

fn deadline_exceeded_report() -> ClinicalReport {
    ClinicalReport {
        diagnoses: Vec::new(),
        summary: "Workflow deadline exceeded.".to_string(),
        warnings: vec!["ErrDeadlineExceeded".to_string()],
    }
}

/// §C9: the streamlined tool-use workflow. The sole entry point of the
/// core for the default (non-legacy) path.
///
/// The whole orchestration — session open, the LLM tool-use loop, and
/// enrichment — runs under one deadline (spec §5, `workflow_timeout_ms`).
/// On expiry the shared token is cancelled so every in-flight router call
/// and the LLM call abort, then sessions are still closed before
/// returning (spec §8 property 7).
pub async fn clinical_decision_support(
    scenario: &str,
    country_code: Option<&str>,
    allergies: Option<&str>,
    config: &Config,
    llm: &dyn LlmClient,
) -> ClinicalReport {
    let cancel = CancellationToken::new();
    let region_config = region::select(country_code);
    let specs = spawn_specs(&config.servers_dir, &region_config.server_names);
    let registry = Arc::new(SessionRegistry::new(Duration::from_millis(config.rpc_timeout_ms)));

    let deadline = Duration::from_millis(config.workflow_timeout_ms);
    let body = run_clinical_decision_support(
        scenario,
        allergies,
        config,
        llm,
        registry.clone(),
        &specs,
        &cancel,
    );

    let report = match tokio::time::timeout(deadline, body).await {
        Ok(report) => report,
        Err(_) => {
            cancel.cancel();
            deadline_exceeded_report()
        }
    };

    registry.close_all().await;
    report
}

async fn run_clinical_decision_support(
    scenario: &str,
    allergies: Option<&str>,
    config: &Config,
    llm: &dyn LlmClient,
    registry: Arc<SessionRegistry>,
    specs: &[SpawnSpec],
    cancel: &CancellationToken,
) -> ClinicalReport {
    let mut warnings = Vec::new();

    let open_report = registry.open(specs).await;
    for (server, err) in &open_report.failed {
        warnings.push(format!("failed to open '{server}': {err}"));
    }

    let router = ToolRouter::new(registry.clone(), open_report.descriptors);

    let mut tree = if config.llm_api_key.is_none() {
        warnings.push("llm_api_key absent; skipping tool-use loop".to_string());
        Vec::new()
    } else {
        let outcome = agent::run(scenario, &router, llm, config.max_tool_iterations, cancel).await;
        warnings.extend(outcome.warnings);
        outcome.tree
    };

    let enrichment_warnings = enrichment::run(&mut tree, &router, cancel).await;
    warnings.extend(enrichment_warnings);
    warnings.extend(enrichment::allergy_warnings(&tree, allergies));

    ClinicalReport {
        summary: render_summary(&tree),
        diagnoses: tree,
        warnings,
    }
}

/// §C10: the legacy extract-and-enrich path. Invokes §C5/§C6, then hands
/// the guideline corpus to the LLM for structured extraction (not tool
/// use). Contract is identical to §C9 from the caller's perspective, and
/// shares its whole-workflow deadline/cancellation treatment (spec §5).
#[allow(clippy::too_many_arguments)]
pub async fn guideline_analysis(
    scenario: &str,
    country_code: Option<&str>,
    patient_id: Option<&str>,
    allergies: Option<&str>,
    config: &Config,
    llm: &dyn LlmClient,
) -> ClinicalReport {
    let cancel = CancellationToken::new();
    let region_config = region::select(country_code);
    let specs = spawn_specs(&config.servers_dir, &region_config.server_names);
    let registry = Arc::new(SessionRegistry::new(Duration::from_millis(config.rpc_timeout_ms)));

    let deadline = Duration::from_millis(config.workflow_timeout_ms);
    let body = run_guideline_analysis(
        scenario,
        patient_id,
        allergies,
        config,
        llm,
        &region_config,
        registry.clone(),
        &specs,
        &cancel,
    );

    let report = match tokio::time::timeout(deadline, body).await {
        Ok(report) => report,
        Err(_) => {
            cancel.cancel();
            deadline_exceeded_report()
        }
    };

    registry.close_all().await;
    report
}

#[allow(clippy::too_many_arguments)]
async fn run_guideline_analysis(
    scenario: &str,
    patient_id: Option<&str>,
    allergies: Option<&str>,
    config: &Config,
    llm: &dyn LlmClient,
    region_config: &crate::model::RegionConfig,
    registry: Arc<SessionRegistry>,
    specs: &[SpawnSpec],
    cancel: &CancellationToken,
) -> ClinicalReport {
    let mut warnings = Vec::new();

    let open_report = registry.open(specs).await;
    for (server, err) in &open_report.failed {
        warnings.push(format!("failed to open '{server}': {err}"));
    }
    let router = ToolRouter::new(registry.clone(), open_report.descriptors);

    // Optional patient/season lookups; superseded in §C9, kept here for the
    // legacy path only (SPEC_FULL.md §4). Missing optional tools are
    // demoted to a warning, not a hard failure.
    let mut context_note = String::new();
    if let Some(patient_id) = patient_id {
        if router.has_tool("get_patient_info") {
            match router
                .call_cancellable(
                    "get_patient_info",
                    serde_json::json!({ "patient_id": patient_id }),
                    cancel,
                )
                .await
            {
                Ok(result) => context_note.push_str(&result.text()),
                Err(err) => warnings.push(format!("get_patient_info failed: {err}")),
            }
        } else {
            warnings.push("get_patient_info tool unavailable (optional)".to_string());
        }
    }
    if router.has_tool("get_current_season") {
        match router
            .call_cancellable("get_current_season", serde_json::json!({}), cancel)
            .await
        {
            Ok(result) => context_note.push_str(&result.text()),
            Err(err) => warnings.push(format!("get_current_season failed: {err}")),
        }
    } else {
        warnings.push("get_current_season tool unavailable (optional)".to_string());
    }

    let (results, search_warnings) = search::run(
        region_config,
        scenario,
        &router,
        cancel,
        config.top_k_guidelines,
        config.top_k_cks,
        config.top_k_bnf,
    )
    .await;
    warnings.extend(search_warnings);

    let (details, detail_warnings) = detail::fetch(
        &router,
        cancel,
        &results.guidelines,
        &results.cks_topics,
        &results.bnf_summaries,
    )
    .await;
    warnings.extend(detail_warnings);

    let mut tree = if config.llm_api_key.is_none() {
        warnings.push("llm_api_key absent; skipping extraction".to_string());
        Vec::new()
    } else {
        match extract_structured(scenario, &details, &context_note, llm, cancel).await {
            Ok(tree) => tree,
            Err(err) => {
                warn!(%err, "structured extraction failed");
                warnings.push(format!("structured extraction failed: {err}"));
                Vec::new()
            }
        }
    };

    let enrichment_warnings = enrichment::run(&mut tree, &router, cancel).await;
    warnings.extend(enrichment_warnings);
    warnings.extend(enrichment::allergy_warnings(&tree, allergies));

    ClinicalReport {
        summary: render_summary(&tree),
        diagnoses: tree,
        warnings,
    }
}

async fn extract_structured(
    scenario: &str,
    details: &detail::DetailResults,
    context_note: &str,
    llm: &dyn LlmClient,
    cancel: &CancellationToken,
) -> Result<DiagnosisTree, crate::error::CoreError> {
    use crate::llm::Message;

    let corpus = details
        .guideline_contents
        .iter()
        .chain(details.cks_contents.iter())
        .chain(details.bnf_contents.iter())
        .cloned()
        .collect::<Vec<_>>()
        .join("\n---\n");

    let prompt = format!(
        "Extract diagnoses, treatments, and medication_names as JSON \
        ({{\"diagnoses\": [...]}}) from the following guideline corpus for scenario '{scenario}'.\n\
        Context: {context_note}\n\nCorpus:\n{corpus}"
    );

    let messages = vec![Message::user_text(prompt)];
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(crate::error::CoreError::Cancelled),
        result = llm.send(&messages, &[]) => result,
    }?;

    let text = response
        .content
        .iter()
        .find_map(|block| match block {
            crate::llm::Block::Text { text } => Some(text.clone()),
            _ => None,
        })
        .unwrap_or_default();

    serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("diagnoses").cloned())
        .and_then(|v| serde_json::from_value(v).ok())
        .ok_or_else(|| crate::error::CoreError::Parse {
            context: "legacy extraction response".to_string(),
            message: "no diagnoses JSON found in assistant text".to_string(),
        })
}
