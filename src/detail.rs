//! Detail Fetcher (C6): given top-K hits, fetches full content in
//! parallel, tolerating per-item failure.

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::model::Hit;
use crate::router::ToolRouter;

#[derive(Debug, Clone, Default)]
pub struct DetailResults {
    pub guideline_contents: Vec<String>,
    pub cks_contents: Vec<String>,
    pub bnf_contents: Vec<String>,
}

/// Picks the source-specific detail tool for a hit (spec §4.6) — the
/// guidelines bucket can hold a mix of generic and FOGSI-tagged hits
/// (e.g. the `IN` region's FOGSI + ICMR searches), so the tool must be
/// chosen per hit, not per bucket.
fn detail_tool_for(hit: &Hit) -> &'static str {
    match hit {
        Hit::Fogsi { .. } => "get_fogsi_guideline_content",
        Hit::Cks { .. } => "get_cks_topic",
        Hit::Bnf { .. } => "get_bnf_treatment_summary",
        Hit::Nice { .. } | Hit::PubMed { .. } => "get_guideline_details",
    }
}

async fn fetch_one(
    router: &ToolRouter,
    hit: &Hit,
    cancel: &CancellationToken,
    warnings: &mut Vec<String>,
) -> Option<String> {
    let tool = detail_tool_for(hit);
    if !router.has_tool(tool) {
        warnings.push(format!("{tool} tool unavailable; dropping '{}'", hit.title()));
        return None;
    }
    let args = serde_json::json!({
        "title": hit.title(),
        "url": hit.url(),
    });
    match router.call_cancellable(tool, args, cancel).await {
        Ok(result) => Some(result.text()),
        Err(err) => {
            warn!(%err, hit = %hit.title(), "detail fetch failed");
            warnings.push(format!("detail fetch failed for '{}': {err}", hit.title()));
            None
        }
    }
}

pub async fn fetch(
    router: &ToolRouter,
    cancel: &CancellationToken,
    guidelines: &[Hit],
    cks_topics: &[Hit],
    bnf_summaries: &[Hit],
) -> (DetailResults, Vec<String>) {
    let (
        (guideline_contents, mut warnings),
        (cks_contents, cks_warnings),
        (bnf_contents, bnf_warnings),
    ) = tokio::join!(
        fetch_bucket(router, cancel, guidelines),
        fetch_bucket(router, cancel, cks_topics),
        fetch_bucket(router, cancel, bnf_summaries),
    );
    warnings.extend(cks_warnings);
    warnings.extend(bnf_warnings);

    (
        DetailResults {
            guideline_contents,
            cks_contents,
            bnf_contents,
        },
        warnings,
    )
}

async fn fetch_bucket(
    router: &ToolRouter,
    cancel: &CancellationToken,
    hits: &[Hit],
) -> (Vec<String>, Vec<String>) {
    let outcomes: Vec<(Option<String>, Option<String>)> = join_all(hits.iter().map(|hit| async move {
        let mut local_warnings = Vec::new();
        let content = fetch_one(router, hit, cancel, &mut local_warnings).await;
        (content, local_warnings.into_iter().next())
    }))
    .await;

    let mut contents = Vec::new();
    let mut warnings = Vec::new();
    for (content, warning) in outcomes {
        if let Some(c) = content {
            contents.push(c);
        }
        if let Some(w) = warning {
            warnings.push(w);
        }
    }
    (contents, warnings)
}
