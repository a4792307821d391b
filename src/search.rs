//! Regional Search Service (C5): runs a `RegionConfig`'s searches
//! concurrently, dedupes by identity key, and applies PubMed fallback.

use std::collections::HashSet;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::model::{Hit, RegionConfig, ResultKey, SearchResultSet};
use crate::router::ToolRouter;

const TOP_K_PUBMED: usize = 5;

fn interpolate(template: &serde_json::Value, scenario: &str) -> serde_json::Value {
    match template {
        serde_json::Value::String(s) if s == "{scenario}" => {
            serde_json::Value::String(scenario.to_string())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate(v, scenario)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn parse_hits(text: &str) -> Vec<Hit> {
    match serde_json::from_str::<Vec<Hit>>(text) {
        Ok(hits) => hits,
        Err(_) => Vec::new(),
    }
}

fn bucket_of<'a>(results: &'a mut SearchResultSet, key: ResultKey) -> &'a mut Vec<Hit> {
    match key {
        ResultKey::Guidelines => &mut results.guidelines,
        ResultKey::CksTopics => &mut results.cks_topics,
        ResultKey::BnfSummaries => &mut results.bnf_summaries,
        ResultKey::PubmedArticles => &mut results.pubmed_articles,
    }
}

fn dedup_append(bucket: &mut Vec<Hit>, seen: &mut HashSet<String>, hits: Vec<Hit>, deduplicate: bool) {
    for hit in hits {
        if deduplicate {
            let key = hit.identity_key();
            if !seen.insert(key) {
                continue;
            }
        }
        bucket.push(hit);
    }
}

async fn run_pubmed(
    router: &ToolRouter,
    scenario: &str,
    cancel: &CancellationToken,
    warnings: &mut Vec<String>,
) -> Vec<Hit> {
    if !router.has_tool("search_pubmed") {
        warnings.push("search_pubmed tool unavailable".to_string());
        return Vec::new();
    }
    match router
        .call_cancellable("search_pubmed", serde_json::json!({ "query": scenario }), cancel)
        .await
    {
        Ok(result) => parse_hits(&result.text()),
        Err(err) => {
            warn!(%err, "pubmed search failed");
            warnings.push(format!("search_pubmed failed: {err}"));
            Vec::new()
        }
    }
}

/// Runs the region's declared searches plus PubMed fallback/unconditional
/// rules, returning the merged, deduplicated, top-K-truncated result set.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    region: &RegionConfig,
    scenario: &str,
    router: &ToolRouter,
    cancel: &CancellationToken,
    top_k_guidelines: usize,
    top_k_cks: usize,
    top_k_bnf: usize,
) -> (SearchResultSet, Vec<String>) {
    let mut warnings = Vec::new();

    let outcomes = join_all(region.searches.iter().map(|config| {
        let args = interpolate(&config.tool_params, scenario);
        async move {
            let result = router.call_cancellable(&config.tool_name, args, cancel).await;
            (config.clone_key(), config.deduplicate, result)
        }
    }))
    .await;

    let mut results = SearchResultSet::default();
    let mut seen_by_bucket: std::collections::HashMap<ResultKey, HashSet<String>> =
        std::collections::HashMap::new();

    for (result_key, deduplicate, outcome) in outcomes {
        let hits = match outcome {
            Ok(result) => parse_hits(&result.text()),
            Err(err) => {
                warn!(%err, "search call failed");
                warnings.push(format!("search failed: {err}"));
                Vec::new()
            }
        };
        let seen = seen_by_bucket.entry(result_key).or_default();
        let bucket = bucket_of(&mut results, result_key);
        dedup_append(bucket, seen, hits, deduplicate);
    }

    let should_fallback =
        region.pubmed_unconditional || (region.pubmed_fallback && results.total_guidelines() < region.min_results_threshold);

    if should_fallback {
        let pubmed_hits = run_pubmed(router, scenario, cancel, &mut warnings).await;
        let seen = seen_by_bucket
            .entry(ResultKey::PubmedArticles)
            .or_default();
        dedup_append(&mut results.pubmed_articles, seen, pubmed_hits, true);
    }

    results.guidelines.truncate(top_k_guidelines);
    results.cks_topics.truncate(top_k_cks);
    results.bnf_summaries.truncate(top_k_bnf);
    results.pubmed_articles.truncate(TOP_K_PUBMED);

    (results, warnings)
}

impl crate::model::SearchConfig {
    fn clone_key(&self) -> ResultKey {
        self.result_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_first_occurrence() {
        let mut seen = HashSet::new();
        let mut bucket = Vec::new();
        let hits = vec![
            Hit::Nice {
                reference: "CG69".to_string(),
                title: "Croup".to_string(),
                url: None,
                extra: Default::default(),
            },
            Hit::Nice {
                reference: "cg69".to_string(),
                title: "Croup (dup)".to_string(),
                url: None,
                extra: Default::default(),
            },
        ];
        dedup_append(&mut bucket, &mut seen, hits, true);
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket[0].title(), "Croup");
    }
}
