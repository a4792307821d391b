//! Health Check (C13): per-server connectivity probe, modeled on the
//! teacher's `cli::health` (`tokio::join!` fan-out, Markdown table).

use std::time::{Duration, Instant};

use futures::future::join_all;

use crate::config::Config;
use crate::error::CoreError;
use crate::model::{HealthReport, HealthRow, SpawnSpec};
use crate::region;

fn affects_for_server(name: &str) -> Option<&'static str> {
    match name {
        "NICE" | "USPSTF" | "NHMRC" | "ICMR" | "STG" => {
            Some("guideline search and detail fetch")
        }
        "BNF" => Some("drug dossier enrichment"),
        "CKS" => Some("CKS topic search and detail fetch"),
        "FOGSI" | "RSSDI" | "CSI" | "NCG" | "IAP" => Some("India-region guideline search"),
        "PATIENT_INFO" => Some("patient/season context lookups (legacy path)"),
        "PUBMED" => Some("PubMed fallback search"),
        _ => None,
    }
}

async fn check_one(spec: SpawnSpec, rpc_timeout: Duration) -> HealthRow {
    let start = Instant::now();
    match crate::rpc::Session::open(&spec, rpc_timeout).await {
        Ok(session) => {
            let result = session.initialize().await;
            let elapsed = start.elapsed().as_millis();
            session.close().await;
            match result {
                Ok(_) => HealthRow {
                    server: spec.name.clone(),
                    status: "ok".into(),
                    latency: format!("{elapsed}ms"),
                    affects: None,
                },
                Err(err) => HealthRow {
                    server: spec.name.clone(),
                    status: "error".into(),
                    latency: format!("{elapsed}ms ({err})"),
                    affects: affects_for_server(&spec.name).map(str::to_string),
                },
            }
        }
        Err(err) => HealthRow {
            server: spec.name.clone(),
            status: "error".into(),
            latency: err.to_string(),
            affects: affects_for_server(&spec.name).map(str::to_string),
        },
    }
}

/// Probes every server in the given region's profile (or the
/// `INTERNATIONAL` profile if no country is given).
pub async fn check(country: Option<&str>, config: &Config) -> Result<HealthReport, CoreError> {
    let region_config = region::select(country);
    let specs: Vec<SpawnSpec> = region_config
        .server_names
        .iter()
        .map(|name| SpawnSpec {
            name: name.clone(),
            command: config
                .servers_dir
                .join(name.to_lowercase())
                .to_string_lossy()
                .into_owned(),
            args: vec![],
        })
        .collect();

    let rpc_timeout = Duration::from_millis(config.rpc_timeout_ms);
    let rows = join_all(specs.into_iter().map(|spec| check_one(spec, rpc_timeout))).await;

    let healthy = rows.iter().filter(|r| r.status == "ok").count();
    Ok(HealthReport {
        healthy,
        total: rows.len(),
        rows,
    })
}
