//! CLI Adapter (C12): thin front door over the workflow orchestrator.

pub mod health;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::error::CoreError;
use crate::llm::AnthropicLlmClient;
use crate::model::ClinicalReport;

#[derive(Parser, Debug)]
#[command(
    name = "clinical-orchestrator",
    about = "Region-aware clinical decision support orchestrator",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON instead of Markdown
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze a clinical scenario and return diagnoses/treatments/drug dossiers
    Analyze {
        /// The clinical scenario text
        scenario: String,
        /// ISO-3166 alpha-2 country code (defaults to the INTERNATIONAL profile)
        #[arg(long)]
        country: Option<String>,
        /// Free-text patient allergies, used for the deterministic cross-check
        #[arg(long)]
        allergies: Option<String>,
        /// Optional patient identifier (legacy path only)
        #[arg(long)]
        patient_id: Option<String>,
        /// Run the legacy extract-and-enrich pipeline (§C10) instead of the
        /// streamlined tool-use pipeline (§C9)
        #[arg(long)]
        legacy: bool,
    },
    /// Check connectivity to the knowledge servers for a region
    Health {
        #[arg(long)]
        country: Option<String>,
    },
}

/// A no-op LLM client keeping the workflow's "llm_api_key absent" short
/// circuit (spec §6.3) honest without threading an `Option<&dyn LlmClient>`
/// through every call site.
struct NoopLlm;

#[async_trait::async_trait]
impl crate::llm::LlmClient for NoopLlm {
    async fn send(
        &self,
        _messages: &[crate::llm::Message],
        _tools: &[crate::model::ToolDescriptor],
    ) -> Result<crate::llm::LlmResponse, CoreError> {
        Ok(crate::llm::LlmResponse {
            stop_reason: crate::llm::StopReason::EndTurn,
            content: vec![],
        })
    }
}

fn render_report(report: &ClinicalReport, json: bool) -> String {
    if json {
        serde_json::to_string_pretty(report).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    } else {
        let mut out = report.summary.clone();
        if !report.warnings.is_empty() {
            out.push_str("\n\nWarnings:\n");
            for warning in &report.warnings {
                out.push_str(&format!("- {warning}\n"));
            }
        }
        out
    }
}

fn exit_code_for(err: &CoreError) -> i32 {
    match err {
        CoreError::Config(_) => 2,
        CoreError::Timeout { .. } => 3,
        CoreError::Cancelled => 130,
        _ => 1,
    }
}

/// Runs the parsed CLI, returning the process exit code.
pub async fn run(cli: Cli, config: &Config) -> i32 {
    match cli.command {
        Commands::Analyze {
            scenario,
            country,
            allergies,
            patient_id,
            legacy,
        } => {
            let client_result = match &config.llm_api_key {
                Some(key) => {
                    AnthropicLlmClient::new(key.clone(), config.llm_model.clone()).map(Some)
                }
                None => Ok(None),
            };
            let client = match client_result {
                Ok(client) => client,
                Err(err) => {
                    eprintln!("failed to initialize LLM client: {err}");
                    return exit_code_for(&err);
                }
            };

            let report = run_analysis(
                &scenario,
                country.as_deref(),
                patient_id.as_deref(),
                allergies.as_deref(),
                legacy,
                config,
                client.as_ref(),
            )
            .await;

            println!("{}", render_report(&report, cli.json));
            0
        }
        Commands::Health { country } => match health::check(country.as_deref(), config).await {
            Ok(report) => {
                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&report).unwrap_or_default()
                    );
                } else {
                    println!("{}", report.to_markdown());
                }
                if report.all_healthy() {
                    0
                } else {
                    1
                }
            }
            Err(err) => {
                eprintln!("health check failed: {err}");
                exit_code_for(&err)
            }
        },
    }
}

async fn run_analysis(
    scenario: &str,
    country: Option<&str>,
    patient_id: Option<&str>,
    allergies: Option<&str>,
    legacy: bool,
    config: &Config,
    client: Option<&AnthropicLlmClient>,
) -> ClinicalReport {
    let noop = NoopLlm;
    let llm: &dyn crate::llm::LlmClient = match client {
        Some(client) => client,
        None => &noop,
    };

    if legacy {
        crate::workflow::guideline_analysis(scenario, country, patient_id, allergies, config, llm)
            .await
    } else {
        crate::workflow::clinical_decision_support(scenario, country, allergies, config, llm).await
    }
}
