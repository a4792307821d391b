//! End-to-end workflow tests grounded in spec §8's literal scenarios
//! (S1, S4, S6), driven against real subprocess doubles plus a scripted
//! fake `LlmClient`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use clinord::config::Config;
use clinord::error::CoreError;
use clinord::llm::{Block, LlmClient, LlmResponse, Message, StopReason};
use clinord::model::ToolDescriptor;

fn multi_tool_spec(name: &str, tools: serde_json::Value) -> clinord::model::SpawnSpec {
    let fixture: PathBuf = ["tests", "fixtures", "mock_server.py"].iter().collect();
    clinord::model::SpawnSpec {
        name: name.to_string(),
        command: "python3".to_string(),
        args: vec![fixture.to_string_lossy().into_owned(), tools.to_string()],
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.llm_api_key = Some("test-key".to_string());
    config.servers_dir = PathBuf::from("unused");
    config
}

/// Scripts a fixed sequence of turns: first a tool_use turn, then a
/// terminal JSON answer (spec §8 S1).
struct ScriptedLlm {
    call_count: AtomicUsize,
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn send(
        &self,
        _messages: &[Message],
        _tools: &[ToolDescriptor],
    ) -> Result<LlmResponse, CoreError> {
        let call = self.call_count.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            Ok(LlmResponse {
                stop_reason: StopReason::ToolUse,
                content: vec![Block::ToolUse {
                    id: "t1".to_string(),
                    name: "search_nice_guidelines".to_string(),
                    input: serde_json::json!({ "query": "croup" }),
                }],
            })
        } else {
            let text = r#"```json
{"diagnoses": [{"name": "Viral Croup", "confidence": "high", "treatments": [{"label": "first-line", "drug_names": ["Dexamethasone"], "notes": ""}]}]}
```"#;
            Ok(LlmResponse {
                stop_reason: StopReason::EndTurn,
                content: vec![Block::Text {
                    text: text.to_string(),
                }],
            })
        }
    }
}

#[tokio::test]
async fn s1_croup_scenario_produces_one_diagnosis_with_bnf_info() {
    // This test spawns real subprocess doubles but does not reach the
    // network; it exercises §C9 end to end via SpawnSpec::command=python3,
    // which requires servers_dir resolution to be bypassed — so we drive
    // the pipeline pieces directly instead of through
    // `workflow::clinical_decision_support`, which derives commands from
    // `servers_dir`. The driver, router, and enrichment stages are the
    // parts under test.
    let registry = Arc::new(clinord::registry::SessionRegistry::new(
        std::time::Duration::from_secs(5),
    ));
    let specs = vec![
        multi_tool_spec(
            "NICE",
            serde_json::json!({ "search_nice_guidelines": r#"[{"source":"Nice","reference":"CG69","title":"Croup","url":null}]"# }),
        ),
        multi_tool_spec(
            "BNF",
            serde_json::json!({
                "search_bnf_drug": r#"[{"url":"https://bnf.test/dexamethasone"}]"#,
                "get_bnf_drug_info": r#"{"indications":"Croup","dosage":"150 micrograms/kg","contraindications":"None known","cautions":"-","side_effects":"-","interactions":"-"}"#,
            }),
        ),
    ];
    let report = registry.open(&specs).await;
    assert!(report.failed.is_empty(), "unexpected open failures: {:?}", report.failed);

    let router = clinord::router::ToolRouter::new(registry.clone(), report.descriptors);
    let llm = ScriptedLlm {
        call_count: AtomicUsize::new(0),
    };
    let cancel = tokio_util::sync::CancellationToken::new();

    let outcome = clinord::agent::run(
        "3-year-old with croup and stridor",
        &router,
        &llm,
        8,
        &cancel,
    )
    .await;

    assert_eq!(outcome.tree.len(), 1);
    assert_eq!(outcome.tree[0].name, "Viral Croup");

    let mut tree = outcome.tree;
    let enrichment_warnings = clinord::enrichment::run(&mut tree, &router, &cancel).await;
    assert!(enrichment_warnings.is_empty(), "{enrichment_warnings:?}");
    assert!(tree[0].treatments[0].bnf_info.contains_key("Dexamethasone"));

    registry.close_all().await;
    let _ = test_config();
}

#[tokio::test]
async fn s4_tool_loop_exhaustion_is_flagged() {
    struct AlwaysToolUse;
    #[async_trait]
    impl LlmClient for AlwaysToolUse {
        async fn send(
            &self,
            _messages: &[Message],
            _tools: &[ToolDescriptor],
        ) -> Result<LlmResponse, CoreError> {
            Ok(LlmResponse {
                stop_reason: StopReason::ToolUse,
                content: vec![
                    Block::Text {
                        text: "still working".to_string(),
                    },
                    Block::ToolUse {
                        id: "t1".to_string(),
                        name: "search_nice_guidelines".to_string(),
                        input: serde_json::json!({}),
                    },
                ],
            })
        }
    }

    let registry = Arc::new(clinord::registry::SessionRegistry::new(
        std::time::Duration::from_secs(5),
    ));
    let specs = vec![multi_tool_spec(
        "NICE",
        serde_json::json!({ "search_nice_guidelines": "[]" }),
    )];
    let report = registry.open(&specs).await;
    let router = clinord::router::ToolRouter::new(registry.clone(), report.descriptors);
    let cancel = tokio_util::sync::CancellationToken::new();

    let outcome = clinord::agent::run("anything", &router, &AlwaysToolUse, 2, &cancel).await;

    assert!(outcome.warnings.contains(&"tool_loop_exhausted".to_string()));
    registry.close_all().await;
}

#[tokio::test]
async fn s6_duplicate_tool_conflict_dispatches_first_discovered() {
    let registry = Arc::new(clinord::registry::SessionRegistry::new(
        std::time::Duration::from_secs(5),
    ));
    let specs = vec![
        multi_tool_spec(
            "ALPHA",
            serde_json::json!({ "get_patient_info": r#""from alpha""# }),
        ),
        multi_tool_spec(
            "BETA",
            serde_json::json!({ "get_patient_info": r#""from beta""# }),
        ),
    ];
    let report = registry.open(&specs).await;
    let router = clinord::router::ToolRouter::new(registry.clone(), report.descriptors);

    let result = router
        .call("get_patient_info", serde_json::json!({}))
        .await
        .expect("call should dispatch deterministically");
    assert_eq!(result.text(), "\"from alpha\"");

    registry.close_all().await;
}
