//! LLM Tool-Use Driver (C7): the iterative
//! assistant → tool_use → tool_result → assistant loop.

use std::sync::LazyLock;

use futures::future::join_all;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::CoreError;
use crate::llm::{Block, LlmClient, Message, Role, StopReason};
use crate::model::DiagnosisTree;
use crate::router::ToolRouter;

const SYSTEM_INSTRUCTION: &str = "You are a clinical decision support assistant. \
Use the available tools to research relevant guidelines, then answer ONLY with a JSON object \
of the shape {\"diagnoses\": [{\"name\": string, \"confidence\": \"high\"|\"medium\"|\"low\", \
\"treatments\": [{\"label\": string, \"drug_names\": [string], \"notes\": string}]}]}.";

pub struct DriverOutcome {
    pub tree: DiagnosisTree,
    pub warnings: Vec<String>,
}

/// Runs the tool-use loop to completion (spec §4.7).
///
/// If `llm_api_key` is absent upstream, §C9 short-circuits before calling
/// this function at all (spec §6.3).
pub async fn run(
    scenario: &str,
    router: &ToolRouter,
    llm: &dyn LlmClient,
    max_iterations: u32,
    cancel: &CancellationToken,
) -> DriverOutcome {
    let mut warnings = Vec::new();
    let tool_descriptors: Vec<_> = router
        .tools()
        .keys()
        .map(|name| crate::model::ToolDescriptor {
            name: name.clone(),
            description: String::new(),
            input_schema: serde_json::json!({"type": "object"}),
        })
        .collect();

    let mut messages = vec![Message::user_text(format!(
        "{SYSTEM_INSTRUCTION}\n\nClinical scenario: {scenario}"
    ))];

    let mut last_text = String::new();
    let mut exhausted = true;

    for _ in 0..max_iterations {
        if cancel.is_cancelled() {
            warnings.push("cancelled".to_string());
            return DriverOutcome {
                tree: Vec::new(),
                warnings,
            };
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warnings.push("cancelled".to_string());
                return DriverOutcome { tree: Vec::new(), warnings };
            }
            result = llm.send(&messages, &tool_descriptors) => result,
        };

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                warn!(%err, "llm call failed");
                warnings.push(format!("llm call failed: {err}"));
                return DriverOutcome {
                    tree: Vec::new(),
                    warnings,
                };
            }
        };

        for block in &response.content {
            if let Block::Text { text } = block {
                last_text = text.clone();
            }
        }

        if response.stop_reason != StopReason::ToolUse {
            messages.push(Message {
                role: Role::Assistant,
                content: response.content,
            });
            exhausted = false;
            break;
        }

        let tool_uses: Vec<(String, String, serde_json::Value)> = response
            .content
            .iter()
            .filter_map(|block| match block {
                Block::ToolUse { id, name, input } => {
                    Some((id.clone(), name.clone(), input.clone()))
                }
                _ => None,
            })
            .collect();

        messages.push(Message {
            role: Role::Assistant,
            content: response.content,
        });

        // Execute every tool_use block concurrently; preserve ordering by
        // input id regardless of completion order (spec §4.7, §8 property 4).
        let results = join_all(tool_uses.iter().map(|(id, name, input)| async move {
            let outcome = router.call(name, input.clone()).await;
            let content = match outcome {
                Ok(result) => serde_json::Value::String(result.text()),
                Err(err) => serde_json::json!({ "error": err.to_string() }),
            };
            (id.clone(), content)
        }))
        .await;

        let tool_result_blocks = results
            .into_iter()
            .map(|(tool_use_id, content)| Block::ToolResult {
                tool_use_id,
                content,
            })
            .collect();

        messages.push(Message {
            role: Role::User,
            content: tool_result_blocks,
        });
    }

    if exhausted {
        warnings.push("tool_loop_exhausted".to_string());
    }

    let tree = extract_json(&last_text).unwrap_or_else(|| {
        if !last_text.is_empty() {
            warnings.push("failed to parse diagnosis JSON from assistant text".to_string());
        }
        Vec::new()
    });

    DriverOutcome { tree, warnings }
}

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(\{.*?\})\s*```").unwrap());
static FENCED_PLAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```\s*(\{.*?\})\s*```").unwrap());

/// Extracts JSON in the three envelopes spec §4.7/§8 property 10
/// requires: a fenced ```json block, a bare fenced block, or the first
/// `{...}` substring.
fn extract_json(text: &str) -> Option<DiagnosisTree> {
    let fenced_json = &*FENCED_JSON;
    let fenced_plain = &*FENCED_PLAIN;

    let candidate = fenced_json
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .or_else(|| {
            fenced_plain
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        })
        .or_else(|| first_brace_object(text));

    let candidate = candidate?;
    let value: serde_json::Value = serde_json::from_str(&candidate).ok()?;
    let diagnoses = value.get("diagnoses")?.clone();
    serde_json::from_value(diagnoses).ok()
}

fn first_brace_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    for (offset, &byte) in bytes[start..].iter().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=start + offset].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::extract_json;

    fn sample(wrapper: &str) -> String {
        let json = r#"{"diagnoses": [{"name": "Viral Croup", "confidence": "high", "treatments": []}]}"#;
        wrapper.replace("{json}", json)
    }

    #[test]
    fn extracts_fenced_json_envelope() {
        let text = sample("some text\n```json\n{json}\n```\nmore text");
        let tree = extract_json(&text).expect("should parse");
        assert_eq!(tree[0].name, "Viral Croup");
    }

    #[test]
    fn extracts_fenced_plain_envelope() {
        let text = sample("```\n{json}\n```");
        let tree = extract_json(&text).expect("should parse");
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn extracts_bare_braces() {
        let text = sample("Here is my answer: {json} and that's it.");
        let tree = extract_json(&text).expect("should parse");
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn malformed_text_yields_none() {
        assert!(extract_json("not json at all").is_none());
    }
}
