//! Endpoint request modes and their token estimates

use crate::state::Capacity;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Characters per token assumed by the estimator
const CHARS_PER_TOKEN: f64 = 4.0;

/// Tokens added per chat message for role and separators
const TOKENS_PER_MESSAGE: f64 = 4.0;

/// Tokens priming the assistant reply
const REPLY_PRIMING_TOKENS: f64 = 2.0;

/// Request family served by the endpoint
///
/// Chosen once from configuration; decides how prompt tokens are estimated
/// and how usage is read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestMode {
    /// Chat completions: `messages` in, `usage.completion_tokens` out
    #[default]
    Chat,

    /// Embeddings: `input` in, no completion tokens
    Embeddings,
}

impl RequestMode {
    /// Estimates the prompt tokens of a request body
    pub fn estimate_prompt_tokens(&self, body: &Value) -> f64 {
        match self {
            Self::Chat => {
                let messages = body
                    .get("messages")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or_default();

                let per_message: f64 = messages
                    .iter()
                    .map(|message| {
                        let text: usize = ["role", "name"]
                            .iter()
                            .filter_map(|key| message.get(key).and_then(Value::as_str))
                            .map(str::len)
                            .sum::<usize>()
                            + message.get("content").map_or(0, text_len);
                        TOKENS_PER_MESSAGE + tokens_for(text)
                    })
                    .sum();

                per_message + REPLY_PRIMING_TOKENS
            }
            Self::Embeddings => body.get("input").map_or(0.0, |input| match input {
                Value::Array(items) => items.iter().map(|i| tokens_for(text_len(i))).sum(),
                other => tokens_for(text_len(other)),
            }),
        }
    }

    /// Estimated cost of one request: one request plus its prompt tokens
    pub fn estimate_cost(&self, body: &Value) -> Capacity {
        Capacity::single_request(self.estimate_prompt_tokens(body))
    }

    /// Reads `(prompt_tokens, completion_tokens)` from a response body
    pub fn usage_tokens(&self, response: &Value) -> Option<(f64, f64)> {
        let usage = response.get("usage")?;
        let prompt = usage.get("prompt_tokens").and_then(Value::as_f64)?;
        let completion = match self {
            Self::Chat => usage
                .get("completion_tokens")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            Self::Embeddings => 0.0,
        };
        Some((prompt, completion))
    }
}

fn tokens_for(chars: usize) -> f64 {
    (chars as f64 / CHARS_PER_TOKEN).ceil()
}

/// Length of the text carried by a content value
///
/// Handles plain strings and arrays of `{"type": "text", "text": ...}` parts.
fn text_len(value: &Value) -> usize {
    match value {
        Value::String(s) => s.len(),
        Value::Array(parts) => parts
            .iter()
            .map(|part| match part {
                Value::String(s) => s.len(),
                other => other.get("text").and_then(Value::as_str).map_or(0, str::len),
            })
            .sum(),
        _ => 0,
    }
}
