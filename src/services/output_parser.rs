//! Turns raw analysis output into a structured verdict.
//!
//! The chain always yields a value. Each stage is tried in order and the
//! first that produces a record carrying the required key wins:
//!
//! 1. strict JSON parse after stripping markdown fences
//! 2. strict parse of the largest balanced `{...}` block in the text
//! 3. repair through the secondary LLM with a schema hint, re-run through 1-2
//! 4. a `PARSE_ERROR` record that keeps the raw text verbatim

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{
    ComparisonVerdict, IndividualVerdict, ParseFailure, ParseOutcome, ParseStage, ParsedVerdict,
    TaskKind,
};
use crate::services::llm_service::LlmService;

pub const INDIVIDUAL_SCHEMA_HINT: &str = r#"{
  "verdict": "STRONG_BUY | BUY | ACCUMULATE | HOLD | WATCH | AVOID | SELL",
  "conviction": "HIGH | MEDIUM | LOW",
  "risk_reward": 2.5,
  "knife_catch_warning": false,
  "disputed_claims": ["claim that other analysts contest"],
  "thesis": "one paragraph",
  "price_target": 123.45
}"#;

pub const COMPARISON_SCHEMA_HINT: &str = r#"{
  "winner": "TICKER",
  "rationale": "why the winner beats the others",
  "ranking": ["TICKER", "TICKER", "TICKER"]
}"#;

pub fn schema_hint(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Individual => INDIVIDUAL_SCHEMA_HINT,
        TaskKind::BatchComparison => COMPARISON_SCHEMA_HINT,
    }
}

#[derive(Debug, Error)]
enum ParseError {
    #[error("no JSON object found")]
    NoJson,
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("JSON is not an object")]
    NotAnObject,
    #[error("missing required key '{0}'")]
    MissingKey(&'static str),
}

pub struct OutputParser {
    repair: Option<Arc<LlmService>>,
}

impl OutputParser {
    pub fn new(repair: Option<Arc<LlmService>>) -> Self {
        Self { repair }
    }

    /// Parser with no repair stage.
    pub fn offline() -> Self {
        Self { repair: None }
    }

    /// Newest non-blank output. Outputs are in arrival order.
    pub fn select_output(outputs: &[String]) -> Option<&str> {
        outputs
            .iter()
            .rev()
            .map(|o| o.as_str())
            .find(|o| !o.trim().is_empty())
    }

    pub async fn parse(&self, kind: TaskKind, outputs: &[String]) -> ParseOutcome {
        let Some(raw) = Self::select_output(outputs) else {
            warn!("⚠️ No usable output for {} task", kind);
            return Self::fallback(kind, "job produced no output", "");
        };

        let first_error = match parse_text(kind, raw) {
            Ok((verdict, stage)) => {
                debug!("Parsed {} output at stage {:?}", kind, stage);
                return ParseOutcome {
                    verdict,
                    stage,
                    raw_text: raw.to_string(),
                };
            }
            Err(e) => e,
        };

        info!("🔧 {} output is not valid JSON ({}), trying repair", kind, first_error);

        let reason = match self.try_repair(kind, raw).await {
            Ok(verdict) => {
                info!("✅ Repair produced a structured {} verdict", kind);
                return ParseOutcome {
                    verdict,
                    stage: ParseStage::Repaired,
                    raw_text: raw.to_string(),
                };
            }
            Err(reason) => reason,
        };

        warn!("❌ Could not structure {} output: {}", kind, reason);
        Self::fallback(kind, reason, raw)
    }

    async fn try_repair(&self, kind: TaskKind, raw: &str) -> Result<ParsedVerdict, String> {
        let service = match &self.repair {
            Some(service) if service.is_enabled() => service,
            _ => return Err("repair unavailable".to_string()),
        };

        let response = service
            .repair(repair_prompt(kind, raw))
            .await
            .map_err(|e| format!("repair call failed: {}", e))?;

        parse_text(kind, &response)
            .map(|(verdict, _)| verdict)
            .map_err(|e| format!("repair response unusable: {}", e))
    }

    fn fallback(kind: TaskKind, reason: impl Into<String>, raw: &str) -> ParseOutcome {
        ParseOutcome {
            verdict: ParsedVerdict::ParseError(ParseFailure::new(kind, reason, raw)),
            stage: ParseStage::Fallback,
            raw_text: raw.to_string(),
        }
    }
}

/// Stages 1 and 2.
fn parse_text(kind: TaskKind, text: &str) -> Result<(ParsedVerdict, ParseStage), ParseError> {
    let stripped = strip_wrappers(text);
    let strict_error = match strict_parse(kind, stripped) {
        Ok(verdict) => return Ok((verdict, ParseStage::Strict)),
        Err(e) => e,
    };

    let mut blocks = balanced_objects(text);
    blocks.sort_by_key(|b| std::cmp::Reverse(b.len()));

    for block in blocks {
        if let Ok(verdict) = strict_parse(kind, block) {
            return Ok((verdict, ParseStage::Extracted));
        }
    }
    Err(strict_error)
}

fn fence_pattern() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*(.*?)\s*```$").ok())
        .as_ref()
}

/// Remove a surrounding markdown fence such as ```` ```json ... ``` ````.
pub fn strip_wrappers(text: &str) -> &str {
    let trimmed = text.trim();
    let inner = fence_pattern()
        .and_then(|re| re.captures(trimmed))
        .and_then(|c| c.get(1));
    match inner {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

fn strict_parse(kind: TaskKind, text: &str) -> Result<ParsedVerdict, ParseError> {
    if !text.trim_start().starts_with('{') {
        return Err(ParseError::NoJson);
    }
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(ParseError::NotAnObject);
    }

    match kind {
        TaskKind::Individual => {
            if !has_text(&value, &["verdict"]) {
                return Err(ParseError::MissingKey("verdict"));
            }
            let verdict: IndividualVerdict = serde_json::from_value(value)?;
            Ok(ParsedVerdict::Individual(verdict.normalized()))
        }
        TaskKind::BatchComparison => {
            if !has_text(&value, &["winner", "winner_symbol"]) {
                return Err(ParseError::MissingKey("winner"));
            }
            let verdict: ComparisonVerdict = serde_json::from_value(value)?;
            let verdict = verdict.normalized();
            if verdict.winner.is_empty() {
                return Err(ParseError::MissingKey("winner"));
            }
            Ok(ParsedVerdict::Comparison(verdict))
        }
    }
}

fn has_text(value: &Value, keys: &[&str]) -> bool {
    keys.iter().any(|key| {
        value
            .get(*key)
            .and_then(|v| v.as_str())
            .is_some_and(|s| !s.trim().is_empty())
    })
}

/// Every balanced `{...}` span in `text`, nested ones included, ignoring
/// braces inside JSON strings. An unclosed `{` does not hide spans that
/// close after it.
fn balanced_objects(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' if !open.is_empty() => in_string = true,
            '{' => open.push(idx),
            '}' => {
                if let Some(start) = open.pop() {
                    spans.push(&text[start..=idx]);
                }
            }
            _ => {}
        }
    }
    spans
}

fn repair_prompt(kind: TaskKind, raw: &str) -> String {
    format!(
        "The following analysis was supposed to be a JSON object but could not be parsed.\n\
         Rewrite it as JSON matching this schema exactly. Use null for anything the text does not state.\n\n\
         Schema:\n{}\n\nAnalysis:\n{}",
        schema_hint(kind),
        raw
    )
}
