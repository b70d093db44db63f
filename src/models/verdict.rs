use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::task::TaskKind;

/// Status written on a record the repair chain could not structure.
pub const PARSE_ERROR_STATUS: &str = "PARSE_ERROR";

/// Structured verdict for a single candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualVerdict {
    pub verdict: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub conviction: Option<String>,
    #[serde(default, alias = "risk_reward_ratio", deserialize_with = "lenient::number")]
    pub risk_reward: Option<f64>,
    #[serde(default, alias = "knife_catch", deserialize_with = "lenient::flag")]
    pub knife_catch_warning: bool,
    #[serde(default, deserialize_with = "lenient::string_list")]
    pub disputed_claims: Vec<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub thesis: Option<String>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub price_target: Option<f64>,
}

impl IndividualVerdict {
    /// Upper-case categorical fields so `"strong buy"` and `"STRONG_BUY"` match.
    pub fn normalized(mut self) -> Self {
        self.verdict = normalize_category(&self.verdict);
        self.conviction = self.conviction.map(|c| normalize_category(&c));
        self
    }
}

/// Outcome of comparing the members of one batch group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonVerdict {
    #[serde(alias = "winner_symbol")]
    pub winner: String,
    #[serde(default, alias = "reasoning", deserialize_with = "lenient::string")]
    pub rationale: Option<String>,
    #[serde(default, alias = "rankings", deserialize_with = "lenient::string_list")]
    pub ranking: Vec<String>,
}

impl ComparisonVerdict {
    pub fn normalized(mut self) -> Self {
        self.winner = clean_symbol(&self.winner);
        self.ranking = self.ranking.iter().map(|s| clean_symbol(s)).collect();
        self
    }
}

/// Synthetic record produced when every parsing stage failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseFailure {
    pub status: String,
    pub kind: TaskKind,
    pub reason: String,
    pub verdict: Option<String>,
    pub winner: Option<String>,
    /// Original job output, kept verbatim for audit
    pub raw_text: String,
}

impl ParseFailure {
    pub fn new(kind: TaskKind, reason: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            status: PARSE_ERROR_STATUS.to_string(),
            kind,
            reason: reason.into(),
            verdict: None,
            winner: None,
            raw_text: raw_text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParsedVerdict {
    Individual(IndividualVerdict),
    Comparison(ComparisonVerdict),
    ParseError(ParseFailure),
}

impl ParsedVerdict {
    pub fn is_parse_error(&self) -> bool {
        matches!(self, ParsedVerdict::ParseError(_))
    }

    pub fn as_individual(&self) -> Option<&IndividualVerdict> {
        match self {
            ParsedVerdict::Individual(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_comparison(&self) -> Option<&ComparisonVerdict> {
        match self {
            ParsedVerdict::Comparison(v) => Some(v),
            _ => None,
        }
    }
}

/// Which stage of the repair chain produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStage {
    Strict,
    Extracted,
    Repaired,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseOutcome {
    pub verdict: ParsedVerdict,
    pub stage: ParseStage,
    /// The job output the verdict was derived from
    pub raw_text: String,
}

pub fn normalize_category(value: &str) -> String {
    value
        .trim()
        .to_ascii_uppercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Strip decorations such as `$AAPL` or `AAPL (Apple Inc.)` down to the ticker.
pub fn clean_symbol(value: &str) -> String {
    value
        .trim()
        .trim_start_matches('$')
        .split(|c: char| c.is_whitespace() || c == '(' || c == ':' || c == ',')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}

/// Deserializers that tolerate the loose typing LLM output tends to have.
mod lenient {
    use super::*;

    pub fn number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(number_from_value(&value))
    }

    pub fn number_from_value(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
            Value::String(s) => ratio_from_text(s),
            _ => None,
        }
    }

    /// `"2.5"`, `"2.5x"`, `"2.5:1"` and `"1:2.5"` all read as 2.5. For any
    /// other `a:b` the reward side is `b`, giving `b / a`.
    fn ratio_from_text(text: &str) -> Option<f64> {
        let text = text.trim().trim_end_matches(|c: char| c == 'x' || c == 'X');
        let value = match text.split_once(':') {
            Some((a, b)) => {
                let a = a.trim().parse::<f64>().ok()?;
                let b = b.trim().parse::<f64>().ok()?;
                if b == 1.0 {
                    a
                } else if a != 0.0 {
                    b / a
                } else {
                    return None;
                }
            }
            None => text.trim().parse::<f64>().ok()?,
        };
        Some(value).filter(|v| v.is_finite())
    }

    pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Bool(b) => b,
            Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
            Value::String(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "yes" | "y" | "1"
            ),
            _ => false,
        })
    }

    pub fn string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    pub fn string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                    Value::Object(map) => map
                        .get("symbol")
                        .or_else(|| map.get("claim"))
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string()),
                    _ => None,
                })
                .collect(),
            Value::String(s) => s
                .split(',')
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect(),
            _ => Vec::new(),
        })
    }
}
