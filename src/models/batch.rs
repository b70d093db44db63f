use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a comparison batch.
///
/// `PENDING → STARTED → {COMPLETED, FAILED, SKIPPED}`. Two extra edges exist:
/// `STARTED → STARTED` when recovery re-queues a batch and refreshes its
/// timestamp, and `FAILED → STARTED` when an operator re-triggers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pending,
    Started,
    Completed,
    Failed,
    Skipped,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "PENDING",
            BatchStatus::Started => "STARTED",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Skipped => "SKIPPED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Skipped
        )
    }

    /// Statuses a batch may be in right before moving to `next`.
    pub fn allowed_sources(next: BatchStatus) -> &'static [BatchStatus] {
        match next {
            BatchStatus::Pending => &[],
            BatchStatus::Started => &[BatchStatus::Pending, BatchStatus::Started, BatchStatus::Failed],
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Skipped => {
                &[BatchStatus::Started]
            }
        }
    }

    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        Self::allowed_sources(next).contains(&self)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(BatchStatus::Pending),
            "STARTED" => Ok(BatchStatus::Started),
            "COMPLETED" => Ok(BatchStatus::Completed),
            "FAILED" => Ok(BatchStatus::Failed),
            "SKIPPED" => Ok(BatchStatus::Skipped),
            other => Err(format!("unknown batch status '{}'", other)),
        }
    }
}

/// Ordered list of candidate symbols belonging to a batch.
///
/// Older rows store the list as a delimited string (`"AAPL,MSFT"`), newer ones
/// as a JSON array. Both are accepted on read; `to_stored` always writes JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SymbolList(Vec<String>);

impl SymbolList {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            symbols
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    /// Decode the persisted column value, whichever encoding it uses.
    pub fn from_stored(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::default();
        }

        if trimmed.starts_with('[') {
            if let Ok(list) = serde_json::from_str::<Vec<String>>(trimmed) {
                return Self::new(list);
            }
            // Hand-written lists like [AAPL, MSFT] are not valid JSON
            let inner = trimmed.trim_start_matches('[').trim_end_matches(']');
            return Self::from_delimited(inner);
        }

        if trimmed.starts_with('"') {
            if let Ok(inner) = serde_json::from_str::<String>(trimmed) {
                return Self::from_stored(&inner);
            }
        }

        Self::from_delimited(trimmed)
    }

    fn from_delimited(raw: &str) -> Self {
        Self::new(
            raw.split(|c: char| c == ',' || c == '|' || c == ';')
                .map(|s| s.trim().trim_matches(|c: char| c == '"' || c == '\'')),
        )
    }

    pub fn to_stored(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.0.iter().any(|s| s.eq_ignore_ascii_case(symbol.trim()))
    }

    pub fn chunks(&self, size: usize) -> impl Iterator<Item = SymbolList> + '_ {
        self.0.chunks(size.max(1)).map(|c| SymbolList(c.to_vec()))
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

impl fmt::Display for SymbolList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(","))
    }
}

impl<'de> Deserialize<'de> for SymbolList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Encoded {
            List(Vec<String>),
            Delimited(String),
        }

        Ok(match Encoded::deserialize(deserializer)? {
            Encoded::List(list) => SymbolList::new(list),
            Encoded::Delimited(raw) => SymbolList::from_stored(&raw),
        })
    }
}

impl FromIterator<String> for SymbolList {
    fn from_iter<T: IntoIterator<Item = String>>(iter: T) -> Self {
        SymbolList::new(iter)
    }
}

/// A group of same-day candidates compared against each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: i64,
    pub candidate_symbols: SymbolList,
    pub date: NaiveDate,
    pub status: BatchStatus,
    pub winner_symbol: Option<String>,
    pub rationale: Option<String>,
    pub raw_output: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Time of the last status write
    pub updated_at: DateTime<Utc>,
}

impl BatchRecord {
    /// A STARTED batch that has not moved for longer than `threshold`.
    pub fn is_zombie(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        self.status == BatchStatus::Started && now - self.updated_at > threshold
    }
}

/// Input for creating a batch and linking its members.
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub symbols: SymbolList,
    pub date: NaiveDate,
    pub status: BatchStatus,
    pub winner_symbol: Option<String>,
}

impl NewBatch {
    pub fn pending(symbols: SymbolList, date: NaiveDate) -> Self {
        Self {
            symbols,
            date,
            status: BatchStatus::Pending,
            winner_symbol: None,
        }
    }

    /// A single leftover candidate cannot be compared, so it wins by default.
    pub fn promoted(symbol: &str, date: NaiveDate) -> Self {
        let symbols = SymbolList::new([symbol]);
        Self {
            winner_symbol: symbols.as_slice().first().cloned(),
            symbols,
            date,
            status: BatchStatus::Completed,
        }
    }
}

/// Result fields written before a batch reaches its terminal status.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub winner_symbol: Option<String>,
    pub rationale: Option<String>,
    pub raw_output: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(BatchStatus::Pending.can_transition_to(BatchStatus::Started));
        assert!(BatchStatus::Started.can_transition_to(BatchStatus::Completed));
        assert!(BatchStatus::Started.can_transition_to(BatchStatus::Failed));
        assert!(BatchStatus::Started.can_transition_to(BatchStatus::Skipped));
        assert!(BatchStatus::Started.can_transition_to(BatchStatus::Started));
        assert!(BatchStatus::Failed.can_transition_to(BatchStatus::Started));

        assert!(!BatchStatus::Pending.can_transition_to(BatchStatus::Completed));
        assert!(!BatchStatus::Completed.can_transition_to(BatchStatus::Started));
        assert!(!BatchStatus::Skipped.can_transition_to(BatchStatus::Started));
        assert!(!BatchStatus::Started.can_transition_to(BatchStatus::Pending));
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            BatchStatus::Pending,
            BatchStatus::Started,
            BatchStatus::Completed,
            BatchStatus::Failed,
            BatchStatus::Skipped,
        ] {
            assert_eq!(status.as_str().parse::<BatchStatus>(), Ok(status));
        }
        assert_eq!("started".parse::<BatchStatus>(), Ok(BatchStatus::Started));
        assert!("RUNNING".parse::<BatchStatus>().is_err());
    }

    #[test]
    fn test_symbol_list_reads_both_encodings() {
        let expected = SymbolList::new(["AAPL", "MSFT", "NVDA"]);

        assert_eq!(SymbolList::from_stored("AAPL,MSFT,NVDA"), expected);
        assert_eq!(SymbolList::from_stored(" aapl, msft ,nvda "), expected);
        assert_eq!(SymbolList::from_stored("AAPL|MSFT|NVDA"), expected);
        assert_eq!(SymbolList::from_stored(r#"["AAPL","MSFT","NVDA"]"#), expected);
        assert_eq!(SymbolList::from_stored("[AAPL, MSFT, NVDA]"), expected);
        assert_eq!(SymbolList::from_stored(r#""AAPL,MSFT,NVDA""#), expected);
        assert!(SymbolList::from_stored("").is_empty());
        assert!(SymbolList::from_stored("[]").is_empty());
    }

    #[test]
    fn test_symbol_list_always_writes_json() {
        let list = SymbolList::from_stored("AAPL,MSFT");
        assert_eq!(list.to_stored(), r#"["AAPL","MSFT"]"#);
        assert_eq!(SymbolList::from_stored(&list.to_stored()), list);
    }

    #[test]
    fn test_symbol_list_deserializes_from_json_string_or_array() {
        let from_array: SymbolList = serde_json::from_str(r#"["AMD","INTC"]"#).unwrap();
        let from_string: SymbolList = serde_json::from_str(r#""AMD,INTC""#).unwrap();
        assert_eq!(from_array, from_string);
        assert_eq!(from_array.len(), 2);
    }

    #[test]
    fn test_zombie_detection_uses_updated_at() {
        let now = Utc::now();
        let mut batch = BatchRecord {
            id: 1,
            candidate_symbols: SymbolList::new(["AAPL", "MSFT"]),
            date: now.date_naive(),
            status: BatchStatus::Started,
            winner_symbol: None,
            rationale: None,
            raw_output: None,
            created_at: now - chrono::Duration::hours(3),
            updated_at: now - chrono::Duration::minutes(45),
        };
        assert!(batch.is_zombie(now, chrono::Duration::minutes(30)));

        batch.updated_at = now - chrono::Duration::minutes(5);
        assert!(!batch.is_zombie(now, chrono::Duration::minutes(30)));

        batch.updated_at = now - chrono::Duration::minutes(45);
        batch.status = BatchStatus::Pending;
        assert!(!batch.is_zombie(now, chrono::Duration::minutes(30)));
    }

    #[test]
    fn test_promoted_batch_is_completed_with_winner() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let batch = NewBatch::promoted("pltr", date);
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.winner_symbol.as_deref(), Some("PLTR"));
        assert_eq!(batch.symbols.len(), 1);
    }
}
