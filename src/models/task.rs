use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::batch::SymbolList;

/// Which queue a task lives in. Individual work always drains first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Individual,
    BatchComparison,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Individual => write!(f, "individual"),
            TaskKind::BatchComparison => write!(f, "batch_comparison"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualTask {
    pub candidate_id: i64,
    pub symbol: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTask {
    pub batch_id: i64,
    pub symbols: SymbolList,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    Individual(IndividualTask),
    BatchComparison(BatchTask),
}

/// Unit of work waiting in the in-memory queue. Never persisted.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub payload: TaskPayload,
    pub enqueued_at: DateTime<Utc>,
}

impl Task {
    pub fn new(payload: TaskPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            enqueued_at: Utc::now(),
        }
    }

    pub fn individual(candidate_id: i64, symbol: impl Into<String>, date: NaiveDate) -> Self {
        Self::new(TaskPayload::Individual(IndividualTask {
            candidate_id,
            symbol: symbol.into(),
            date,
        }))
    }

    pub fn batch(batch_id: i64, symbols: SymbolList, date: NaiveDate) -> Self {
        Self::new(TaskPayload::BatchComparison(BatchTask {
            batch_id,
            symbols,
            date,
        }))
    }

    pub fn kind(&self) -> TaskKind {
        match self.payload {
            TaskPayload::Individual(_) => TaskKind::Individual,
            TaskPayload::BatchComparison(_) => TaskKind::BatchComparison,
        }
    }

    pub fn batch_id(&self) -> Option<i64> {
        match &self.payload {
            TaskPayload::BatchComparison(batch) => Some(batch.batch_id),
            TaskPayload::Individual(_) => None,
        }
    }

    /// Short description used in logs and the status endpoint.
    pub fn label(&self) -> String {
        match &self.payload {
            TaskPayload::Individual(t) => format!("individual:{}@{}", t.symbol, t.date),
            TaskPayload::BatchComparison(t) => format!("batch#{}{}", t.batch_id, t.symbols),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_labels() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let individual = Task::individual(7, "AAPL", date);
        assert_eq!(individual.label(), "individual:AAPL@2026-10-16");
        assert_eq!(individual.kind(), TaskKind::Individual);
        assert_eq!(individual.batch_id(), None);

        let batch = Task::batch(12, SymbolList::new(["AAPL", "MSFT"]), date);
        assert_eq!(batch.label(), "batch#12[AAPL,MSFT]");
        assert_eq!(batch.kind(), TaskKind::BatchComparison);
        assert_eq!(batch.batch_id(), Some(12));
    }

    #[test]
    fn test_task_kind_wire_names() {
        assert_eq!(serde_json::to_string(&TaskKind::Individual).unwrap(), "\"individual\"");
        assert_eq!(
            serde_json::to_string(&TaskKind::BatchComparison).unwrap(),
            "\"batch_comparison\""
        );
    }
}
