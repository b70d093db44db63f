mod batch;
mod candidate;
mod task;
mod verdict;

pub use batch::{BatchOutcome, BatchRecord, BatchStatus, NewBatch, SymbolList};
pub use candidate::{AnalysisStatus, CandidateRecord, CandidateVerdictUpdate, BATCH_WINNER};
pub use task::{BatchTask, IndividualTask, Task, TaskKind, TaskPayload};
pub use verdict::{
    clean_symbol, normalize_category, ComparisonVerdict, IndividualVerdict, ParseFailure,
    ParseOutcome, ParseStage, ParsedVerdict, PARSE_ERROR_STATUS,
};
