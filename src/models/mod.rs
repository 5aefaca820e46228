mod article;
mod run;
mod source;

pub use article::{Article, ArticleCandidate, Classification, MatchReason, NewArticle};
pub use run::{DailyDelta, DailyStats, OutcomeStatus, RunRecord, RunStatus, RunSummary, SourceOutcome};
pub use source::{Source, SourceStatus};
