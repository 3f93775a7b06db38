pub mod bandit;
pub mod consolidation;
pub mod export;
pub mod store;
pub mod summarize;

pub use bandit::BanditSelector;
pub use consolidation::{ConsolidationEngine, ConsolidationError, SleepReport};
pub use export::{write_all as write_exports, ExportSummary};
pub use store::{BatchRecord, DaySummary, EnvFact, LongDay, SqliteStore};
pub use summarize::{DaySummarizer, ExtractiveSummarizer};
