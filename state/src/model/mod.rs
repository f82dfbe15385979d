mod filter;
mod invariants;
mod pass;
mod redirect;

pub use filter::InclusionFilter;
pub use invariants::HistoryViolation;
pub use invariants::find_history_violations;
pub use pass::PassCounts;
pub use pass::PassRecord;
pub use pass::PassStatus;
pub use redirect::BatchMarker;
pub use redirect::Page;
pub use redirect::RedirectCandidate;
pub use redirect::RedirectTarget;
pub use redirect::RedirectVersion;
pub use redirect::ReplacePolicy;

pub(crate) use pass::PassRow;
pub(crate) use pass::to_sql_count;
pub(crate) use redirect::PageRow;
pub(crate) use redirect::RedirectRow;
pub(crate) use redirect::RedirectVersionRow;
