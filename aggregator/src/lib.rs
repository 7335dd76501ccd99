//! Decoding and cost aggregation engine
//!
//! Turns a perfparser stream into bottom-up, top-down and caller/callee
//! views plus a replayable event log, and re-aggregates that log under
//! filters. [`session::PerfSession`] drives both as background tasks.

pub mod bottom_up;
pub mod caller_callee;
pub mod collector;
pub mod config;
pub mod filter;
pub mod process;
pub mod session;
pub mod top_down;
pub mod tree;

#[cfg(test)]
mod test_util;

pub use bottom_up::{BottomUpResults, FramePolicy};
pub use caller_callee::CallerCalleeResults;
pub use collector::{AnalysisResults, PerfDataCollector};
pub use config::{AnalysisConfig, CostAggregation};
pub use filter::{filter_results, Stopped};
pub use session::{ParserEvent, PerfSession, SessionError, TaskHandle, TaskOutcome};
pub use top_down::TopDownResults;
