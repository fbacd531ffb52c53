//! Per-message decision pipeline.
//!
//! Every unseen message flows through:
//! 1. `SenderFilter::evaluate()`: exact/suffix exclusion (no classifier call)
//! 2. `sanitize_body()` + `ClassifierClient::classify()`
//! 3. `Action::from_classification()`: exactly one action
//! 4. `DecisionEngine` executes it: move, reply + flag, or flag
//!
//! The poll loop drives one sweep per tick.

pub mod poller;
pub mod processor;
pub mod reply;
pub mod rules;
pub mod sanitize;
pub mod types;

pub use poller::{run_poll_loop, run_sweep, spawn_poll_loop};
pub use processor::{DecisionEngine, EngineConfig};
pub use reply::{CcPolicy, ReplyComposer};
pub use rules::SenderFilter;
pub use types::{Action, Classification, Disposition, Intent, MessageOutcome, SweepReport};
