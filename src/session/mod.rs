//! Session lifecycle: state, the orchestrating engine, live-session store and
//! export records.

mod export;
mod orchestrator;
mod state;
mod store;

pub use export::{RoundRow, SessionRecord, SessionSummary};
pub use orchestrator::{
    ExportReceipt, MapView, Orchestrator, RoundOpening, RoundSummary, SessionStatus,
    TimerStatus, TurnReply,
};
pub use state::{
    CompletionReason, LearnerProfile, ProfileAnswers, Round, SessionPhase, SessionState,
    Speaker, Turn, TurnSource, CONFIDENCE_RANGE,
};
pub use store::{SessionHandle, SessionStore};
