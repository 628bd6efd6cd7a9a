pub mod sequencer;
pub mod verifier;

pub use sequencer::{JoinAttempt, JoinPlan, JoinSequencer, StepOutcome, SubStep};
pub use verifier::{JoinVerifier, NotInMeetingReason, Verdict};
