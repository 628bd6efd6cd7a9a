pub mod controller;
pub mod events;
pub mod monitor;
pub mod registry;
pub mod state;

pub use controller::{
    Collaborators, LookupError, SessionController, SessionResult, StopAck, SubmitError,
};
pub use events::{ConsoleEventListener, EventEmitter, SessionEvent};
pub use monitor::{EndReason, LivenessMonitor};
pub use registry::SessionRegistry;
pub use state::{MeetingSession, SessionState};
