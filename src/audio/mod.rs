pub mod capture;
pub mod sources;

pub use capture::{AudioCaptureManager, RecordingJob, RecordingStatus, StopOutcome};
pub use sources::{default_sources, AudioSourceDescriptor};
