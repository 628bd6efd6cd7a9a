pub mod diagnostics;
pub mod notify;

pub use diagnostics::{DiagnosticEvent, DiagnosticReporter};
pub use notify::{notifier_from_config, LogNotifier, Notifier, TelegramNotifier};
