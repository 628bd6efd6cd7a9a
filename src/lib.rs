pub mod audio;
pub mod browser;
pub mod capabilities;
pub mod driver;
pub mod error;
pub mod join;
pub mod locator;
pub mod platform;
pub mod report;
pub mod server;
pub mod session;
pub mod utils;

// Re-export common items
pub use error::SessionError;
pub use platform::{classify, Classification, PlatformKind};
pub use session::{SessionController, SessionState};
