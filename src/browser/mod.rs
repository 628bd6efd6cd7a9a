pub mod credentials;
pub mod session;

pub use credentials::{CredentialStore, Credentials, FileCredentialStore, NoCredentials};
pub use session::{BrowserSessionHandle, BrowserSessionManager, PageObserver};
