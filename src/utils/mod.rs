pub mod binary_resolver;
pub mod config;
pub mod system;
