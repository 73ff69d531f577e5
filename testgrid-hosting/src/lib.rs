//! Test host lifecycle management for Testgrid
//!
//! Provides the [`TestHostProvider`] capability that the engine uses to
//! launch and tear down test host processes, the process-backed default
//! implementation, and the adapter extension cache.

pub mod error;
pub mod extensions;
pub mod process;
pub mod provider;

// Re-export main types
pub use error::HostingError;
pub use extensions::{dedup_ordered, ExtensionCache};
pub use process::{ProcessHostConfig, ProcessTestHostProvider};
pub use provider::{HostLaunchedEvent, HostStartInfo, TestHostProvider};
