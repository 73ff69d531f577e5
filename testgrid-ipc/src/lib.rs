//! Inter-process communication for Testgrid
//!
//! This crate provides the wire protocol and transport abstractions used for
//! communication between the coordinator and test host processes.

pub mod error;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use error::IpcError;
pub use protocol::{
    AttachmentSet, DiscoveryComplete, DiscoveryCriteria, ExecutionComplete, HostEvent, HostRequest,
    LogSeverity, MessageEnvelope, ParallelismOptions, RunCriteria, RunStatistics, TestCase,
    TestOutcome, TestResult, TestRunItems, PROTOCOL_VERSION,
};
pub use transport::{HostConnection, HostEventReader, HostRequestWriter, StdioTransport};
