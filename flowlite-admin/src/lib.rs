//! flowlite-admin — operator command surface over the flowlite engine.
//!
//! One command struct per administrative operation, executed against an
//! [`commands::AdminContext`]. The wire layer that would carry these
//! commands (REST, RPC) is out of scope; callers construct and execute
//! them in-process.

pub mod commands;

pub use commands::{
    AddJobCommand, AdminContext, GetFailedJobsCommand, ReplayFailedJobCommand,
    RetryFlowNodeCommand,
};
