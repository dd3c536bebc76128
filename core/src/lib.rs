//! Root of the `vizstream-core` library.
//!
//! Consumes the backend's debug stream and folds it into the cumulative
//! visualization state that renderers read.

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output goes through the CLI or the tracing stack.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod call_tree;
pub mod config_loader;
pub mod merge;
pub mod reducer;
pub mod session;
pub mod sse;
pub mod transport;

pub use call_tree::CallTreeBuilder;
pub use config_loader::ConfigLoader;
pub use config_loader::VizConfig;
pub use reducer::DebugState;
pub use reducer::ReduceOptions;
pub use reducer::reduce;
pub use session::SessionController;
pub use session::SessionPhase;
pub use session::SessionSnapshot;
pub use sse::FrameDecoder;
pub use transport::DebugTransport;
pub use transport::HttpTransport;
pub use transport::TransportError;

pub use vizstream_protocol as protocol;
