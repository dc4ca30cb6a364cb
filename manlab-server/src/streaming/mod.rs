//! Large-object streaming from agents to dashboard clients.
//!
//! A download is prepared (optionally zipped agent-side), then streamed
//! through a bounded per-stream chunk channel into the HTTP response body
//! with backpressure, range support, and cooperative cancellation.

pub mod coordinator;
pub mod filename;
pub mod range;
pub mod router;
pub mod session;

pub use coordinator::{DownloadCoordinator, StreamingConfig};
pub use filename::sanitize_disposition_filename;
pub use range::{ByteRange, parse_range};
pub use router::{DeliverOutcome, StreamEvent, StreamReceiver, StreamRouter};
pub use session::{DownloadSession, DownloadState};
