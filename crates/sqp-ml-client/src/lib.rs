//! Client for the promptable video segmentation service.
//!
//! The service owns model weights and per-session inference state. This
//! crate speaks its HTTP contract and exposes it to the tracker as a
//! [`sqp_media::tracker::PromptableSegmenter`] backend.

pub mod client;
pub mod error;
pub mod retry;
pub mod segmenter;
pub mod types;

pub use client::{SegmenterClient, SegmenterClientConfig};
pub use error::{MlError, MlResult};
pub use retry::RetryConfig;
pub use segmenter::RemoteSegmenter;
