//! Bulk completion-request processing
//!
//! Reads a JSONL file of request bodies and posts them to a remote
//! completion endpoint under a requests-per-minute and tokens-per-minute
//! quota. Completion tokens are unknown until a response arrives, so the
//! processor normally starts with a cost probe.

mod mode;
mod processor;
mod request;
mod worker;

pub use mode::RequestMode;
pub use processor::{process_requests, ProcessReport};
pub use request::{load_requests, CompletionRequest, METADATA_KEY};
pub use worker::{
    remaining_quota, CompletionOutput, CompletionWorker, REMAINING_REQUESTS_HEADER,
    REMAINING_TOKENS_HEADER,
};
