//! State module for tracking dispatch and harvest progress
//!
//! # Components
//!
//! - `Capacity`: Two-dimensional resource vector (requests + optional tokens)
//! - `WorkItem`: A payload with its id, redo counter and estimated cost
//! - `StatusTracker`: Per-loop counters and the shared cool-down timestamp
//! - `ArticleState`: Terminal states recorded in the harvest ledger
//! - `SiteState`: Per-site results collected by the crawl coordinator

mod article_state;
mod capacity;
mod site_state;
mod status;
mod work_item;

// Re-export main types
pub use article_state::ArticleState;
pub use capacity::Capacity;
pub use site_state::SiteState;
pub use status::StatusTracker;
pub use work_item::WorkItem;
