//! # textpilot-client
//!
//! Client side of the TextPilot sync core: a local message store that merges
//! the live feed and local sends by message id, selection and composer
//! state, and an HTTP/SSE client for the server.

pub mod api;
pub mod error;
pub mod events;
pub mod state;
pub mod store;
pub mod sync;

pub use api::{ApiClient, ChatApi, Feed};
pub use error::{ClientError, Result};
pub use events::FeedItem;
pub use state::{Composer, SelectionState};
pub use store::{ChatStore, ChatSummary, MergeOutcome};
pub use sync::{ChatSync, FeedHandle};
