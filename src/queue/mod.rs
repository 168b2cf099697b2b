//! Offline action queue.
//!
//! Actions that could not reach the server are stored durably per collection
//! and replayed in order once connectivity returns. A collection is cleared
//! only after every one of its records was accepted.

mod scheduler;
mod store;
mod sync;

pub use scheduler::{Connectivity, SyncOutcome, SyncScheduler};
pub use store::{ActionStore, Calculation, ChatMessage, Collection, QueuedAction};
pub use sync::{drain, SyncTag};
