pub mod breaker;
pub mod cache;
pub mod queue;
pub mod snapshot;

pub use breaker::CircuitBreaker;
pub use cache::{cache_key, ResponseCache};
pub use queue::{QueueStatus, RequestQueue};
pub use snapshot::{SnapshotManager, SnapshotSource, SnapshotState, Subscription};
