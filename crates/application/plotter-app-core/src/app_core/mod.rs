pub mod events;
pub mod reducer;
pub mod store;

pub use events::SyncEvent;
pub use reducer::reduce;
pub use store::SyncStore;
