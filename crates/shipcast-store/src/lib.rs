pub mod paths;
pub mod records;
pub mod store;

pub use records::{
    is_valid_transition, PerformanceKey, PerformanceRecord, PostRecord, PostStatus, StoreError,
};
pub use store::{Insights, LearningStore, SlotSummary};
