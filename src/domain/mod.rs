pub mod item;
pub mod subscribers;
pub mod types;

pub use item::{CandidateEvent, ContentItem};
pub use subscribers::SubscriberRegistry;
pub use types::{ConnectionState, PipelineSnapshot, ReportRecord};
