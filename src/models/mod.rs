pub mod job;
pub mod loaders;
pub mod unit;

pub use job::{JobSnapshot, JobStatus, RemoteJob};
pub use loaders::{load_manifest, SubtitleManifest};
pub use unit::{
    OrderedResultSet, RecognitionResult, RecognitionUnit, ResultSlots, TokenCounter, TokenUsage,
};
