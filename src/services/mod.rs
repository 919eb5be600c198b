pub mod progress;
pub mod request_builder;
pub mod srt_writer;

pub use progress::{LogProgress, NoopProgress, ProgressEvent, ProgressSink};
pub use request_builder::RequestBuilder;
pub use srt_writer::SrtWriter;
