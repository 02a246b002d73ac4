pub mod recorder;
pub mod types;

pub use recorder::{CredentialSink, RecordSink};
pub use types::{CaptureRecord, RecordKind};
