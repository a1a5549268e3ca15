pub mod attachment;
pub mod processing_error;
pub mod work_item;

pub use attachment::{AttachmentRecord, AttachmentSpec, AttachmentState};
pub use processing_error::{ErrorKind, ProcessingErrorRecord};
pub use work_item::{FailureKind, ItemOutcome, ItemStatus, WorkItem};
