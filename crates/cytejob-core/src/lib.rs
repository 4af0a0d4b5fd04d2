pub mod error;
pub mod job;
pub mod normalize;
pub mod poller;
pub mod resolver;
pub mod submit;
pub mod traits;


pub use error::{ApiError, ErrorKind, classify_failure_message};
pub use job::{ClusterState, ClusterStatusMap, JobId, JobSnapshot, JobState, PollConfig};
pub use normalize::{AnnotationRecord, AnnotationTable, normalize};
pub use poller::{JobPoller, PollEvent, PollReporter, PollState, TracingPollReporter};
pub use resolver::resolve;
pub use submit::{report_url, submit_job};
pub use traits::{ApiOutcome, JobTransport, ProgressFrame, ProgressSink, ResponseBody};
