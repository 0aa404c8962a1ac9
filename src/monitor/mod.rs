pub mod idle;
pub mod models;
pub mod registry;
pub mod session;

pub use idle::{IdleCompletionDetector, IdleState};
pub use models::{
    Headers, RequestMeta, ResourceError, ResourceId, ResourceRecord, ResourceState, ResponseMeta,
    TransferStage,
};
pub use registry::{Applied, ResourceCounts, ResourceLog, ResourceRegistry};
pub use session::{ScanEvent, ScanSession};
