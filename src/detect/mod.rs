mod backend;
mod backends;
mod policy;
mod registry;
mod result;

pub use backend::Detector;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use policy::{CandidatePolicy, DEFAULT_MAX_RESULTS, DEFAULT_SCORE_FLOOR};
pub use registry::{open_detector, DetectorOptions, STUB_MODEL_PREFIX};
pub use result::{Candidate, Category};
