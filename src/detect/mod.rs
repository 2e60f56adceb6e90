mod backend;
mod backends;
mod result;

pub use backend::{DetectionAdapter, DetectorBackend, DetectorConfig};
pub use backends::{ScriptedBackend, StubBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use result::{Detection, DetectionResult};
