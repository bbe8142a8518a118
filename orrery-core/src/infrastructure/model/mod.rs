mod traits;
mod types;

pub use traits::ModelBackend;
pub use types::{DeltaStream, ModelError, ModelRequest, ModelResponse, ResponseDelta};
