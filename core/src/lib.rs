pub mod id;
pub mod model;
pub mod pairing;
pub mod wire;

pub use id::{ContentId, SourceId};
pub use model::{ContentEntry, OutputState, ProgrammeInfo, SourceCatalog, SourceRecord};
pub use pairing::{ConnectionDescriptor, DEFAULT_PORT, MalformedCodeError};

/// Server protocol version this client speaks.
pub const SUPPORTED_VERSION: &str = "0.6.0";
