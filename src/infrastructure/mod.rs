pub mod features;
pub mod persistence;

pub use features::{FeatureSnapshot, InMemoryFeatureProvider};
pub use persistence::{InMemoryDocumentRepository, JsonFileRepository};
