pub mod in_memory;
pub mod json_store;

pub use in_memory::InMemoryDocumentRepository;
pub use json_store::JsonFileRepository;
