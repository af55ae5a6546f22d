pub mod services;

pub use services::{EngineRepositories, EngineServices};
