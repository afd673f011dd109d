//! Stage-qualified model resolution and the process-wide model cache.

mod cache;
mod resolver;

pub use cache::ModelCache;
pub use resolver::{ModelSource, RegistryResolver};
