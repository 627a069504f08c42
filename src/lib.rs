pub mod config;
pub mod convert;
pub mod dedup;
pub mod fetch;
pub mod lookup;
pub mod manifest;
pub mod model;
pub mod orchestrator;
pub mod output;
pub mod process;

pub use config::Config;
pub use manifest::{ErrorManifest, ProcessingError};
pub use model::{DocumentDescriptor, Item, OutputBundle, Record};
pub use orchestrator::Orchestrator;
