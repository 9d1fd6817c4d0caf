pub mod env;
mod loader;

pub use env::{
    AppConfig, ClassifierConfig, DirectoryConfig, SourceConfig, StreamConfig, SubscriberEntry,
};
pub use loader::load_config;
