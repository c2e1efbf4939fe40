// Public modules
pub mod abi;
pub mod address_book;
pub mod artifacts;
pub mod beacon;
pub mod capability;
pub mod chain;
pub mod config;
pub mod configurator;
pub mod environment;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod platform;
pub mod provision;
pub mod types;

// Internal modules - not part of public API
pub(crate) mod local_files;
pub(crate) mod paths;

// Public modules for CLI access
pub mod defaults;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
pub use types::{Address, Selector, TxHash};
