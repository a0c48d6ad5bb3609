pub mod config;
pub mod coordinator;
pub mod load;
pub mod registry;
pub mod resharding;
pub mod router;
pub mod store;
pub mod types;

use thiserror::Error;

/// Core error type for routing and resharding operations
#[derive(Error, Debug)]
pub enum ShardError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connectivity Error: {0}")]
    Connectivity(String),
    #[error("Constraint Violation: {0}")]
    Constraint(String),
    #[error("Registry Error: {0}")]
    Registry(String),
    #[error("Config Error: {0}")]
    Config(String),
    #[error("Internal Error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ShardError>;

pub use config::Config;
pub use coordinator::Coordinator;
pub use load::{LoadStore, LoadTracker, MemoryLoadStore};
pub use registry::{
    dedicated_host_name, dedicated_host_user, HostEntry, HostGroup, MemoryConnector,
    MemoryRegistry, ShardConnector, ShardRegistry,
};
pub use resharding::ReshardingEngine;
pub use router::ShardRouter;
pub use store::{DialogueStore, MemoryDialogueStore, MemoryDirectory, UserDirectory};
pub use types::{Message, User, UserId};
