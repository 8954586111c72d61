#![forbid(unsafe_code)]

pub mod gateway;
pub mod http;
pub mod repository;
pub mod sqlite;

pub use gateway::{GatewayError, PersistenceGateway, RemoteProgress};
pub use http::{GatewayConfig, HttpProgressGateway};
pub use repository::{CachedProgress, InMemoryCache, ProgressCache, StorageError};
pub use sqlite::{SqliteCache, SqliteInitError};
