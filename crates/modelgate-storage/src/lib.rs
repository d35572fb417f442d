pub mod db;
pub mod entities;
pub mod snapshot;
pub mod storage;

pub use entities::users;
pub use snapshot::{CredentialRow, MappingRow, ProviderRow, StorageSnapshot};
pub use storage::{
    AuditRecordInput, NewCredential, NewMapping, NewProvider, SeaOrmStorage, Storage,
    StorageError, StorageResult,
};
