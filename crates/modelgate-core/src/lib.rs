pub mod audit;
pub mod bootstrap;
pub mod circuit_breaker;
pub mod credential_store;
pub mod encryption;
pub mod fallback;
pub mod rate_limiter;
pub mod resolver;
pub mod shared_store;

pub use audit::{AuditContext, AuditRecorder};
pub use bootstrap::{bootstrap, bootstrap_from_env, AppState, Bootstrap, CliArgs};
pub use circuit_breaker::CircuitBreaker;
pub use credential_store::{CredentialStore, CredentialStoreError, SelectionStrategy};
pub use encryption::{mask_secret, Encryptor, EncryptionError};
pub use fallback::{AttemptRecord, FallbackExecutor, FallbackResult};
pub use rate_limiter::{CompositeCheckOutcome, CompositeRateLimiter, RateLimitDimension, RateLimitResult, RateLimiter};
pub use resolver::{ModelResolver, ResolvedTarget, ResolverError};
pub use shared_store::{InMemorySharedStore, SharedStore};
