use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use modelgate_common::{CredentialId, ProviderId};
use modelgate_provider_core::DecryptedCredential;
use modelgate_storage::{CredentialRow, Storage, StorageSnapshot};

use crate::encryption::Encryptor;
use crate::shared_store::SharedStore;

/// Key-selection strategies. `Priority` and `LeastUsed` are total orders
/// over the eligible set; `RoundRobin` walks a shared cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    Priority,
    LeastUsed,
    RoundRobin,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialStoreError {
    #[error("no credentials configured for provider {0}")]
    NoCredentials(ProviderId),
    #[error("no eligible credential for provider {0}")]
    NoEligibleCredential(ProviderId),
    #[error("credential {0} decryption failed: {1}")]
    Decrypt(CredentialId, String),
    #[error("credential encryption failed: {0}")]
    Encrypt(String),
}

/// Selects, decrypts, and records usage for provider credentials. Reads
/// are served from an `ArcSwap<StorageSnapshot>` refreshed by the
/// admin-write path.
pub struct CredentialStore {
    snapshot: ArcSwap<StorageSnapshot>,
    storage: Arc<dyn Storage>,
    shared: Arc<dyn SharedStore>,
    encryptor: Arc<Encryptor>,
}

impl CredentialStore {
    pub fn new(
        snapshot: StorageSnapshot,
        storage: Arc<dyn Storage>,
        shared: Arc<dyn SharedStore>,
        encryptor: Arc<Encryptor>,
    ) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
            storage,
            shared,
            encryptor,
        }
    }

    pub fn replace_snapshot(&self, snapshot: StorageSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }

    /// The eligibility filter: active status, fewer than 5 consecutive
    /// failures, unexhausted daily/monthly quota, and not currently
    /// throttled by its own per-credential rpm/tpm limit.
    async fn eligible(&self, rows: &[CredentialRow], exclude: &[CredentialId]) -> Vec<CredentialRow> {
        let mut out = Vec::new();
        for row in rows {
            if exclude.contains(&row.id) {
                continue;
            }
            if !row.is_active() || row.consecutive_failures >= 5 {
                continue;
            }
            if let Some(quota) = row.daily_quota {
                if row.current_daily_usage >= quota {
                    continue;
                }
            }
            if let Some(quota) = row.monthly_quota {
                if row.current_monthly_usage >= quota {
                    continue;
                }
            }
            if let Some(rpm) = row.requests_per_minute {
                let count = self
                    .shared
                    .get_counter(&format!("rate_limit:key:{}:rpm", row.id))
                    .await;
                if count >= rpm as i64 {
                    continue;
                }
            }
            if let Some(tpm) = row.tokens_per_minute {
                let count = self
                    .shared
                    .get_counter(&format!("rate_limit:key:{}:tpm", row.id))
                    .await;
                if count >= tpm as i64 {
                    continue;
                }
            }
            out.push(row.clone());
        }
        out
    }

    /// Picks one eligible credential for `provider_id` under `strategy`,
    /// skipping any id in `exclude` (the credentials already tried and
    /// failed within the current fallback attempt).
    pub async fn select(
        &self,
        provider_id: ProviderId,
        strategy: SelectionStrategy,
        exclude: &[CredentialId],
    ) -> Result<CredentialRow, CredentialStoreError> {
        let snapshot = self.snapshot.load();
        let rows = snapshot
            .credentials_by_provider
            .get(&provider_id)
            .cloned()
            .ok_or(CredentialStoreError::NoCredentials(provider_id))?;
        if rows.is_empty() {
            return Err(CredentialStoreError::NoCredentials(provider_id));
        }

        let mut eligible = self.eligible(&rows, exclude).await;
        if eligible.is_empty() {
            return Err(CredentialStoreError::NoEligibleCredential(provider_id));
        }

        let chosen = match strategy {
            SelectionStrategy::Priority => eligible
                .into_iter()
                .min_by_key(|c| (c.priority, c.id))
                .expect("non-empty"),
            SelectionStrategy::LeastUsed => eligible
                .into_iter()
                .min_by_key(|c| (c.current_daily_usage, c.id))
                .expect("non-empty"),
            SelectionStrategy::RoundRobin => {
                eligible.sort_by_key(|c| c.id);
                let key = format!("round_robin:provider:{provider_id}");
                let idx = self
                    .shared
                    .next_round_robin_index(&key, eligible.len(), Duration::from_secs(3600))
                    .await;
                eligible.swap_remove(idx)
            }
        };

        Ok(chosen)
    }

    pub fn decrypt(&self, row: &CredentialRow) -> Result<DecryptedCredential, CredentialStoreError> {
        let api_key = self
            .encryptor
            .decrypt(&row.key_ciphertext)
            .map_err(|e| CredentialStoreError::Decrypt(row.id, e.to_string()))?;
        Ok(DecryptedCredential { api_key })
    }

    /// Encrypts a plaintext API key for storage, the inverse of `decrypt`.
    /// Used by the admin surface when a new credential is submitted.
    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>, CredentialStoreError> {
        self.encryptor
            .encrypt(plaintext)
            .map_err(|e| CredentialStoreError::Encrypt(e.to_string()))
    }

    /// Applies the usage/failure bookkeeping contract and refreshes the
    /// per-credential rpm/tpm counters used by `eligible`.
    pub async fn record(
        &self,
        credential_id: CredentialId,
        tokens: i64,
        success: bool,
    ) -> Result<(), modelgate_storage::StorageError> {
        self.shared
            .incr_with_expiry(
                &format!("rate_limit:key:{credential_id}:rpm"),
                1,
                Duration::from_secs(60),
            )
            .await;
        if tokens > 0 {
            self.shared
                .incr_with_expiry(
                    &format!("rate_limit:key:{credential_id}:tpm"),
                    tokens,
                    Duration::from_secs(60),
                )
                .await;
        }
        self.storage
            .record_credential_usage(credential_id, tokens, success)
            .await
    }
}
