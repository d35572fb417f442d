use std::sync::Arc;

use arc_swap::ArcSwap;
use modelgate_storage::{MappingRow, StorageSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("no mapping configured for model alias {0}")]
    UnknownAlias(String),
    #[error("provider {provider_id} referenced by mapping is missing or disabled")]
    ProviderUnavailable { provider_id: i64 },
}

/// One resolved hop: the provider to call, the upstream model name to send,
/// and the mapping's config overlay.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub provider_id: i64,
    pub provider_name: String,
    pub provider_kind: String,
    pub base_url: String,
    pub upstream_model: String,
    pub config_overlay: serde_json::Value,
}

/// Maps client-facing model aliases to an ordered list of provider targets.
/// Tenant-scoped mappings are left unresolved for this deployment; every
/// mapping is treated as global, matching the original `tenant_id=None`
/// default.
pub struct ModelResolver {
    snapshot: ArcSwap<StorageSnapshot>,
}

impl ModelResolver {
    pub fn new(snapshot: StorageSnapshot) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn replace_snapshot(&self, snapshot: StorageSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }

    /// Ordered by `order_index`, as persisted.
    pub fn resolve(&self, alias: &str) -> Result<Vec<ResolvedTarget>, ResolverError> {
        let snapshot = self.snapshot.load();
        let mappings = snapshot
            .mappings_by_alias
            .get(alias)
            .ok_or_else(|| ResolverError::UnknownAlias(alias.to_string()))?;
        if mappings.is_empty() {
            return Err(ResolverError::UnknownAlias(alias.to_string()));
        }

        let mut rows: Vec<&MappingRow> = mappings.iter().collect();
        rows.sort_by_key(|m| (m.order_index, m.id));

        let mut targets = Vec::with_capacity(rows.len());
        for mapping in rows {
            let provider = snapshot
                .providers
                .get(&mapping.provider_id)
                .filter(|p| p.is_active())
                .ok_or(ResolverError::ProviderUnavailable {
                    provider_id: mapping.provider_id,
                })?;
            targets.push(ResolvedTarget {
                provider_id: provider.id,
                provider_name: provider.name.clone(),
                provider_kind: provider.kind.clone(),
                base_url: provider.base_url.clone(),
                upstream_model: mapping.upstream_model.clone(),
                config_overlay: mapping.config_overlay.clone(),
            });
        }
        Ok(targets)
    }

    /// The first eligible target for `alias`, honoring `is_default` when set
    /// on more than one row, otherwise falling back to `order_index` order.
    pub fn resolve_default(&self, alias: &str) -> Result<ResolvedTarget, ResolverError> {
        let snapshot = self.snapshot.load();
        let mappings = snapshot
            .mappings_by_alias
            .get(alias)
            .ok_or_else(|| ResolverError::UnknownAlias(alias.to_string()))?;

        let default_row = mappings
            .iter()
            .find(|m| m.is_default)
            .or_else(|| mappings.iter().min_by_key(|m| (m.order_index, m.id)))
            .ok_or_else(|| ResolverError::UnknownAlias(alias.to_string()))?;

        let provider = snapshot
            .providers
            .get(&default_row.provider_id)
            .filter(|p| p.is_active())
            .ok_or(ResolverError::ProviderUnavailable {
                provider_id: default_row.provider_id,
            })?;

        Ok(ResolvedTarget {
            provider_id: provider.id,
            provider_name: provider.name.clone(),
            provider_kind: provider.kind.clone(),
            base_url: provider.base_url.clone(),
            upstream_model: default_row.upstream_model.clone(),
            config_overlay: default_row.config_overlay.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelgate_storage::{CredentialRow, ProviderRow};
    use std::collections::HashMap;

    fn snapshot_with_two_hops() -> StorageSnapshot {
        let mut providers = HashMap::new();
        providers.insert(
            1,
            ProviderRow {
                id: 1,
                name: "primary".into(),
                kind: "openai".into(),
                base_url: "https://a.example".into(),
                config: serde_json::json!({}),
                status: "active".into(),
                request_timeout_seconds: 30,
                max_in_flight_retries: 0,
            },
        );
        providers.insert(
            2,
            ProviderRow {
                id: 2,
                name: "secondary".into(),
                kind: "openai".into(),
                base_url: "https://b.example".into(),
                config: serde_json::json!({}),
                status: "active".into(),
                request_timeout_seconds: 30,
                max_in_flight_retries: 0,
            },
        );

        let mut mappings_by_alias = HashMap::new();
        mappings_by_alias.insert(
            "gpt-4".to_string(),
            vec![
                MappingRow {
                    id: 10,
                    alias_name: "gpt-4".into(),
                    provider_id: 2,
                    upstream_model: "gpt-4-secondary".into(),
                    order_index: 1,
                    is_default: false,
                    config_overlay: serde_json::json!({}),
                },
                MappingRow {
                    id: 11,
                    alias_name: "gpt-4".into(),
                    provider_id: 1,
                    upstream_model: "gpt-4-primary".into(),
                    order_index: 0,
                    is_default: true,
                    config_overlay: serde_json::json!({}),
                },
            ],
        );

        StorageSnapshot {
            providers,
            credentials_by_provider: HashMap::<i64, Vec<CredentialRow>>::new(),
            mappings_by_alias,
        }
    }

    #[test]
    fn resolve_orders_by_order_index() {
        let resolver = ModelResolver::new(snapshot_with_two_hops());
        let targets = resolver.resolve("gpt-4").unwrap();
        assert_eq!(targets[0].provider_id, 1);
        assert_eq!(targets[1].provider_id, 2);
    }

    #[test]
    fn resolve_default_prefers_is_default_flag_over_order() {
        let resolver = ModelResolver::new(snapshot_with_two_hops());
        let target = resolver.resolve_default("gpt-4").unwrap();
        assert_eq!(target.provider_id, 1);
    }

    #[test]
    fn unknown_alias_errors() {
        let resolver = ModelResolver::new(snapshot_with_two_hops());
        assert!(matches!(
            resolver.resolve("nonexistent"),
            Err(ResolverError::UnknownAlias(_))
        ));
    }
}
