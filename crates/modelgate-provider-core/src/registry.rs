use std::collections::HashMap;

use crate::provider::{ProviderConfig, ProviderConstructor};

/// Maps a provider `kind` string to a constructor. Registration happens once
/// at startup; admin writes that name an unknown kind are rejected before
/// they ever reach storage.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    constructors: HashMap<String, ProviderConstructor>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, constructor: ProviderConstructor) {
        self.constructors.insert(kind.into(), constructor);
    }

    pub fn is_known(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    pub fn build(
        &self,
        kind: &str,
        base_url: &str,
        config: &ProviderConfig,
    ) -> Option<std::sync::Arc<dyn crate::provider::Provider>> {
        let ctor = self.constructors.get(kind)?;
        Some(ctor(base_url, config))
    }
}
