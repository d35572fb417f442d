pub mod mock;
pub mod openai;
pub mod sse;

use std::sync::Arc;

use modelgate_provider_core::{Provider, ProviderConfig, ProviderRegistry};

pub use mock::MockProvider;
pub use openai::OpenAiProvider;

/// Registers every adapter this build ships with. Called once at startup
/// before the registry is handed to `modelgate_core::bootstrap`.
pub fn register_builtin_providers(registry: &mut ProviderRegistry) {
    registry.register(
        "openai",
        Arc::new(|base_url: &str, config: &ProviderConfig| {
            Arc::new(OpenAiProvider::new(base_url, config)) as Arc<dyn Provider>
        }),
    );
    registry.register(
        "mock",
        Arc::new(|base_url: &str, config: &ProviderConfig| {
            Arc::new(MockProvider::new(base_url, config)) as Arc<dyn Provider>
        }),
    );
}
