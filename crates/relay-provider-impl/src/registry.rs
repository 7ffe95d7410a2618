//! Wires every built-in adapter into a [`ProviderRegistry`].

use std::sync::Arc;

use relay_provider_core::ProviderRegistry;

use crate::providers::{
    AzureOpenAiProvider, BedrockProvider, ClaudeConsoleProvider, ClaudeOfficialProvider,
    DroidProvider, GeminiApiProvider, GeminiProvider, OpenAiProvider, OpenAiResponsesProvider,
};

/// Registers the nine built-in account-kind adapters under their canonical
/// names (`"claude-official"`, `"claude-console"`, ...).
pub fn register_builtin_providers(registry: &mut ProviderRegistry) {
    registry.register(Arc::new(ClaudeOfficialProvider::new()));
    registry.register(Arc::new(ClaudeConsoleProvider::new()));
    registry.register(Arc::new(OpenAiProvider::new()));
    registry.register(Arc::new(OpenAiResponsesProvider::new()));
    registry.register(Arc::new(GeminiProvider::new()));
    registry.register(Arc::new(GeminiApiProvider::new()));
    registry.register(Arc::new(BedrockProvider::new()));
    registry.register(Arc::new(AzureOpenAiProvider::new()));
    registry.register(Arc::new(DroidProvider::new()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_all_nine_account_kinds() {
        let mut registry = ProviderRegistry::new();
        register_builtin_providers(&mut registry);
        for name in [
            "claude-official",
            "claude-console",
            "openai",
            "openai-responses",
            "gemini",
            "gemini-api",
            "bedrock",
            "azure-openai",
            "droid",
        ] {
            assert!(registry.get(name).is_some(), "missing provider {name}");
        }
    }
}
