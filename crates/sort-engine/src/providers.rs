use sort_types::{JobOptions, ValidationError, VisionProvider};
use std::collections::HashMap;
use std::sync::Arc;

/// Vision providers by name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn VisionProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the provider's own name, replacing any previous entry.
    pub fn register(&mut self, provider: Arc<dyn VisionProvider>) {
        let name = provider.name().to_string();
        if self.providers.insert(name.clone(), provider).is_some() {
            tracing::warn!(provider = %name, "vision provider replaced");
        }
    }

    pub fn with(mut self, provider: Arc<dyn VisionProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn VisionProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Option checks plus "the requested provider is registered".
    pub fn validate(&self, options: &JobOptions) -> Result<(), ValidationError> {
        options.validate()?;
        if !self.contains(&options.provider) {
            return Err(ValidationError::UnknownProvider(options.provider.clone()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
