use std::sync::Arc;

use crate::platforms::traits::PlatformResolver;

pub struct PlatformRegistry {
    resolvers: Vec<Arc<dyn PlatformResolver>>,
    fallback: Arc<dyn PlatformResolver>,
}

impl PlatformRegistry {
    pub fn new(fallback: Arc<dyn PlatformResolver>) -> Self {
        Self {
            resolvers: Vec::new(),
            fallback,
        }
    }

    pub fn register(&mut self, resolver: Arc<dyn PlatformResolver>) {
        self.resolvers.push(resolver);
    }

    pub fn find_platform(&self, url: &str) -> Option<Arc<dyn PlatformResolver>> {
        self.resolvers.iter().find(|r| r.can_handle(url)).cloned()
    }

    /// Never fails: links no resolver claims go to the fallback.
    pub fn resolve_for(&self, url: &str) -> Arc<dyn PlatformResolver> {
        self.find_platform(url).unwrap_or_else(|| self.fallback.clone())
    }
}
