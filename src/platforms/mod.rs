pub mod common;
pub mod facebook;
pub mod generic;
pub mod instagram;
pub mod tiktok;
pub mod traits;

use std::sync::Arc;

use crate::core::registry::PlatformRegistry;
use common::ResolverContext;

/// Registry with every platform resolver and the generic fallback.
pub fn build_registry(ctx: &ResolverContext) -> PlatformRegistry {
    let mut registry = PlatformRegistry::new(Arc::new(generic::GenericResolver::new(ctx)));
    registry.register(Arc::new(instagram::InstagramResolver::new(ctx)));
    registry.register(Arc::new(facebook::FacebookResolver::new(ctx)));
    registry.register(Arc::new(tiktok::TikTokResolver::new(ctx)));
    registry
}
