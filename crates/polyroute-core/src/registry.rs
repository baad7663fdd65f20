use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use polyroute_compat::CompatFilter;
use polyroute_protocol::ProviderFamily;
use polyroute_provider::ProviderAdapter;

/// Long-lived module instances, shared across requests. Keys carry the
/// config digest so a reload that changes a provider's settings gets a fresh
/// instance while unchanged ones are reused.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    compat: Mutex<HashMap<(ProviderFamily, bool), Arc<CompatFilter>>>,
    adapters: Mutex<HashMap<String, Arc<ProviderAdapter>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compat_for(&self, family: ProviderFamily, responses_bypass: bool) -> Arc<CompatFilter> {
        let mut compat = self.inner.compat.lock().expect("compat registry lock");
        compat
            .entry((family, responses_bypass))
            .or_insert_with(|| {
                let profile = CompatFilter::for_family(family).profile().clone();
                let profile = if family == ProviderFamily::Responses {
                    profile.with_bypass(responses_bypass)
                } else {
                    profile
                };
                Arc::new(CompatFilter::new(profile))
            })
            .clone()
    }

    /// Adapter instances are keyed by `(provider, key alias, config hash)`.
    pub fn adapter_for(
        &self,
        provider_id: &str,
        key_alias: &str,
        config_hash: &str,
        build: impl FnOnce() -> ProviderAdapter,
    ) -> Arc<ProviderAdapter> {
        let key = format!("{provider_id}\u{1f}{key_alias}\u{1f}{config_hash}");
        let mut adapters = self.inner.adapters.lock().expect("adapter registry lock");
        adapters.entry(key).or_insert_with(|| Arc::new(build())).clone()
    }

    /// Drop instances whose config hash is no longer current (post-reload).
    pub fn retain_adapters(&self, live_hashes: &[String]) {
        let mut adapters = self.inner.adapters.lock().expect("adapter registry lock");
        adapters.retain(|key, _| {
            key.rsplit('\u{1f}')
                .next()
                .is_some_and(|hash| live_hashes.iter().any(|live| live == hash))
        });
    }
}
