use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::target::{RouteCategory, Target};

struct Pool {
    targets: Vec<Target>,
    /// Monotonic rotation counter; every selection increments exactly once.
    counter: AtomicUsize,
}

/// Ordered target pools per category, with per-category round-robin state.
pub struct RoutePools {
    pools: HashMap<RouteCategory, Pool>,
}

impl RoutePools {
    pub fn new(pools: HashMap<RouteCategory, Vec<Target>>) -> Self {
        Self {
            pools: pools
                .into_iter()
                .map(|(category, targets)| {
                    (
                        category,
                        Pool {
                            targets,
                            counter: AtomicUsize::new(0),
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn targets(&self, category: RouteCategory) -> &[Target] {
        self.pools
            .get(&category)
            .map(|pool| pool.targets.as_slice())
            .unwrap_or(&[])
    }

    /// All targets across all categories, deduplicated by runtime key.
    pub fn all_targets(&self) -> Vec<&Target> {
        let mut seen = Vec::new();
        let mut out = Vec::new();
        for category in RouteCategory::ALL {
            for target in self.targets(*category) {
                if !seen.contains(&target.runtime_key()) {
                    seen.push(target.runtime_key());
                    out.push(target);
                }
            }
        }
        out
    }

    /// Claim the next rotation start index for a category.
    pub fn next_start(&self, category: RouteCategory) -> usize {
        self.pools
            .get(&category)
            .map(|pool| pool.counter.fetch_add(1, Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Find a target anywhere in the pools by its runtime key.
    pub fn find(&self, runtime_key: &str) -> Option<&Target> {
        for category in RouteCategory::ALL {
            if let Some(target) = self
                .targets(*category)
                .iter()
                .find(|target| target.runtime_key() == runtime_key)
            {
                return Some(target);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyroute_protocol::ProviderFamily;

    #[test]
    fn rotation_counter_is_monotonic() {
        let mut pools = HashMap::new();
        pools.insert(
            RouteCategory::Default,
            vec![
                Target::new("a", "k", "m", ProviderFamily::Openai),
                Target::new("b", "k", "m", ProviderFamily::Openai),
            ],
        );
        let pools = RoutePools::new(pools);
        assert_eq!(pools.next_start(RouteCategory::Default), 0);
        assert_eq!(pools.next_start(RouteCategory::Default), 1);
        assert_eq!(pools.next_start(RouteCategory::Default), 2);
        assert!(pools.targets(RouteCategory::Coding).is_empty());
    }
}
