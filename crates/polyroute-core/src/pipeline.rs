use std::sync::Arc;

use polyroute_common::ProxyError;
use polyroute_compat::CompatFilter;
use polyroute_protocol::Protocol;
use polyroute_provider::{AdapterConfig, HttpTransport, ProviderAdapter, SnapshotWriter};
use polyroute_router::Target;

use crate::config::RouterTable;
use crate::registry::ModuleRegistry;

/// One request's pipeline: codec endpoints, compatibility filter, and the
/// provider adapter. Module instances are borrowed from the registry; only
/// this struct is per-request.
pub struct Pipeline {
    pub entry: Protocol,
    pub provider_protocol: Protocol,
    pub target: Target,
    pub compat: Arc<CompatFilter>,
    pub adapter: Arc<ProviderAdapter>,
}

/// Builds pipelines for selected targets, reusing registry instances.
pub struct PipelineAssembler {
    registry: ModuleRegistry,
    transport: Arc<HttpTransport>,
    snapshots: Option<SnapshotWriter>,
    responses_compat_bypass: bool,
}

impl PipelineAssembler {
    pub fn new(
        registry: ModuleRegistry,
        transport: Arc<HttpTransport>,
        snapshots: Option<SnapshotWriter>,
        responses_compat_bypass: bool,
    ) -> Self {
        Self {
            registry,
            transport,
            snapshots,
            responses_compat_bypass,
        }
    }

    pub fn assemble(
        &self,
        table: &RouterTable,
        entry: Protocol,
        target: &Target,
    ) -> Result<Pipeline, ProxyError> {
        let provider = table.providers.get(&target.provider_id).ok_or_else(|| {
            ProxyError::internal(format!(
                "target {} references unknown provider",
                target.runtime_key()
            ))
        })?;
        let auth = provider.keys.get(&target.key_alias).ok_or_else(|| {
            ProxyError::internal(format!(
                "target {} references unknown key alias",
                target.runtime_key()
            ))
        })?;

        let compat = self
            .registry
            .compat_for(provider.family, self.responses_compat_bypass);
        let adapter = self.registry.adapter_for(
            &provider.id,
            &target.key_alias,
            &provider.config_hash,
            || {
                ProviderAdapter::new(
                    AdapterConfig {
                        provider_id: provider.id.clone(),
                        family: provider.family,
                        base_url: provider.base_url.clone(),
                        endpoint: provider.endpoint.clone(),
                        default_headers: provider.default_headers.clone(),
                        timeout: provider.timeout,
                    },
                    auth.clone(),
                    self.transport.clone(),
                    self.snapshots.clone(),
                )
            },
        );

        Ok(Pipeline {
            entry,
            provider_protocol: target.protocol,
            target: target.clone(),
            compat,
            adapter,
        })
    }
}
