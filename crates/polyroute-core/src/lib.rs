//! Request orchestration: configuration tables, the module registry,
//! pipeline assembly, the streaming manager, and the per-request handler.

mod config;
mod handler;
mod pipeline;
mod registry;
mod state;
mod stream;
mod workflow;

pub use config::{
    ConfigDocument, ConfigError, KeyBindingConfig, ModelCaps, ProviderConfig, RouterTable,
};
pub use handler::{ProxyCall, ProxyReply, ProxyService};
pub use pipeline::{Pipeline, PipelineAssembler};
pub use registry::ModuleRegistry;
pub use state::AppState;
pub use stream::StreamingManager;
pub use workflow::Workflow;
