mod env;
mod error;
mod id;

pub use env::{EnvOverrides, SystemPromptSource};
pub use error::{ErrorKind, ProxyError, error_type_for_status};
pub use id::RequestId;
