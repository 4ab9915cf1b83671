// registrar-common: Shared services for the GitLab Runner registrar.
// Depends on `registrar-sdk`; holds the configuration document, the error
// taxonomy and the tracing / secret-masking infrastructure.

pub mod config_document;
pub mod constants;
pub mod error;
pub mod host_context;
pub mod secret_masker;
pub mod toml_util;
pub mod tracing;

// ---------------------------------------------------------------------------
// Re-exports for convenient access
// ---------------------------------------------------------------------------

pub use config_document::ConfigDocument;
pub use constants::WellKnownConfigFile;
pub use error::{RegistrarError, Result};
pub use host_context::{HostContext, HostPaths};
pub use secret_masker::SecretMasker;
pub use tracing::{TraceEventType, TraceManager, TraceSetting, Tracing};
