//! Loggie Discovery CRD Definitions
//!
//! Kubernetes Custom Resource Definitions (`loggie.io/v1beta1`) consumed by
//! the discovery controller.

pub mod log_config;
pub mod pipeline_refs;
pub mod selector;
pub mod vm;

pub use log_config::*;
pub use pipeline_refs::*;
pub use selector::*;
pub use vm::*;
