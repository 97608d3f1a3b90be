//! Host runtime and review-chain controllers that delegate authentication,
//! authorization and admission decisions to sandboxed WebAssembly guest
//! modules loaded from the local filesystem.
//!
//! See `SPEC_FULL.md` in the repository root for the full design.

pub mod admission;
pub mod authenticator;
pub mod authorizer;
pub mod config;
pub mod envelope;
pub mod kubewarden;
pub mod review;
pub mod runtimes;

pub use admission::controller_chain::ControllerChain;
pub use admission::{AdmissionError, AdmissionModule, Attributes, ObjectConverter, RuleMatcher};
pub use config::{Config, ConfigError, LoadError, ModuleConfig, ModuleType};
pub use envelope::{EnvelopeError, EnvelopeRunner, JsonRunner, RawRunner};
