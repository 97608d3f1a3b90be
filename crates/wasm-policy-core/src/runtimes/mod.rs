//! Host runtimes: compile guest wasm once, invoke it many times over one of
//! two wire protocols. See spec.md §4.1/§4.2 and §9's "dynamic dispatch"
//! design note, which this module follows literally: a small `{Wasi, Wapc}`
//! sum type around a uniform `run` call, rather than trait-object
//! inheritance.

pub mod wapc;
pub mod wasi;

use crate::envelope::RawRunner;

/// Deadlines expressed in wasmtime epoch ticks, mirroring the teacher's
/// `policy_evaluator_builder::EpochDeadlines`. `None` disables epoch
/// interruption for the runtime.
#[derive(Clone, Copy, Debug)]
pub struct EpochDeadlines {
    /// Deadline for guest module initialization.
    pub init: u64,
    /// Deadline for a single guest function invocation.
    pub func: u64,
}

/// Either host runtime, wrapped behind the uniform [`RawRunner`] contract so
/// that [`crate::envelope::EnvelopeRunner`] never needs to know which one it
/// is talking to.
pub enum Runtime {
    Wasi(wasi::WasiRuntime),
    Wapc(wapc::WapcRuntime),
}

impl Runtime {
    pub fn has_function(&self, name: &str) -> bool {
        match self {
            Runtime::Wasi(r) => r.has_function(name),
            Runtime::Wapc(_) => true,
        }
    }
}

/// Adapts a [`Runtime`] plus a fixed export name into a [`RawRunner`], the
/// shape `EnvelopeRunner` is generic over.
pub struct NamedExportRunner {
    runtime: Runtime,
    fn_name: String,
}

impl NamedExportRunner {
    pub fn new(runtime: Runtime, fn_name: impl Into<String>) -> Self {
        Self {
            runtime,
            fn_name: fn_name.into(),
        }
    }
}

impl RawRunner for NamedExportRunner {
    fn run(&self, input: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
        match &self.runtime {
            Runtime::Wasi(r) => r
                .run(&self.fn_name, input)
                .map_err(anyhow::Error::from),
            Runtime::Wapc(r) => r.run(&self.fn_name, input).map_err(anyhow::Error::from),
        }
    }
}
