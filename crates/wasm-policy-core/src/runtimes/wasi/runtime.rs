use std::sync::Mutex;

use crate::runtimes::EpochDeadlines;
use crate::runtimes::wasi::errors::WasiRuntimeError;
use crate::runtimes::wasi::stack::Stack;
use crate::runtimes::wasi::stack_pre::StackPre;

/// Compiles a wasm module once; every `run` call instantiates a fresh guest
/// instance, feeds bytes on stdin, invokes a named export, and collects
/// stdout/stderr. See spec.md §4.1.
///
/// `run` takes an exclusive lock for its whole duration (spec.md §5): the
/// three stdio buffers backing a call are reused across invocations, so
/// concurrent callers of the same `WasiRuntime` serialise on it. Callers
/// wanting parallelism across modules should hold distinct `WasiRuntime`s.
pub struct WasiRuntime {
    stack: Mutex<Stack>,
}

impl WasiRuntime {
    pub fn compile(
        engine: wasmtime::Engine,
        bytes: &[u8],
        epoch_deadlines: Option<EpochDeadlines>,
    ) -> Result<Self, WasiRuntimeError> {
        let module =
            wasmtime::Module::new(&engine, bytes).map_err(WasiRuntimeError::Compile)?;
        let stack_pre = StackPre::new(engine, module, epoch_deadlines)?;
        Ok(Self {
            stack: Mutex::new(Stack::new(stack_pre)),
        })
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.stack
            .lock()
            .expect("wasi runtime mutex poisoned")
            .has_function(name)
    }

    pub fn run(&self, fn_name: &str, input: &[u8]) -> Result<Vec<u8>, WasiRuntimeError> {
        let stack = self.stack.lock().expect("wasi runtime mutex poisoned");
        let result = stack.run(fn_name, input)?;
        if !result.stderr.is_empty() {
            tracing::warn!(stderr = %result.stderr, function = fn_name, "guest wrote to stderr");
        }
        Ok(result.stdout)
    }
}
