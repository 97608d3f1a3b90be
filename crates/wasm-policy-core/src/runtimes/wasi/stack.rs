use std::io::Cursor;

use wasi_common::pipe::{ReadPipe, WritePipe};
use wasmtime_wasi::sync::WasiCtxBuilder;

use crate::runtimes::wasi::errors::WasiRuntimeError;
use crate::runtimes::wasi::stack_pre::{Context, StackPre};

pub(crate) struct RunResult {
    pub(crate) stdout: Vec<u8>,
    pub(crate) stderr: String,
}

pub(crate) struct Stack {
    stack_pre: StackPre,
}

impl Stack {
    pub(crate) fn new(stack_pre: StackPre) -> Self {
        Self { stack_pre }
    }

    pub(crate) fn has_function(&self, name: &str) -> bool {
        self.stack_pre.has_function(name)
    }

    /// Instantiates a fresh module, feeds `input` on stdin, invokes the
    /// named export with no arguments, and collects stdout/stderr. `_start`
    /// is never looked up, so guests whose only entry point is `_start` are
    /// simply not invokable this way — see spec.md §4.1.
    pub(crate) fn run(
        &self,
        fn_name: &str,
        input: &[u8],
    ) -> Result<RunResult, WasiRuntimeError> {
        if !self.has_function(fn_name) {
            return Err(WasiRuntimeError::MissingFunction(fn_name.to_string()));
        }

        let stdout_pipe = WritePipe::new_in_memory();
        let stderr_pipe = WritePipe::new_in_memory();
        let stdin_pipe = ReadPipe::new(Cursor::new(input.to_owned()));

        let wasi_ctx = WasiCtxBuilder::new()
            .stdin(Box::new(stdin_pipe))
            .stdout(Box::new(stdout_pipe.clone()))
            .stderr(Box::new(stderr_pipe.clone()))
            .build();
        let ctx = Context { wasi_ctx };

        let mut store = self.stack_pre.build_store(ctx);
        let instance = self
            .stack_pre
            .rehydrate(&mut store)
            .map_err(WasiRuntimeError::Instantiate)?;
        let guest_fn = instance
            .get_typed_func::<(), ()>(&mut store, fn_name)
            .map_err(|_| WasiRuntimeError::MissingFunction(fn_name.to_string()))?;
        let call_result = guest_fn.call(&mut store, ());

        // The store holds the only other handle to the pipes; drop it before
        // reclaiming their contents.
        drop(store);

        let stderr = pipe_to_string("stderr", stderr_pipe)?;

        if let Err(error) = call_result {
            return Err(WasiRuntimeError::Trap { stderr, error });
        }

        let stdout = pipe_into_bytes("stdout", stdout_pipe)?;
        Ok(RunResult { stdout, stderr })
    }
}

fn pipe_into_bytes(
    name: &str,
    pipe: WritePipe<Cursor<Vec<u8>>>,
) -> Result<Vec<u8>, WasiRuntimeError> {
    pipe.try_into_inner()
        .map(|cursor| cursor.into_inner())
        .map_err(|_| WasiRuntimeError::PipeConversion {
            name: name.to_string(),
            error: "cannot reclaim pipe buffer, still referenced".to_string(),
        })
}

fn pipe_to_string(
    name: &str,
    pipe: WritePipe<Cursor<Vec<u8>>>,
) -> Result<String, WasiRuntimeError> {
    let bytes = pipe_into_bytes(name, pipe)?;
    String::from_utf8(bytes).map_err(|e| WasiRuntimeError::PipeConversion {
        name: name.to_string(),
        error: format!("cannot convert buffer to UTF8 string: {e}"),
    })
}
