use thiserror::Error;

#[derive(Error, Debug)]
pub enum WasiRuntimeError {
    #[error("cannot compile wasm module: {0}")]
    Compile(#[source] wasmtime::Error),

    #[error("cannot link wasi imports: {0}")]
    Link(#[source] wasmtime::Error),

    #[error("cannot instantiate module: {0}")]
    Instantiate(#[source] wasmtime::Error),

    #[error("module does not export function '{0}'")]
    MissingFunction(String),

    #[error("guest trapped; stderr: '{stderr}', error: {error}")]
    Trap {
        stderr: String,
        #[source]
        error: wasmtime::Error,
    },

    #[error("{name} pipe conversion error: {error}")]
    PipeConversion { name: String, error: String },
}
