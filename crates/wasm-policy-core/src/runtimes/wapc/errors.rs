use thiserror::Error;

pub type Result<T> = std::result::Result<T, WapcRuntimeError>;

#[derive(Error, Debug)]
pub enum WapcRuntimeError {
    #[error("cannot compile wasm module: {0}")]
    Compile(#[source] anyhow::Error),

    #[error("cannot build waPC host: {0}")]
    Build(#[source] anyhow::Error),

    #[error("pool exhausted: no instance became free within the acquire timeout")]
    Busy,

    #[error("waPC call failed: {0}")]
    Call(#[source] wapc::errors::Error),
}
