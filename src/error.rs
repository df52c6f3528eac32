use thiserror::Error;

/// Errors produced while acquiring or validating GPU resources.
///
/// None of these cross `setup`/`render`: those calls absorb failures into readiness state and
/// report them through [`crate::Diagnostic`] instead.
#[derive(Debug, Clone, Error)]
pub enum GraphicsError {
    #[error("no suitable GPU adapter is available")]
    NoAdapter,
    #[error("failed to request a GPU device: {0}")]
    RequestDevice(String),
    #[error("GPU validation failed in '{label}': {message}")]
    Validation { label: String, message: String },
    #[error("shader program '{program}' failed to compile: {message}")]
    ShaderCompilation { program: String, message: String },
}

/// Errors raised while copying caller-owned memory into a primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StagingError {
    #[error("{bytes} bytes cannot be split into elements of {element_size} bytes")]
    MisalignedLength { bytes: usize, element_size: usize },
    #[error("{element_count} elements of {bytes_per_element} bytes exceed the addressable size")]
    LengthOverflow {
        element_count: usize,
        bytes_per_element: usize,
    },
    #[error("outline tessellation failed: {0}")]
    Tessellation(String),
}
