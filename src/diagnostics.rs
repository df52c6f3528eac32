//! Best-effort GPU diagnostics.
//!
//! GPU failures never abort a draw. Calls that can fail validation run inside a wgpu error
//! scope; whatever the scope captured is logged and forwarded to the context's sink.

use std::fmt;
use std::sync::Arc;

use wgpu::ErrorFilter;

use crate::error::GraphicsError;

/// A structured report of something that went wrong on the GPU side.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// A wgpu call reported a validation error.
    GpuCall { label: String, message: String },
    /// A program failed to compile. The handle was still stored and will not render.
    ShaderCompilation { program: String, log: String },
    /// The program has no texture-coordinate input; the primitive renders untextured.
    MissingTextureCoordinates { program: String },
    /// A draw was skipped because its program is unusable.
    SkippedDraw { program: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::GpuCall { label, message } => write!(f, "{label}: {message}"),
            Diagnostic::ShaderCompilation { program, log } => {
                write!(f, "program {program} failed to compile:\n{log}")
            }
            Diagnostic::MissingTextureCoordinates { program } => {
                write!(f, "program {program} exposes no texture coordinates")
            }
            Diagnostic::SkippedDraw { program } => {
                write!(f, "skipped draw with unusable program {program}")
            }
        }
    }
}

impl From<&GraphicsError> for Diagnostic {
    fn from(error: &GraphicsError) -> Self {
        match error {
            GraphicsError::ShaderCompilation { program, message } => Diagnostic::ShaderCompilation {
                program: program.clone(),
                log: message.clone(),
            },
            GraphicsError::Validation { label, message } => Diagnostic::GpuCall {
                label: label.clone(),
                message: message.clone(),
            },
            other => Diagnostic::GpuCall {
                label: "device".to_owned(),
                message: other.to_string(),
            },
        }
    }
}

/// Callback receiving every [`Diagnostic`] a context emits.
pub type DiagnosticSink = Arc<dyn Fn(&Diagnostic) + Send + Sync>;

/// Runs `f` inside a validation error scope and reports what the scope captured.
///
/// The value produced by `f` is returned either way, so a failing call degrades instead of
/// aborting.
pub(crate) fn with_validation_scope<T>(
    device: &wgpu::Device,
    label: &str,
    f: impl FnOnce() -> T,
) -> (T, Option<GraphicsError>) {
    device.push_error_scope(ErrorFilter::Validation);
    let out = f();
    let error = pollster::block_on(device.pop_error_scope()).map(|error| GraphicsError::Validation {
        label: label.to_owned(),
        message: error.to_string(),
    });
    (out, error)
}
