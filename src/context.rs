use std::sync::Arc;

use parking_lot::RwLock;
use wgpu::InstanceDescriptor;

use crate::diagnostics::{with_validation_scope, Diagnostic, DiagnosticSink};
use crate::error::GraphicsError;
use crate::program::{ProgramCache, ProgramHandle};
use crate::shader::ShaderProgram;

/// Render-target formats and validation behaviour of a [`RenderingContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextConfig {
    /// Format of the color attachment every pass renders into.
    pub color_format: wgpu::TextureFormat,
    /// Format of the depth/stencil attachment. Must carry a stencil aspect.
    pub depth_stencil_format: wgpu::TextureFormat,
    /// Wrap buffer uploads in validation error scopes. Program compilation is always checked.
    pub validate_gpu_calls: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            color_format: wgpu::TextureFormat::Rgba8Unorm,
            depth_stencil_format: wgpu::TextureFormat::Depth24PlusStencil8,
            validate_gpu_calls: true,
        }
    }
}

/// Everything the primitives need from the graphics context: the device and queue, the
/// compiled programs, the shared texture sampler and where to send diagnostics.
///
/// Only one thread is expected to call `setup`/`render` against a context. Staging calls on
/// primitives never touch it.
pub struct RenderingContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: ContextConfig,
    programs: ProgramCache,
    sampler: wgpu::Sampler,
    diagnostics: RwLock<Option<DiagnosticSink>>,
}

impl RenderingContext {
    /// Wraps an existing device, e.g. one already driving a window surface.
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>, config: ContextConfig) -> Self {
        let sampler = create_sampler(&device);
        Self {
            device,
            queue,
            config,
            programs: ProgramCache::new(),
            sampler,
            diagnostics: RwLock::new(None),
        }
    }

    /// Requests an adapter and device without any surface.
    ///
    /// Returns [`GraphicsError::NoAdapter`] on machines without a usable GPU, which lets tests
    /// skip instead of failing.
    pub async fn try_new_headless(config: ContextConfig) -> Result<Self, GraphicsError> {
        let instance = wgpu::Instance::new(&InstanceDescriptor::default());

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| GraphicsError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("mapgfx_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
                trace: Default::default(),
            })
            .await
            .map_err(|error| GraphicsError::RequestDevice(error.to_string()))?;

        tracing::debug!(adapter = ?adapter.get_info().name, "created headless rendering context");
        Ok(Self::new(Arc::new(device), Arc::new(queue), config))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub(crate) fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    pub fn program_cache(&self) -> &ProgramCache {
        &self.programs
    }

    /// Compiled program registered under `name`, if any.
    pub fn get_program(&self, name: &str) -> Option<ProgramHandle> {
        self.programs.get_program(name)
    }

    pub fn store_program(&self, name: &str, handle: ProgramHandle) {
        self.programs.store_program(name, handle);
    }

    /// Resolves `shader`'s program from the cache, compiling and storing it on a miss.
    pub fn program_for(&self, shader: &dyn ShaderProgram) -> ProgramHandle {
        let name = shader.program_name();
        match self.programs.get_program(name) {
            Some(handle) => handle,
            None => shader.setup_program(self),
        }
    }

    /// Installs the callback receiving every [`Diagnostic`]. Replaces any previous sink.
    pub fn set_diagnostic_sink(&self, sink: DiagnosticSink) {
        *self.diagnostics.write() = Some(sink);
    }

    pub fn clear_diagnostic_sink(&self) {
        *self.diagnostics.write() = None;
    }

    pub(crate) fn report(&self, diagnostic: Diagnostic) {
        tracing::warn!("{diagnostic}");
        let sink = self.diagnostics.read().clone();
        if let Some(sink) = sink {
            sink(&diagnostic);
        }
    }

    /// Runs a GPU call and reports a validation failure instead of letting it escape.
    ///
    /// Returns the call's output and whether it passed validation. With
    /// `validate_gpu_calls` off the call is trusted.
    pub(crate) fn checked<T>(&self, label: &str, f: impl FnOnce() -> T) -> (T, bool) {
        if !self.config.validate_gpu_calls {
            return (f(), true);
        }
        let (out, error) = with_validation_scope(&self.device, label, f);
        match error {
            Some(error) => {
                self.report(Diagnostic::from(&error));
                (out, false)
            }
            None => (out, true),
        }
    }
}

fn create_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("mapgfx_texture_sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}
