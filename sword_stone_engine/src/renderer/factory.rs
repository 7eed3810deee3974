//! Renderer factory - runtime backend selection
//!
//! Availability is a build-time property: a backend is available when its
//! Cargo feature is enabled and the target has the native API (Direct3D needs
//! Windows). Whether it actually comes up on a given window is only known
//! after `Renderer::initialize`, which is what
//! [`RendererFactory::create_first_available`] tries backend by backend.

use crate::error::{Error, Result};
use crate::renderer::{NativeWindow, RenderApi, Renderer, RendererConfig};
use crate::{engine_debug, engine_info, engine_warn};

const SOURCE: &str = "stone::factory";

/// Enum-keyed constructor table for the compiled backends
pub struct RendererFactory;

impl RendererFactory {
    /// Backends compiled into this build, in fallback order
    pub fn available_apis() -> Vec<RenderApi> {
        let mut apis = Vec::with_capacity(3);
        #[cfg(feature = "opengl")]
        apis.push(RenderApi::OpenGL);
        #[cfg(all(feature = "d3d11", windows))]
        apis.push(RenderApi::DirectX11);
        #[cfg(all(feature = "d3d12", windows))]
        apis.push(RenderApi::DirectX12);
        apis
    }

    pub fn is_available(api: RenderApi) -> bool {
        Self::available_apis().contains(&api)
    }

    /// Construct (not initialize) the backend for `api` with the default configuration
    pub fn create(api: RenderApi) -> Result<Box<dyn Renderer>> {
        Self::create_with_config(api, RendererConfig::default())
    }

    /// Construct (not initialize) the backend for `api`
    ///
    /// # Errors
    ///
    /// - `UnknownApi` for `RenderApi::None`
    /// - `BackendNotCompiled` if the backend's feature is disabled or the
    ///   target has no such API
    pub fn create_with_config(api: RenderApi, config: RendererConfig) -> Result<Box<dyn Renderer>> {
        let renderer: Box<dyn Renderer> = match api {
            RenderApi::None => return Err(Error::UnknownApi(api.name().to_string())),
            #[cfg(feature = "opengl")]
            RenderApi::OpenGL => Box::new(crate::backend::GlRenderer::<crate::backend::NativeGl>::new(config)),
            #[cfg(all(feature = "d3d11", windows))]
            RenderApi::DirectX11 => {
                Box::new(crate::backend::D3d11Renderer::<crate::backend::NativeD3d11>::new(config))
            }
            #[cfg(all(feature = "d3d12", windows))]
            RenderApi::DirectX12 => {
                Box::new(crate::backend::D3d12Renderer::<crate::backend::NativeD3d12>::new(config))
            }
            #[allow(unreachable_patterns)]
            other => return Err(Error::BackendNotCompiled(other)),
        };
        engine_debug!(SOURCE, "Constructed {} renderer", api);
        Ok(renderer)
    }

    /// Construct by name (`"OpenGL"`, `"dx11"`, `"d3d12"`, ...)
    pub fn create_by_name(name: &str, config: RendererConfig) -> Result<Box<dyn Renderer>> {
        Self::create_with_config(name.parse()?, config)
    }

    /// Construct and initialize each candidate in turn; keep the first that comes up
    ///
    /// Candidates are `config.preferred_apis` if non-empty, otherwise
    /// [`available_apis`](Self::available_apis). `window` is a
    /// `RawWindowHandle` or a [`NativeWindow`] carrying its display.
    ///
    /// # Errors
    ///
    /// `InitializationFailed` listing every attempt if none succeeded
    pub fn create_first_available(
        window: impl Into<NativeWindow>,
        width: u32,
        height: u32,
        config: RendererConfig,
    ) -> Result<Box<dyn Renderer>> {
        Self::first_available_with(&window.into(), width, height, config, Self::create_with_config)
    }

    /// Fallback loop over an arbitrary constructor
    pub(crate) fn first_available_with<F>(
        window: &NativeWindow,
        width: u32,
        height: u32,
        config: RendererConfig,
        mut construct: F,
    ) -> Result<Box<dyn Renderer>>
    where
        F: FnMut(RenderApi, RendererConfig) -> Result<Box<dyn Renderer>>,
    {
        let candidates = if config.preferred_apis.is_empty() {
            Self::available_apis()
        } else {
            config.preferred_apis.clone()
        };

        let mut failures = Vec::with_capacity(candidates.len());
        for api in candidates {
            let mut renderer = match construct(api, config.clone()) {
                Ok(renderer) => renderer,
                Err(e) => {
                    engine_warn!(SOURCE, "Skipping {}: {}", api, e);
                    failures.push(format!("{}: {}", api, e));
                    continue;
                }
            };
            if renderer.initialize_window(window, width, height) {
                engine_info!(SOURCE, "Selected {} renderer ({}x{})", api, width, height);
                return Ok(renderer);
            }
            // A failed initialize leaves the instance safe to drop
            renderer.shutdown();
            engine_warn!(SOURCE, "{} failed to initialize, trying the next backend", api);
            failures.push(format!("{}: initialization failed", api));
        }

        if failures.is_empty() {
            return Err(Error::InitializationFailed("no renderer backend is compiled into this build".to_string()));
        }
        Err(Error::InitializationFailed(format!("no renderer backend came up ({})", failures.join("; "))))
    }
}

#[cfg(test)]
#[path = "factory_tests.rs"]
mod tests;
