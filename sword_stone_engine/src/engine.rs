//! Sword and Stone Engine - singleton manager for the logger and the active renderer
//!
//! The engine owns at most one live renderer. It can be handed a renderer that
//! was built and initialized by the caller, or asked to pick the first backend
//! that comes up on a given window.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::SystemTime;

use crate::error::{Error, Result};
use crate::log::{DefaultLogger, LogEntry, LogSeverity, Logger};
use crate::renderer::{NativeWindow, RenderApi, Renderer, RendererConfig, RendererFactory};

/// The engine's renderer handle: one backend behind a mutex
pub type SharedRenderer = Arc<Mutex<Box<dyn Renderer>>>;

// ===== INTERNAL STATE =====

/// Global engine state storage
static ENGINE_STATE: OnceLock<EngineState> = OnceLock::new();

/// Global logger (initialized with DefaultLogger)
static LOGGER: OnceLock<RwLock<Box<dyn Logger>>> = OnceLock::new();

/// Entries below this severity are dropped before reaching the logger
static MIN_SEVERITY: AtomicU8 = AtomicU8::new(LogSeverity::Info as u8);

struct EngineState {
    renderer: RwLock<Option<SharedRenderer>>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            renderer: RwLock::new(None),
        }
    }
}

// ===== PUBLIC API =====

/// Main engine singleton manager
///
/// # Example
///
/// ```no_run
/// use sword_stone_engine::stone::{Engine, render::RendererConfig};
/// # fn run(window: raw_window_handle::RawWindowHandle) -> sword_stone_engine::stone::Result<()> {
/// Engine::initialize()?;
/// let api = Engine::create_renderer_with_fallback(window, 1280, 720, RendererConfig::default())?;
///
/// let renderer = Engine::renderer()?;
/// // renderer.lock() ... begin_frame / draw / end_frame / present
///
/// Engine::shutdown();
/// # Ok(())
/// # }
/// ```
pub struct Engine;

impl Engine {
    /// Log errors before returning them (internal use)
    fn log_and_return_error(error: Error) -> Error {
        match &error {
            Error::InitializationFailed(msg) => {
                crate::engine_error!("stone::Engine", "Initialization failed: {}", msg);
            }
            Error::BackendError(msg) => {
                crate::engine_error!("stone::Engine", "Backend error: {}", msg);
            }
            _ => {
                crate::engine_error!("stone::Engine", "Engine error: {}", error);
            }
        }
        error
    }

    fn state() -> Result<&'static EngineState> {
        ENGINE_STATE.get().ok_or_else(|| {
            Self::log_and_return_error(Error::InitializationFailed(
                "Engine not initialized. Call Engine::initialize() first.".to_string(),
            ))
        })
    }

    /// Initialize the engine
    ///
    /// Must be called once at application startup. Calling it again is harmless.
    pub fn initialize() -> Result<()> {
        ENGINE_STATE.get_or_init(EngineState::new);
        Ok(())
    }

    /// Shut the active renderer down and drop it
    ///
    /// After calling this a new renderer can be created without re-initializing.
    pub fn shutdown() {
        if let Some(state) = ENGINE_STATE.get() {
            if let Ok(mut lock) = state.renderer.write() {
                if let Some(renderer) = lock.take() {
                    if let Ok(mut renderer) = renderer.lock() {
                        renderer.shutdown();
                    }
                }
            }
        }
    }

    /// Register an already initialized renderer as the engine's renderer
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The engine is not initialized
    /// - A renderer already exists
    /// - The renderer lock is poisoned
    pub fn create_renderer<R: Renderer + 'static>(renderer: R) -> Result<()> {
        let api = renderer.api();
        let boxed: Box<dyn Renderer> = Box::new(renderer);
        Self::register_renderer(Arc::new(Mutex::new(boxed)))?;

        crate::engine_info!("stone::Engine", "Renderer singleton created ({})", api);
        Ok(())
    }

    /// Create the renderer through the factory, trying each candidate API in turn
    ///
    /// Candidates are `config.preferred_apis` when non-empty, otherwise every
    /// compiled backend in availability order. The first backend that both
    /// constructs and initializes on `window` is kept. `window` is a
    /// `RawWindowHandle` or a [`NativeWindow`] carrying its display.
    ///
    /// # Returns
    ///
    /// The API of the renderer that was selected
    pub fn create_renderer_with_fallback(
        window: impl Into<NativeWindow>,
        width: u32,
        height: u32,
        config: RendererConfig,
    ) -> Result<RenderApi> {
        Self::create_renderer_with(&window.into(), width, height, config, RendererFactory::create_with_config)
    }

    /// Fallback creation over an arbitrary backend constructor
    pub(crate) fn create_renderer_with<F>(
        window: &NativeWindow,
        width: u32,
        height: u32,
        config: RendererConfig,
        construct: F,
    ) -> Result<RenderApi>
    where
        F: FnMut(RenderApi, RendererConfig) -> Result<Box<dyn Renderer>>,
    {
        // Fail before touching any backend if a renderer is already live
        {
            let state = Self::state()?;
            let lock = state.renderer.read().map_err(|_| {
                Self::log_and_return_error(Error::BackendError("Renderer lock poisoned".to_string()))
            })?;
            if lock.is_some() {
                return Err(Self::log_and_return_error(Error::InitializationFailed(
                    "Renderer already exists. Call Engine::destroy_renderer() first.".to_string(),
                )));
            }
        }

        let renderer = RendererFactory::first_available_with(window, width, height, config, construct)
            .map_err(Self::log_and_return_error)?;
        let api = renderer.api();

        Self::register_renderer(Arc::new(Mutex::new(renderer)))?;

        crate::engine_info!("stone::Engine", "Renderer singleton created ({})", api);
        Ok(api)
    }

    pub(crate) fn register_renderer(renderer: SharedRenderer) -> Result<()> {
        let state = Self::state()?;

        let mut lock = state.renderer.write().map_err(|_| {
            Self::log_and_return_error(Error::BackendError("Renderer lock poisoned".to_string()))
        })?;

        if lock.is_some() {
            return Err(Self::log_and_return_error(Error::InitializationFailed(
                "Renderer already exists. Call Engine::destroy_renderer() first.".to_string(),
            )));
        }

        *lock = Some(renderer);
        Ok(())
    }

    /// Get the renderer singleton
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is not initialized or no renderer exists.
    pub fn renderer() -> Result<SharedRenderer> {
        let state = Self::state()?;

        let lock = state.renderer.read().map_err(|_| {
            Self::log_and_return_error(Error::BackendError("Renderer lock poisoned".to_string()))
        })?;

        lock.clone().ok_or_else(|| {
            Self::log_and_return_error(Error::InitializationFailed(
                "Renderer not created. Call Engine::create_renderer() first.".to_string(),
            ))
        })
    }

    /// True if a renderer is currently registered
    pub fn has_renderer() -> bool {
        ENGINE_STATE
            .get()
            .and_then(|state| state.renderer.read().ok().map(|lock| lock.is_some()))
            .unwrap_or(false)
    }

    /// Shut down and remove the renderer singleton
    ///
    /// `shutdown()` runs on the renderer before the engine lets go of it, so
    /// native objects are released even if callers still hold an `Arc`.
    pub fn destroy_renderer() -> Result<()> {
        let state = Self::state()?;

        let mut lock = state.renderer.write().map_err(|_| {
            Self::log_and_return_error(Error::BackendError("Renderer lock poisoned".to_string()))
        })?;

        if let Some(renderer) = lock.take() {
            let mut renderer = renderer.lock().map_err(|_| {
                Self::log_and_return_error(Error::BackendError("Renderer mutex poisoned".to_string()))
            })?;
            renderer.shutdown();
        }

        crate::engine_info!("stone::Engine", "Renderer singleton destroyed");
        Ok(())
    }

    /// Reset all singletons for testing (only available in test builds)
    #[cfg(test)]
    pub fn reset_for_testing() {
        Self::shutdown();
        MIN_SEVERITY.store(LogSeverity::Info as u8, Ordering::Relaxed);
    }

    // ===== LOGGING API =====

    /// Replace the logger (file logger, capture logger, ...)
    pub fn set_logger<L: Logger + 'static>(logger: L) {
        let logger_lock = LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger)));
        if let Ok(mut lock) = logger_lock.write() {
            *lock = Box::new(logger);
        }
    }

    /// Reset logger to default (DefaultLogger)
    pub fn reset_logger() {
        Self::set_logger(DefaultLogger);
    }

    /// Drop entries below `severity` (default: Info)
    pub fn set_min_severity(severity: LogSeverity) {
        MIN_SEVERITY.store(severity as u8, Ordering::Relaxed);
    }

    pub fn min_severity() -> LogSeverity {
        LogSeverity::from_u8(MIN_SEVERITY.load(Ordering::Relaxed))
    }

    /// Log without file:line (used by engine_info!, engine_warn!, ...)
    pub fn log(severity: LogSeverity, source: &str, message: String) {
        Self::dispatch(severity, source, message, None, None);
    }

    /// Log with file:line (used by engine_error!)
    pub fn log_detailed(
        severity: LogSeverity,
        source: &str,
        message: String,
        file: &'static str,
        line: u32,
    ) {
        Self::dispatch(severity, source, message, Some(file), Some(line));
    }

    fn dispatch(
        severity: LogSeverity,
        source: &str,
        message: String,
        file: Option<&'static str>,
        line: Option<u32>,
    ) {
        if severity < Self::min_severity() {
            return;
        }
        let logger_lock = LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger)));
        if let Ok(lock) = logger_lock.read() {
            lock.log(&LogEntry {
                severity,
                timestamp: SystemTime::now(),
                source: source.to_string(),
                message,
                file,
                line,
            });
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
