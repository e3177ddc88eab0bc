//! Codec environment lifecycle
//!
//! The [`Environment`] owns driver registration, the diagnostic handler and
//! a stack of scoped configuration options. [`Environment::activate`]
//! returns an [`EnvGuard`]; dropping the guard restores the options that
//! were in effect when it was created. Drivers registered on first
//! activation stay registered for the life of the environment.
//!
//! One environment is shared process-wide through [`Environment::global`].
//! Its configuration stack is guarded by a mutex, but scopes entered from
//! several threads at once still interleave: callers that need isolated
//! configuration per thread must serialize their scopes.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use parking_lot::Mutex;
use tracing::{debug, error, warn};
use crate::driver::{CodecConfig, Driver};
use crate::error::{Error, Result};
use crate::formats::tiff::GTiffDriver;

/// Blocks cached per open dataset
pub const BLOCK_CACHE_SIZE: &str = "GRIDIO_BLOCK_CACHE_SIZE";
/// Memory-map local files (`YES`/`NO`)
pub const USE_MMAP: &str = "GRIDIO_USE_MMAP";
/// Block decode threads, `ALL_CPUS` or a count
pub const NUM_THREADS: &str = "GRIDIO_NUM_THREADS";

/// Default for [`BLOCK_CACHE_SIZE`]
pub const DEFAULT_BLOCK_CACHE_SIZE: usize = 256;

/// Severity of a codec diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Warning,
    Failure,
}

/// Receives non-fatal diagnostics emitted by drivers
pub trait ErrorHandler: Send + Sync {
    fn handle(&self, severity: Severity, message: &str);
}

/// Default handler: forwards diagnostics to `tracing`
#[derive(Debug, Default)]
pub struct TracingHandler;

impl ErrorHandler for TracingHandler {
    fn handle(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Debug => debug!(target: "gridio::codec", "{}", message),
            Severity::Warning => warn!(target: "gridio::codec", "{}", message),
            Severity::Failure => error!(target: "gridio::codec", "{}", message),
        }
    }
}

/// Parses `YES/ON/TRUE/1` and `NO/OFF/FALSE/0`, case-insensitively
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_uppercase().as_str() {
        "YES" | "ON" | "TRUE" | "1" => Some(true),
        "NO" | "OFF" | "FALSE" | "0" => Some(false),
        _ => None,
    }
}

type Options = HashMap<String, String>;

struct EnvState {
    initialized: bool,
    options: Options,
    stack: Vec<Options>,
    defaults: Options,
    drivers: Vec<Arc<dyn Driver>>,
    handler: Option<Arc<dyn ErrorHandler>>,
}

impl EnvState {
    fn register(&mut self, driver: Arc<dyn Driver>) -> Result<()> {
        if self.drivers.iter().any(|d| d.name() == driver.name()) {
            return Err(Error::EnvironmentInit(format!(
                "driver '{}' is already registered",
                driver.name()
            )));
        }
        debug!(driver = driver.name(), "registered driver");
        self.drivers.push(driver);
        Ok(())
    }
}

/// Driver registry, error handler and scoped configuration
pub struct Environment {
    state: Mutex<EnvState>,
}

impl Environment {
    /// An uninitialized environment; drivers register on first activation
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EnvState {
                initialized: false,
                options: Options::new(),
                stack: Vec::new(),
                defaults: Options::new(),
                drivers: Vec::new(),
                handler: None,
            }),
        }
    }

    /// The process-wide environment used by datasets
    pub fn global() -> &'static Environment {
        static GLOBAL: OnceLock<Environment> = OnceLock::new();
        GLOBAL.get_or_init(Environment::new)
    }

    /// Enters a scope with no option changes
    pub fn activate(&self) -> Result<EnvGuard<'_>> {
        self.activate_with(std::iter::empty::<(String, String)>())
    }

    /// Enters a scope that sets `options` until the guard is dropped
    pub fn activate_with<I, K, V>(&self, options: I) -> Result<EnvGuard<'_>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut state = self.state.lock();
        if !state.initialized {
            Self::initialize(&mut state)?;
        }

        let level = state.stack.len();
        let snapshot = state.options.clone();
        state.stack.push(snapshot);
        for (key, value) in options {
            state.options.insert(normalize_key(key.into()), value.into());
        }
        debug!(depth = level + 1, "environment activated");
        Ok(EnvGuard { env: self, level })
    }

    /// Activation used for the duration of a single dataset operation
    pub(crate) fn ensure(&self) -> Result<EnvGuard<'_>> {
        if !self.is_active() {
            debug!("implicit environment activation");
        }
        self.activate()
    }

    fn initialize(state: &mut EnvState) -> Result<()> {
        state.register(Arc::new(GTiffDriver))?;
        if state.handler.is_none() {
            state.handler = Some(Arc::new(TracingHandler));
        }
        state.initialized = true;
        debug!(drivers = state.drivers.len(), "environment initialized");
        Ok(())
    }

    fn deactivate(&self, level: usize) {
        let mut state = self.state.lock();
        // An outer guard already restored past this level
        if state.stack.len() <= level {
            return;
        }
        let restored = state.stack.drain(level..).next();
        if let Some(restored) = restored {
            state.options = restored;
        }
        debug!(depth = level, "environment deactivated");
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    pub fn is_active(&self) -> bool {
        self.depth() > 0
    }

    /// Number of scopes currently entered
    pub fn depth(&self) -> usize {
        self.state.lock().stack.len()
    }

    /// Sets an option in the innermost scope
    pub fn set_config(&self, key: &str, value: &str) {
        self.state.lock().options.insert(normalize_key(key.to_string()), value.to_string());
    }

    /// Removes an option from the innermost scope
    pub fn clear_config(&self, key: &str) {
        self.state.lock().options.remove(&normalize_key(key.to_string()));
    }

    /// Sets a fallback consulted when no scope sets `key`
    pub fn set_default(&self, key: &str, value: &str) {
        self.state.lock().defaults.insert(normalize_key(key.to_string()), value.to_string());
    }

    /// Looks `key` up in the active scopes, then defaults, then the
    /// process environment
    pub fn get_config(&self, key: &str) -> Option<String> {
        let key = normalize_key(key.to_string());
        {
            let state = self.state.lock();
            if let Some(value) = state.options.get(&key).or_else(|| state.defaults.get(&key)) {
                return Some(value.clone());
            }
        }
        std::env::var(&key).ok()
    }

    pub fn get_config_bool(&self, key: &str, default: bool) -> bool {
        match self.get_config(key) {
            Some(value) => parse_bool(&value).unwrap_or_else(|| {
                warn!(key, value = value.as_str(), "unrecognized boolean option");
                default
            }),
            None => default,
        }
    }

    pub fn get_config_usize(&self, key: &str, default: usize) -> usize {
        match self.get_config(key) {
            Some(value) => value.trim().parse().unwrap_or_else(|_| {
                warn!(key, value = value.as_str(), "unrecognized integer option");
                default
            }),
            None => default,
        }
    }

    /// Options set in the innermost scope
    pub fn options(&self) -> HashMap<String, String> {
        self.state.lock().options.clone()
    }

    /// Adds a driver; names must be unique
    pub fn register_driver(&self, driver: Arc<dyn Driver>) -> Result<()> {
        self.state.lock().register(driver)
    }

    pub fn driver(&self, name: &str) -> Result<Arc<dyn Driver>> {
        self.state
            .lock()
            .drivers
            .iter()
            .find(|d| d.name().eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| Error::DriverNotFound(name.to_string()))
    }

    pub fn drivers(&self) -> Vec<Arc<dyn Driver>> {
        self.state.lock().drivers.clone()
    }

    /// Installs the receiver of codec diagnostics
    pub fn set_error_handler(&self, handler: Arc<dyn ErrorHandler>) {
        self.state.lock().handler = Some(handler);
    }

    pub fn error_handler(&self) -> Arc<dyn ErrorHandler> {
        self.state
            .lock()
            .handler
            .clone()
            .unwrap_or_else(|| Arc::new(TracingHandler))
    }

    /// Snapshot of the settings drivers honour
    pub(crate) fn codec_config(&self) -> CodecConfig {
        let num_threads = match self.get_config(NUM_THREADS) {
            Some(value) if value.trim().eq_ignore_ascii_case("ALL_CPUS") => 0,
            Some(value) => value.trim().parse().unwrap_or_else(|_| {
                warn!(key = NUM_THREADS, value = value.as_str(), "unrecognized thread count");
                0
            }),
            None => 0,
        };
        CodecConfig {
            block_cache_size: self.get_config_usize(BLOCK_CACHE_SIZE, DEFAULT_BLOCK_CACHE_SIZE),
            num_threads,
            diagnostics: self.error_handler(),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Environment")
            .field("initialized", &state.initialized)
            .field("depth", &state.stack.len())
            .field("options", &state.options)
            .field("drivers", &state.drivers.iter().map(|d| d.name()).collect::<Vec<_>>())
            .finish()
    }
}

fn normalize_key(key: String) -> String {
    key.to_ascii_uppercase()
}

/// Scope of an activation; restores prior options when dropped
#[derive(Debug)]
#[must_use = "the scope ends when the guard is dropped"]
pub struct EnvGuard<'a> {
    env: &'a Environment,
    level: usize,
}

impl EnvGuard<'_> {
    /// Nesting level of this scope, starting at 1
    pub fn depth(&self) -> usize {
        self.level + 1
    }
}

impl Drop for EnvGuard<'_> {
    fn drop(&mut self) {
        self.env.deactivate(self.level);
    }
}
