//! Plugin registry for managing loaded plugins.
//!
//! The registry loads plugin images through a shared [`Runtime`], binds the
//! host's natives into each new context, and tracks every plugin's file
//! name and 1-based display index for error reports.

use crate::config::HostConfig;
use crate::discovery::{discover_plugin, discover_plugins};
use crate::error::{HostError, HostResult};
use crate::reporter::LogReporter;
use serde::Serialize;
use sourcepawn_runtime::natives::NATIVE_FLAG_OPTIONAL;
use sourcepawn_runtime::{Cell, ContextId, DebugListener, ExecutionEngine, NativeInfo, PluginContext, Runtime};
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{info, warn};

/// Name of the public called when a plugin starts.
pub const ON_PLUGIN_START: &str = "OnPluginStart";

/// Lifecycle state of a registered plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PluginStatus {
    /// Loaded and bound, not started yet.
    Loaded,
    /// Started successfully.
    Running,
    /// Paused; calls into it are refused.
    Paused,
    /// Cannot run; the reason is kept for display.
    Failed(String),
}

/// Context id to file name map shared with error reporters.
///
/// Display indices are 1-based positions in registration order.
#[derive(Debug, Default)]
pub struct PluginDirectory {
    entries: RefCell<Vec<(ContextId, String)>>,
}

impl PluginDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, context: ContextId, filename: &str) {
        self.entries
            .borrow_mut()
            .push((context, filename.to_string()));
    }

    fn remove(&self, context: ContextId) {
        self.entries.borrow_mut().retain(|(id, _)| *id != context);
    }

    /// File name of the plugin running in `context`.
    pub fn display_name(&self, context: ContextId) -> Option<String> {
        self.entries
            .borrow()
            .iter()
            .find(|(id, _)| *id == context)
            .map(|(_, name)| name.clone())
    }

    /// Display index of `context`. A context that is not registered yet is
    /// being loaded and gets the next free index.
    pub fn index_of(&self, context: ContextId) -> usize {
        let entries = self.entries.borrow();
        entries
            .iter()
            .position(|(id, _)| *id == context)
            .map_or(entries.len() + 1, |i| i + 1)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

/// A registered plugin.
pub struct LoadedPlugin {
    filename: String,
    path: PathBuf,
    context: PluginContext,
    status: PluginStatus,
}

impl LoadedPlugin {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn context(&self) -> &PluginContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut PluginContext {
        &mut self.context
    }

    pub fn status(&self) -> &PluginStatus {
        &self.status
    }
}

/// Registry for managing SourcePawn plugins.
pub struct PluginRegistry {
    runtime: Rc<Runtime>,

    /// Plugins in registration order.
    plugins: Vec<LoadedPlugin>,

    /// Natives offered to every plugin.
    natives: Vec<NativeInfo>,

    /// Natives a plugin may run without.
    optional: HashSet<String>,

    directory: Rc<PluginDirectory>,
}

impl PluginRegistry {
    /// Create a new empty registry over `runtime`.
    pub fn new(runtime: Rc<Runtime>) -> Self {
        Self {
            runtime,
            plugins: Vec::new(),
            natives: Vec::new(),
            optional: HashSet::new(),
            directory: Rc::new(PluginDirectory::new()),
        }
    }

    /// Build a runtime from the `[runtime]` settings with a [`LogReporter`]
    /// attached, then load the discovered plugins if `plugins.autoload` is
    /// set.
    ///
    /// Natives registered afterwards only reach plugins loaded afterwards,
    /// so hosts that need natives bound at startup turn `autoload` off and
    /// call [`PluginRegistry::discover_and_load`] themselves.
    pub fn from_config(config: &HostConfig, engine: Box<dyn ExecutionEngine>) -> HostResult<Self> {
        let mut registry = Self::new(Runtime::new(config.runtime, engine));
        let reporter = LogReporter::new(registry.directory());
        registry
            .runtime
            .set_debug_listener(Some(Rc::new(reporter) as Rc<dyn DebugListener>));

        if config.plugins.autoload {
            registry.discover_and_load(config.plugins.directory.as_deref())?;
        }
        Ok(registry)
    }

    pub fn runtime(&self) -> &Rc<Runtime> {
        &self.runtime
    }

    /// Shared name directory, for reporters.
    pub fn directory(&self) -> Rc<PluginDirectory> {
        Rc::clone(&self.directory)
    }

    /// Offer `native` to plugins loaded from now on.
    pub fn register_native(&mut self, native: NativeInfo) {
        self.natives.push(native);
    }

    /// Allow plugins loaded from now on to run with `name` unbound.
    pub fn mark_native_optional(&mut self, name: &str) {
        self.optional.insert(name.to_string());
    }

    /// Discover and load all plugins, scanning `extra` first.
    pub fn discover_and_load(&mut self, extra: Option<&Path>) -> HostResult<usize> {
        let discovered = discover_plugins(extra)?;
        let mut loaded = 0;

        for plugin_path in discovered {
            match self.load_plugin(&plugin_path.path) {
                Ok(_) => loaded += 1,
                Err(e) => warn!("Failed to load plugin {:?}: {}", plugin_path.path, e),
            }
        }

        info!("Loaded {} plugins", loaded);
        Ok(loaded)
    }

    /// Load a plugin file and bind the registered natives.
    ///
    /// A plugin with unbound required natives is still registered, in the
    /// [`PluginStatus::Failed`] state.
    pub fn load_plugin(&mut self, path: &Path) -> HostResult<ContextId> {
        let plugin_path = discover_plugin(path)?;
        let filename = plugin_path.filename;

        if self.find(&filename).is_some() {
            return Err(HostError::AlreadyLoaded(filename));
        }

        let mut context = self.runtime.load_plugin(path).map_err(|source| HostError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        context.bind_natives(&self.natives, false);

        let mut missing = Vec::new();
        for index in 0..context.natives_num() {
            let Ok(entry) = context.natives_mut().get_native_by_index_mut(index) else {
                continue;
            };
            if self.optional.contains(&entry.name) {
                entry.flags |= NATIVE_FLAG_OPTIONAL;
            }
            if entry.is_bound() {
                continue;
            }
            if entry.is_optional() {
                warn!(plugin = %filename, native = %entry.name, "Optional native is not bound");
            } else {
                missing.push(entry.name.clone());
            }
        }

        let status = if missing.is_empty() {
            PluginStatus::Loaded
        } else {
            let reason = HostError::MissingNatives {
                plugin: filename.clone(),
                natives: missing,
            }
            .to_string();
            warn!(plugin = %filename, "{}", reason);
            PluginStatus::Failed(reason)
        };

        let id = context.id();
        info!(
            "Registered plugin: {} ({})",
            filename,
            match &status {
                PluginStatus::Failed(_) => "failed",
                _ => "loaded",
            }
        );

        self.directory.insert(id, &filename);
        self.plugins.push(LoadedPlugin {
            filename,
            path: plugin_path.path,
            context,
            status,
        });
        Ok(id)
    }

    /// Start a loaded plugin by calling its `OnPluginStart`, if it has one.
    pub fn start_plugin(&mut self, id: ContextId) -> HostResult<()> {
        let plugin = self.get_mut(id)?;
        match &plugin.status {
            PluginStatus::Failed(reason) => {
                return Err(HostError::NotRunnable {
                    plugin: plugin.filename.clone(),
                    reason: reason.clone(),
                })
            }
            PluginStatus::Running | PluginStatus::Paused => return Ok(()),
            PluginStatus::Loaded => {}
        }

        if let Some(func) = plugin.context.get_function_by_name(ON_PLUGIN_START) {
            if let Err(source) = func.call_function(&mut plugin.context, &[]) {
                let reason = format!("{} failed: {}", ON_PLUGIN_START, source);
                plugin.status = PluginStatus::Failed(reason);
                return Err(HostError::Execution {
                    plugin: plugin.filename.clone(),
                    source,
                });
            }
        }

        plugin.status = PluginStatus::Running;
        info!("Started plugin: {}", plugin.filename);
        Ok(())
    }

    /// Call the public `name` of a plugin with cell arguments.
    pub fn call_public(&mut self, id: ContextId, name: &str, params: &[Cell]) -> HostResult<Cell> {
        let plugin = self.get_mut(id)?;
        let func = plugin
            .context
            .get_function_by_name(name)
            .ok_or_else(|| HostError::PluginNotFound(format!("{}::{}", plugin.filename, name)))?;
        func.call_function(&mut plugin.context, params)
            .map_err(|source| HostError::Execution {
                plugin: plugin.filename.clone(),
                source,
            })
    }

    /// Pause or resume a running plugin.
    pub fn set_paused(&mut self, id: ContextId, paused: bool) -> HostResult<()> {
        let plugin = self.get_mut(id)?;
        plugin.status = match (&plugin.status, paused) {
            (PluginStatus::Running, true) => PluginStatus::Paused,
            (PluginStatus::Paused, false) => PluginStatus::Running,
            _ => return Ok(()),
        };
        plugin.context.set_paused(paused);
        info!("{} plugin: {}", if paused { "Paused" } else { "Resumed" }, plugin.filename);
        Ok(())
    }

    /// Unload a plugin by context id.
    pub fn unload_plugin(&mut self, id: ContextId) -> HostResult<()> {
        let position = self
            .plugins
            .iter()
            .position(|p| p.context.id() == id)
            .ok_or_else(|| HostError::PluginNotFound(id.to_string()))?;
        let plugin = self.plugins.remove(position);
        self.directory.remove(id);
        info!("Unloaded plugin: {}", plugin.filename);
        Ok(())
    }

    /// Find a plugin by file name.
    pub fn find(&self, filename: &str) -> Option<ContextId> {
        self.plugins
            .iter()
            .find(|p| p.filename == filename)
            .map(|p| p.context.id())
    }

    pub fn get(&self, id: ContextId) -> Option<&LoadedPlugin> {
        self.plugins.iter().find(|p| p.context.id() == id)
    }

    fn get_mut(&mut self, id: ContextId) -> HostResult<&mut LoadedPlugin> {
        self.plugins
            .iter_mut()
            .find(|p| p.context.id() == id)
            .ok_or_else(|| HostError::PluginNotFound(id.to_string()))
    }

    /// File name of the plugin running in `id`.
    pub fn display_name(&self, id: ContextId) -> Option<String> {
        self.directory.display_name(id)
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// List plugin information in display order.
    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        self.plugins
            .iter()
            .map(|p| PluginInfo {
                index: self.directory.index_of(p.context.id()),
                filename: p.filename.clone(),
                status: p.status.clone(),
                debugging: p.context.is_debugging(),
                unbound_natives: p.context.natives().unbound().map(|n| n.name.clone()).collect(),
            })
            .collect()
    }
}

/// Information about a registered plugin.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub index: usize,
    pub filename: String,
    pub status: PluginStatus,
    pub debugging: bool,
    pub unbound_natives: Vec<String>,
}
