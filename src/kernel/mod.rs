//! Plugin micro-kernel --- [`Kernel`].
//!
//! The kernel owns the ordered plugin registry, the event bus, the
//! immutable configuration and, once the VFS plugin has installed,
//! the filesystem handle. Plugins extend the runtime by registering
//! builtins, replacing the transform hook, or listening on the bus.

pub mod bus;

#[cfg(test)]
mod tests;

use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::builtins::BuiltinRegistry;
use crate::config::RuntimeConfig;
use crate::error::{ErrorKind, Result, RuntimeError};
use crate::vfs::MemFs;

use bus::{EventArgs, EventBus, HandlerId};

/// A runtime extension.
///
/// `install` runs synchronously while the plugin is being registered;
/// the lifecycle callbacks are optional. `on_destroy` results are
/// fire-and-forget: rejections surface through `on_error` only.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> Option<&str> {
        None
    }

    /// Names of plugins that must already be registered.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    fn install(&self, kernel: &Kernel) -> Result<()>;

    fn on_ready(&self, _kernel: &Kernel) -> Result<()> {
        Ok(())
    }

    async fn on_destroy(&self) -> Result<()> {
        Ok(())
    }

    fn on_error(&self, _error: &RuntimeError) {}
}

impl std::fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin").field("name", &self.name()).finish()
    }
}

struct PluginEntry {
    name: String,
    plugin: Arc<dyn Plugin>,
}

/// The micro-kernel.
pub struct Kernel {
    plugins: Mutex<Vec<PluginEntry>>,
    bus: EventBus,
    config: RuntimeConfig,
    vfs: RwLock<Option<Arc<MemFs>>>,
    builtins: Arc<BuiltinRegistry>,
}

impl Kernel {
    pub fn new(config: RuntimeConfig, builtins: Arc<BuiltinRegistry>) -> Self {
        Self {
            plugins: Mutex::new(Vec::new()),
            bus: EventBus::new(),
            config,
            vfs: RwLock::new(None),
            builtins,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn builtins(&self) -> &Arc<BuiltinRegistry> {
        &self.builtins
    }

    /// The filesystem handle. Fails until the VFS plugin has
    /// registered one.
    pub fn vfs(&self) -> Result<Arc<MemFs>> {
        self.vfs
            .read()
            .expect("kernel vfs slot poisoned")
            .clone()
            .ok_or_else(|| {
                RuntimeError::new(ErrorKind::PluginError, "no filesystem is registered")
                    .with_hint("Register the VFS plugin (runtime.use_plugin(VfsPlugin::new()))")
            })
    }

    /// Called by the VFS plugin at install time.
    pub fn set_vfs(&self, vfs: Arc<MemFs>) {
        *self.vfs.write().expect("kernel vfs slot poisoned") = Some(vfs);
    }

    pub fn on(
        &self,
        event: impl Into<String>,
        handler: impl Fn(&EventArgs) + Send + Sync + 'static,
    ) -> HandlerId {
        self.bus.on(event, handler)
    }

    pub fn off(&self, event: &str, id: HandlerId) -> bool {
        self.bus.off(event, id)
    }

    pub fn emit(&self, event: &str, args: &EventArgs) {
        self.bus.emit(event, args)
    }

    /// Registers and installs a plugin.
    ///
    /// Duplicate names and missing declared dependencies are rejected
    /// before `install` runs; an `install` failure unwinds the
    /// registration, notifies `on_error` and propagates.
    pub fn use_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let name = plugin.name().to_owned();
        {
            let mut plugins = self.plugins.lock().expect("plugin registry poisoned");
            if plugins.iter().any(|entry| entry.name == name) {
                return Err(RuntimeError::new(
                    ErrorKind::PluginDuplicate,
                    format!("plugin '{name}' is already registered"),
                )
                .with_context(name));
            }
            for dependency in plugin.dependencies() {
                if !plugins.iter().any(|entry| entry.name == dependency) {
                    return Err(RuntimeError::new(
                        ErrorKind::PluginDependency,
                        format!("plugin '{name}' requires '{dependency}' to be registered first"),
                    )
                    .with_context(name));
                }
            }
            plugins.push(PluginEntry { name: name.clone(), plugin: Arc::clone(&plugin) });
        }

        debug!(plugin = %name, "installing plugin");
        if let Err(err) = plugin.install(self) {
            self.plugins
                .lock()
                .expect("plugin registry poisoned")
                .retain(|entry| entry.name != name);
            plugin.on_error(&err);
            return Err(err);
        }
        Ok(())
    }

    /// Removes a plugin by name. Plugins that others still depend on
    /// cannot be removed. `on_destroy` runs fire-and-forget on the
    /// ambient async runtime when one exists.
    pub fn unregister(&self, name: &str) -> Result<()> {
        let entry = {
            let mut plugins = self.plugins.lock().expect("plugin registry poisoned");
            let position = plugins.iter().position(|entry| entry.name == name).ok_or_else(|| {
                RuntimeError::new(ErrorKind::PluginError, format!("plugin '{name}' is not registered"))
                    .with_context(name)
            })?;
            if let Some(dependent) = plugins.iter().find(|entry| {
                entry.name != name && entry.plugin.dependencies().iter().any(|d| d == name)
            }) {
                return Err(RuntimeError::new(
                    ErrorKind::PluginDependency,
                    format!("plugin '{}' still depends on '{name}'", dependent.name),
                )
                .with_context(name));
            }
            plugins.remove(position)
        };

        let plugin = entry.plugin;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = plugin.on_destroy().await {
                        plugin.on_error(&err);
                    }
                });
            }
            Err(_) => warn!(plugin = name, "no async runtime; on_destroy skipped"),
        }
        Ok(())
    }

    /// Plugin names in registration order.
    pub fn list_plugins(&self) -> Vec<String> {
        self.plugins
            .lock()
            .expect("plugin registry poisoned")
            .iter()
            .map(|entry| entry.name.clone())
            .collect()
    }

    pub fn get_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins
            .lock()
            .expect("plugin registry poisoned")
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| Arc::clone(&entry.plugin))
    }
}

/// Orders `plugins` so every plugin comes after its dependencies.
///
/// Dependencies on names outside the input set are treated as
/// satisfied externally. Cycles fail with `PluginDependency`.
pub fn topological_sort(plugins: &[Arc<dyn Plugin>]) -> Result<Vec<Arc<dyn Plugin>>> {
    #[derive(Copy, Clone, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let names: Vec<String> = plugins.iter().map(|p| p.name().to_owned()).collect();
    let mut marks = vec![Mark::Unvisited; plugins.len()];
    let mut order: Vec<Arc<dyn Plugin>> = Vec::with_capacity(plugins.len());

    fn visit(
        index: usize,
        plugins: &[Arc<dyn Plugin>],
        names: &[String],
        marks: &mut [Mark],
        order: &mut Vec<Arc<dyn Plugin>>,
    ) -> Result<()> {
        match marks[index] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                return Err(RuntimeError::new(
                    ErrorKind::PluginDependency,
                    format!("plugin dependency cycle through '{}'", names[index]),
                )
                .with_context(names[index].clone()));
            }
            Mark::Unvisited => {}
        }
        marks[index] = Mark::InProgress;
        for dependency in plugins[index].dependencies() {
            if let Some(dep_index) = names.iter().position(|n| *n == dependency) {
                visit(dep_index, plugins, names, marks, order)?;
            }
        }
        marks[index] = Mark::Done;
        order.push(Arc::clone(&plugins[index]));
        Ok(())
    }

    for index in 0..plugins.len() {
        visit(index, plugins, &names, &mut marks, &mut order)?;
    }
    Ok(order)
}

/// The stock filesystem plugin: owns a [`MemFs`] and hands it to the
/// kernel at install time.
pub struct VfsPlugin {
    fs: Arc<MemFs>,
}

impl VfsPlugin {
    pub fn new() -> Self {
        Self { fs: Arc::new(MemFs::new()) }
    }

    /// Wraps an existing filesystem, for example one restored from a
    /// snapshot.
    pub fn with_fs(fs: Arc<MemFs>) -> Self {
        Self { fs }
    }
}

impl Default for VfsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for VfsPlugin {
    fn name(&self) -> &str {
        "vfs"
    }

    fn install(&self, kernel: &Kernel) -> Result<()> {
        kernel.set_vfs(Arc::clone(&self.fs));
        Ok(())
    }
}
