//! Runtime facade --- [`Runtime`].
//!
//! Wires the kernel, the engine and the loader together: installs
//! plugins in dependency order, pumps watcher flushes, and exposes
//! the public execution surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rquickjs::Persistent;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::builtins::BuiltinRegistry;
use crate::config::RuntimeConfig;
use crate::engine::{ConsoleEntry, ConsoleSink, Engine, ModuleExports};
use crate::error::Result;
use crate::kernel::{topological_sort, Kernel, Plugin, VfsPlugin};
use crate::loader::{cjs, esm, LoaderShared};
use crate::path;
use crate::vfs::node::now_millis;
use crate::vfs::MemFs;

/// What `execute` hands back: the module's exports plus everything
/// the code logged while it ran.
#[derive(Debug)]
pub struct ExecuteOutcome {
    pub exports: ModuleExports,
    pub console: Vec<ConsoleEntry>,
}

/// Configures and builds a [`Runtime`].
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    /// A builder pre-seeded with the stock VFS plugin.
    pub fn new() -> Self {
        Self { config: RuntimeConfig::default(), plugins: vec![Arc::new(VfsPlugin::new())] }
    }

    /// A builder with no plugins at all. Without a VFS plugin the
    /// runtime can only evaluate inline code.
    pub fn empty() -> Self {
        Self { config: RuntimeConfig::default(), plugins: Vec::new() }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn build(self) -> Result<Runtime> {
        let builtins = Arc::new(BuiltinRegistry::new());
        let kernel = Arc::new(Kernel::new(self.config, Arc::clone(&builtins)));

        let ordered = topological_sort(&self.plugins)?;
        for plugin in &ordered {
            kernel.use_plugin(Arc::clone(plugin))?;
        }

        let engine = Arc::new(Engine::new()?);
        let shared = Arc::new(LoaderShared::new(Arc::clone(&kernel), builtins));
        let console = Arc::new(ConsoleSink::new());
        engine.install_console(Arc::clone(&console))?;
        esm::install(&engine, &shared)?;

        let watch_pump = spawn_watch_pump(&kernel);
        let runtime = Runtime {
            kernel,
            engine,
            shared,
            console,
            exec_counter: AtomicU64::new(0),
            watch_pump,
        };

        for plugin in &ordered {
            plugin.on_ready(runtime.kernel.as_ref())?;
        }
        runtime.kernel.emit("ready", &[]);
        Ok(runtime)
    }
}

/// Flushes watcher batches one scheduling tick after the first event,
/// for as long as the filesystem is alive and an async runtime hosts
/// the task.
fn spawn_watch_pump(kernel: &Arc<Kernel>) -> Option<JoinHandle<()>> {
    let vfs = kernel.vfs().ok()?;
    let handle = tokio::runtime::Handle::try_current().ok()?;
    let wake = vfs.watch_wake();
    let weak = Arc::downgrade(&vfs);
    drop(vfs);
    Some(handle.spawn(async move {
        while wake.recv().await.is_ok() {
            tokio::task::yield_now().await;
            match weak.upgrade() {
                Some(vfs) => vfs.flush_watch_events(),
                None => break,
            }
        }
    }))
}

/// The assembled runtime.
pub struct Runtime {
    kernel: Arc<Kernel>,
    engine: Arc<Engine>,
    shared: Arc<LoaderShared>,
    console: Arc<ConsoleSink>,
    exec_counter: AtomicU64,
    watch_pump: Option<JoinHandle<()>>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// A runtime with the default configuration and stock plugins.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn kernel(&self) -> &Kernel {
        self.kernel.as_ref()
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.kernel.config()
    }

    /// The filesystem, once the VFS plugin has installed it.
    pub fn vfs(&self) -> Result<Arc<MemFs>> {
        self.kernel.vfs()
    }

    /// Runs `code` as a CommonJS module body.
    ///
    /// The code lands at `filename` in the VFS (a unique
    /// `/__exec_<timestamp>.js` when none is given) and loads through
    /// the regular module path. Without a filesystem the code is
    /// evaluated directly and nothing is cached.
    pub fn execute(&self, code: &str, filename: Option<&str>) -> Result<ExecuteOutcome> {
        self.console.clear();
        match self.kernel.vfs() {
            Ok(vfs) => {
                let file_path = match filename {
                    Some(name) => path::normalize(name)?,
                    None => self.unique_exec_path(),
                };
                vfs.write_file(&file_path, code)?;
                let exports = self.require_from(&file_path, &self.config().require_base())?;
                Ok(ExecuteOutcome { exports, console: self.console.drain() })
            }
            Err(_) => {
                debug!("no filesystem registered; evaluating directly");
                let file_path = filename.unwrap_or("/__exec__.js");
                let engine = Arc::clone(&self.engine);
                let persistent = self.engine.context().with(|ctx| {
                    cjs::execute_inline(&self.shared, &ctx, code, file_path)
                        .map(|value| Persistent::save(&ctx, value))
                })?;
                Ok(ExecuteOutcome {
                    exports: ModuleExports::new(engine, persistent),
                    console: self.console.drain(),
                })
            }
        }
    }

    /// Reads a file from the VFS and executes it.
    pub fn run_file(&self, file_path: &str) -> Result<ExecuteOutcome> {
        let vfs = self.kernel.vfs()?;
        let canonical = vfs.realpath(file_path)?;
        let code = vfs.read_to_string(&canonical)?;
        self.execute(&code, Some(&canonical))
    }

    /// Synchronous CommonJS entry point, rooted at the configured cwd.
    pub fn require(&self, spec: &str) -> Result<ModuleExports> {
        self.require_from(spec, &self.config().require_base())
    }

    /// `require` with an explicit requester path.
    pub fn require_from(&self, spec: &str, from: &str) -> Result<ModuleExports> {
        let engine = Arc::clone(&self.engine);
        let persistent = self.engine.context().with(|ctx| {
            cjs::require(&self.shared, &ctx, spec, from).map(|value| Persistent::save(&ctx, value))
        })?;
        Ok(ModuleExports::new(engine, persistent))
    }

    /// Asynchronous ES-module entry point, rooted at the configured
    /// cwd. Resolves to the module's namespace object.
    pub async fn import(&self, spec: &str) -> Result<ModuleExports> {
        let base = self.config().require_base();
        let persistent = esm::import_module(&self.shared, &self.engine, spec, &base).await?;
        Ok(ModuleExports::new(Arc::clone(&self.engine), persistent))
    }

    /// Registers a plugin after construction. Builtins it registers
    /// are visible to the resolver immediately since the registry is
    /// shared.
    pub fn use_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        self.kernel.use_plugin(plugin)
    }

    /// Invalidates the module, resolution and transform caches and
    /// revokes every module published to the engine.
    pub fn clear_cache(&self) -> Result<()> {
        self.shared.cache.clear();
        self.shared.resolver.clear();
        self.shared.transforms.clear();
        self.engine.reset()?;
        self.engine.install_console(Arc::clone(&self.console))?;
        esm::install(&self.engine, &self.shared)?;
        Ok(())
    }

    /// Emits `destroy`, unregisters plugins in reverse registration
    /// order (faults logged, never fatal, so teardown reaches every
    /// plugin) and drops all caches.
    pub async fn destroy(&self) {
        self.kernel.emit("destroy", &[]);
        let names = self.kernel.list_plugins();
        for name in names.iter().rev() {
            if let Err(err) = self.kernel.unregister(name) {
                warn!(plugin = %name, error = %err, "unregister failed during destroy");
            }
        }
        // Give fire-and-forget on_destroy tasks a tick to run.
        tokio::task::yield_now().await;
        if let Some(pump) = &self.watch_pump {
            pump.abort();
        }
        self.shared.cache.clear();
        self.shared.resolver.clear();
        self.shared.transforms.clear();
    }

    fn unique_exec_path(&self) -> String {
        let stamp = now_millis();
        let sequence = self.exec_counter.fetch_add(1, Ordering::Relaxed);
        format!("/__exec_{stamp}_{sequence}.js")
    }
}
