use std::sync::Arc;

use async_trait::async_trait;
use jsbox::builtins::SourceBuiltin;
use jsbox::error::Result;
use jsbox::kernel::Kernel;
use jsbox::{MemFs, Plugin, Runtime};

pub struct Fixture {
    pub runtime: Runtime,
}

impl Fixture {
    pub fn new() -> Self {
        Self { runtime: Runtime::new().expect("build runtime") }
    }

    pub fn vfs(&self) -> Arc<MemFs> {
        self.runtime.vfs().expect("vfs plugin installed")
    }

    pub fn write(&self, path: &str, code: &str) {
        self.vfs().write_file(path, code).expect("write fixture file");
    }

    pub fn mkdir(&self, path: &str) {
        self.vfs().mkdir(path, true).expect("create fixture dir");
    }
}

/// A minimal stand-in for the shims plugin: registers an `os` builtin
/// the way the real shims bundle registers its modules.
pub struct OsShimPlugin;

#[async_trait]
impl Plugin for OsShimPlugin {
    fn name(&self) -> &str {
        "os-shim"
    }

    fn install(&self, kernel: &Kernel) -> Result<()> {
        kernel.builtins().register(
            "os",
            Arc::new(SourceBuiltin::new(
                "({ platform: 'jsbox', release() { return '1.0'; } })",
            )),
        );
        Ok(())
    }
}

pub fn fixture_with_os_shim() -> Fixture {
    let fixture = Fixture::new();
    fixture.runtime.use_plugin(Arc::new(OsShimPlugin)).expect("register shim plugin");
    fixture
}
