use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use jsbox::error::Result;
use jsbox::kernel::Kernel;
use jsbox::{Plugin, Runtime, RuntimeBuilder};

struct TracingPlugin {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
    destroyed: Arc<AtomicBool>,
}

impl TracingPlugin {
    fn new(name: &str, log: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            log,
            destroyed: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl Plugin for TracingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn install(&self, _kernel: &Kernel) -> Result<()> {
        self.log.lock().unwrap().push(format!("install:{}", self.name));
        Ok(())
    }

    async fn on_destroy(&self) -> Result<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        self.log.lock().unwrap().push(format!("destroy:{}", self.name));
        Ok(())
    }
}

#[tokio::test]
async fn destroy_unregisters_in_reverse_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let first = TracingPlugin::new("first", Arc::clone(&log));
    let second = TracingPlugin::new("second", Arc::clone(&log));

    let runtime = RuntimeBuilder::new()
        .plugin(first.clone())
        .plugin(second.clone())
        .build()
        .expect("runtime");

    let destroy_seen = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&destroy_seen);
    runtime.kernel().on("destroy", move |_args| {
        flag.store(true, Ordering::SeqCst);
    });

    runtime.destroy().await;
    tokio::task::yield_now().await;

    assert!(destroy_seen.load(Ordering::SeqCst));
    assert!(first.destroyed.load(Ordering::SeqCst));
    assert!(second.destroyed.load(Ordering::SeqCst));
    assert!(runtime.kernel().list_plugins().is_empty());

    let log = log.lock().unwrap();
    let installs: Vec<&String> = log.iter().filter(|l| l.starts_with("install:")).collect();
    assert_eq!(installs, vec!["install:first", "install:second"]);
}

#[tokio::test]
async fn plugins_install_in_dependency_order() {
    struct Dependent {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for Dependent {
        fn name(&self) -> &str {
            "dependent"
        }

        fn dependencies(&self) -> Vec<String> {
            vec!["base".to_owned()]
        }

        fn install(&self, _kernel: &Kernel) -> Result<()> {
            self.log.lock().unwrap().push("install:dependent".to_owned());
            Ok(())
        }
    }

    let log = Arc::new(Mutex::new(Vec::new()));
    // Registered in the wrong order on purpose; the builder sorts.
    let runtime = RuntimeBuilder::new()
        .plugin(Arc::new(Dependent { log: Arc::clone(&log) }))
        .plugin(TracingPlugin::new("base", Arc::clone(&log)))
        .build()
        .expect("runtime");

    let log = log.lock().unwrap();
    assert_eq!(*log, vec!["install:base", "install:dependent"]);
    assert_eq!(runtime.kernel().list_plugins(), vec!["vfs", "base", "dependent"]);
}

#[test]
fn ready_event_fires_after_build() {
    // Synchronous build without a tokio runtime: the ready event still
    // reaches handlers registered by plugins during install.
    struct ReadyProbe {
        seen: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Plugin for ReadyProbe {
        fn name(&self) -> &str {
            "ready-probe"
        }

        fn install(&self, kernel: &Kernel) -> Result<()> {
            let seen = Arc::clone(&self.seen);
            kernel.on("ready", move |_args| {
                seen.store(true, Ordering::SeqCst);
            });
            Ok(())
        }
    }

    let seen = Arc::new(AtomicBool::new(false));
    let _runtime = Runtime::builder()
        .plugin(Arc::new(ReadyProbe { seen: Arc::clone(&seen) }))
        .build()
        .expect("runtime");
    assert!(seen.load(Ordering::SeqCst));
}
