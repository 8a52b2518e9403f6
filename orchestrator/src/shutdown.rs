use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::{info, warn};

type Handler = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Named cleanup jobs run when the process is interrupted
///
/// Adapters register a handler before creating something that must not
/// outlive an interrupted run (a template build container, say) and
/// unregister it once the resource is cleaned up normally.
#[derive(Default)]
pub struct ShutdownRegistry {
    handlers: Mutex<BTreeMap<String, Handler>>,
}

impl ShutdownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: impl Into<String>, handler: F)
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        let name = name.into();
        match self.handlers.lock() {
            Ok(mut handlers) => {
                handlers.insert(name, Box::new(handler));
            }
            Err(e) => warn!("Shutdown registry poisoned, dropping handler {}: {}", name, e),
        }
    }

    pub fn unregister(&self, name: &str) {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.remove(name);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run and drop every registered handler
    pub async fn run_all(&self) {
        let handlers = match self.handlers.lock() {
            Ok(mut handlers) => std::mem::take(&mut *handlers),
            Err(_) => return,
        };
        for (name, handler) in handlers {
            info!("Running shutdown handler: {}", name);
            handler().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_run_all_runs_registered_handlers_once() {
        let registry = ShutdownRegistry::new();
        let runs = Arc::new(AtomicUsize::new(0));

        for name in ["tmpl-a", "tmpl-b", "tmpl-c"] {
            let runs = runs.clone();
            registry.register(name, move || {
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                }
                .boxed()
            });
        }
        registry.unregister("tmpl-b");
        assert_eq!(registry.len(), 2);

        registry.run_all().await;
        registry.run_all().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(registry.is_empty());
    }
}
