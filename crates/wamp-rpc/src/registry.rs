//! Handler registry: method name to handler.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::connection::Connection;
use crate::errors::ErrorObject;

/// Trait implemented by every method or event handler.
///
/// For requests the returned value becomes the response. For notifications
/// it is discarded. `peer` is the connection the frame arrived on, so a
/// handler can call back into the same peer.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the handler with the given params.
    async fn handle(&self, params: Option<Value>, peer: &Connection) -> Result<Value, ErrorObject>;
}

/// Lookup capability the router consumes.
pub trait HandlerRegistry: Send + Sync {
    /// Find the handler for `method`.
    fn lookup(&self, method: &str) -> Option<Arc<dyn MethodHandler>>;

    /// Register `handler` under `method`, replacing any previous one.
    fn register(&self, method: &str, handler: Arc<dyn MethodHandler>);

    /// Remove the handler for `method`. Returns whether one existed.
    fn unregister(&self, method: &str) -> bool;
}

/// Default in-memory registry.
pub struct MethodRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn MethodHandler>>>,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler value for a method name.
    pub fn add(&self, method: &str, handler: impl MethodHandler + 'static) {
        self.register(method, Arc::new(handler));
    }

    /// List all registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.read().contains_key(method)
    }
}

impl HandlerRegistry for MethodRegistry {
    fn lookup(&self, method: &str) -> Option<Arc<dyn MethodHandler>> {
        self.handlers.read().get(method).cloned()
    }

    fn register(&self, method: &str, handler: Arc<dyn MethodHandler>) {
        let _ = self.handlers.write().insert(method.to_owned(), handler);
    }

    fn unregister(&self, method: &str) -> bool {
        self.handlers.write().remove(method).is_some()
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler built from an async closure. See [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Adapt `f(params, peer)` into a [`MethodHandler`].
///
/// The peer is passed by value so the returned future can own it.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Option<Value>, Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ErrorObject>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> MethodHandler for FnHandler<F>
where
    F: Fn(Option<Value>, Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ErrorObject>> + Send + 'static,
{
    async fn handle(&self, params: Option<Value>, peer: &Connection) -> Result<Value, ErrorObject> {
        (self.f)(params, peer.clone()).await
    }
}
