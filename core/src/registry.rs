//! Namespaced service dispatch: `component.action` → handler.
//!
//! The RPC edge registers each exposed method here and forwards every
//! invocation; the registry itself is transport-free.  The
//! `cerera.`-prefixed alias of every method resolves to the same handler.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{Error, Result};

pub type Handler = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

#[derive(Default)]
pub struct Registry {
    methods: RwLock<HashMap<String, Handler>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Registers `component.action`; a later registration under the same
    /// name replaces the earlier one.
    pub fn register<F>(&self, component: &str, action: &str, handler: F)
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.methods
            .write()
            .insert(format!("{component}.{action}"), Arc::new(handler));
    }

    /// Resolves `component.action` or `cerera.component.action` and runs
    /// the handler outside the registry lock.
    pub fn invoke(&self, method: &str, params: Value) -> Result<Value> {
        let name = method.strip_prefix("cerera.").unwrap_or(method);
        let handler = self
            .methods
            .read()
            .get(name)
            .cloned()
            .ok_or(Error::NotFound)?;
        handler(params)
    }

    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.read().keys().cloned().collect();
        names.sort();
        names
    }
}
