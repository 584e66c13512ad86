//! The JSON-RPC 2.0 surface of the node.
//!
//! A thin HTTP edge over the core service registry: the fixed method
//! table below is registered with jsonrpsee and every call forwards to
//! [`Registry::invoke`], so the dispatch logic stays transport-free.
//! `BadInput` maps to `-32602`, every other failure to `-32603`.
//!
//! The faucet rate limit lives here as a sidecar policy — the validator
//! never consults it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use jsonrpsee::server::{RpcModule, Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use tower::ServiceBuilder;

use cerera_core::{Address, Error as CoreError, Registry};

/// JSON-RPC error code for internal failures.
pub const INTERNAL_ERROR: i32 = -32603;

/// JSON-RPC error code for malformed parameters.
pub const INVALID_PARAMS: i32 = -32602;

/// Per-request timeout applied as HTTP middleware.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The fixed method surface.  Each name also resolves with the
/// `cerera.` prefix through the registry.
pub const METHODS: &[&str] = &[
    "account.getAll",
    "account.getCount",
    "account.create",
    "account.restore",
    "account.balance",
    "account.faucet",
    "transaction.send",
    "transaction.get",
    "chain.getLatestBlock",
    "chain.getBlockByHeight",
    "chain.getBlockByHash",
    "chain.height",
    "miner.status",
    "miner.start",
    "miner.stop",
];

/// Translates a core error into the JSON-RPC error object.
pub fn error_object(e: &CoreError) -> ErrorObjectOwned {
    let code = match e {
        CoreError::BadInput(_) => INVALID_PARAMS,
        _ => INTERNAL_ERROR,
    };
    ErrorObjectOwned::owned(code, e.to_string(), None::<()>)
}

/// Binds the HTTP server and starts serving the registry.
pub async fn serve(addr: SocketAddr, registry: Arc<Registry>) -> cerera_core::Result<ServerHandle> {
    let middleware = ServiceBuilder::new().timeout(REQUEST_TIMEOUT);
    let server = Server::builder()
        .set_http_middleware(middleware)
        .build(addr)
        .await
        .map_err(|e| CoreError::Persist(format!("rpc bind {addr}: {e}")))?;
    let mut module = RpcModule::new(registry);
    for &method in METHODS {
        module
            .register_method(method, move |params, registry, _ext| {
                let value = params
                    .parse::<serde_json::Value>()
                    .unwrap_or(serde_json::Value::Null);
                registry.invoke(method, value).map_err(|e| error_object(&e))
            })
            .expect("method names are unique");
    }
    log::info!("rpc: listening on {addr}");
    Ok(server.start(module))
}

/// Sidecar faucet policy: one request per window per address.
pub struct FaucetGate {
    window: Duration,
    last: Mutex<HashMap<Address, Instant>>,
}

impl FaucetGate {
    /// The documented production policy: one request per hour.
    pub fn hourly() -> FaucetGate {
        FaucetGate::new(Duration::from_secs(3600))
    }

    pub fn new(window: Duration) -> FaucetGate {
        FaucetGate {
            window,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Records and admits the request unless one landed inside the
    /// current window.
    pub fn allow(&self, address: &Address) -> bool {
        let mut last = self.last.lock().expect("faucet gate poisoned");
        let now = Instant::now();
        match last.get(address) {
            Some(at) if now.duration_since(*at) < self.window => false,
            _ => {
                last.insert(*address, now);
                true
            }
        }
    }
}
