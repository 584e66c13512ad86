//! Registry wiring: every RPC method the node exposes, bound to the
//! assembled components.

use std::sync::Arc;

use serde_json::{json, Value};

use cerera_core::{
    Address, Chain, Error, Hash, Mempool, Miner, Registry, Result, Validator, Vault,
};
use cerera_rpc::FaucetGate;

/// The assembled node components a handler may reach.
pub struct Services {
    pub chain: Arc<Chain>,
    pub vault: Arc<Vault>,
    pub mempool: Arc<Mempool>,
    pub validator: Arc<Validator>,
    pub miner: Arc<Miner>,
    pub faucet_gate: Arc<FaucetGate>,
}

/// First positional parameter, or the parameter value itself.
fn first_param(params: &Value) -> Value {
    match params {
        Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
        other => other.clone(),
    }
}

fn param_str(v: &Value) -> Result<String> {
    v.as_str()
        .map(str::to_owned)
        .ok_or_else(|| Error::BadInput("expected a string parameter".into()))
}

fn amount_param(v: &Value) -> Result<String> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(Error::BadInput("expected an amount".into())),
    }
}

/// Registers the complete `component.action` surface.
pub fn register_all(registry: &Registry, services: &Services) {
    let vault = Arc::clone(&services.vault);
    registry.register("account", "getAll", move |_params| {
        Ok(Value::Array(
            vault.all().iter().map(|a| a.to_json()).collect(),
        ))
    });

    let vault = Arc::clone(&services.vault);
    registry.register("account", "getCount", move |_params| {
        Ok(json!(vault.count()))
    });

    let vault = Arc::clone(&services.vault);
    registry.register("account", "create", move |params| {
        let passphrase = param_str(&first_param(&params))?;
        let address = vault.create(&passphrase)?;
        Ok(json!(address.checksum_string()))
    });

    let vault = Arc::clone(&services.vault);
    registry.register("account", "restore", move |params| {
        let (mnemonic, passphrase) = match &params {
            Value::Array(items) if items.len() >= 2 => {
                (param_str(&items[0])?, param_str(&items[1])?)
            }
            Value::Object(map) => (
                param_str(map.get("mnemonic").unwrap_or(&Value::Null))?,
                param_str(map.get("passphrase").unwrap_or(&Value::Null))?,
            ),
            _ => return Err(Error::BadInput("expected mnemonic and passphrase".into())),
        };
        let address = vault.restore(&mnemonic, &passphrase)?;
        Ok(json!(address.checksum_string()))
    });

    let vault = Arc::clone(&services.vault);
    registry.register("account", "balance", move |params| {
        let address = Address::from_hex(&param_str(&first_param(&params))?)?;
        let account = vault.get(&address).ok_or(Error::NotFound)?;
        Ok(json!(account.balance().to_decimal_string()))
    });

    let validator = Arc::clone(&services.validator);
    let gate = Arc::clone(&services.faucet_gate);
    registry.register("account", "faucet", move |params| {
        let (address, amount) = match &params {
            Value::Array(items) if items.len() >= 2 => (
                Address::from_hex(&param_str(&items[0])?)?,
                amount_param(&items[1])?,
            ),
            Value::Object(map) => (
                Address::from_hex(&param_str(map.get("address").unwrap_or(&Value::Null))?)?,
                amount_param(map.get("amount").unwrap_or(&Value::Null))?,
            ),
            _ => return Err(Error::BadInput("expected address and amount".into())),
        };
        if !gate.allow(&address) {
            return Err(Error::BadInput(
                "faucet: one request per hour per address".into(),
            ));
        }
        let hash = validator.faucet(address, &amount)?;
        Ok(json!(hash.to_hex()))
    });

    let validator = Arc::clone(&services.validator);
    registry.register("transaction", "send", move |params| {
        let hash = validator.send(&params)?;
        Ok(json!(hash.to_hex()))
    });

    let chain = Arc::clone(&services.chain);
    let mempool = Arc::clone(&services.mempool);
    registry.register("transaction", "get", move |params| {
        let hash = Hash::from_hex(&param_str(&first_param(&params))?)?;
        if let Some((tx, height)) = chain.find_transaction(&hash) {
            let mut v = tx.to_json();
            v["blockHeight"] = json!(height);
            return Ok(v);
        }
        // Still pending?
        mempool
            .get(&hash)
            .map(|tx| tx.to_json())
            .ok_or(Error::NotFound)
    });

    let chain = Arc::clone(&services.chain);
    registry.register("chain", "getLatestBlock", move |_params| {
        Ok(chain.latest().to_json())
    });

    let chain = Arc::clone(&services.chain);
    registry.register("chain", "getBlockByHeight", move |params| {
        let height = first_param(&params)
            .as_i64()
            .ok_or_else(|| Error::BadInput("expected a height".into()))?;
        chain
            .by_height(height)
            .map(|b| b.to_json())
            .ok_or(Error::NotFound)
    });

    let chain = Arc::clone(&services.chain);
    registry.register("chain", "getBlockByHash", move |params| {
        let hash = Hash::from_hex(&param_str(&first_param(&params))?)?;
        chain
            .by_hash(&hash)
            .map(|b| b.to_json())
            .ok_or(Error::NotFound)
    });

    let chain = Arc::clone(&services.chain);
    registry.register("chain", "height", move |_params| Ok(json!(chain.height())));

    let miner = Arc::clone(&services.miner);
    registry.register("miner", "status", move |_params| Ok(miner.status()));

    let miner = Arc::clone(&services.miner);
    registry.register("miner", "start", move |_params| {
        miner.start()?;
        Ok(json!("started"))
    });

    let miner = Arc::clone(&services.miner);
    registry.register("miner", "stop", move |_params| {
        miner.stop();
        Ok(json!("stopped"))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use cerera_core::ConfigBuilder;

    fn services() -> (Arc<Registry>, Services) {
        let config = ConfigBuilder::new().difficulty(1).finish();
        let chain = Arc::new(Chain::new(&config));
        let vault = Arc::new(Vault::open(&config).unwrap());
        let mempool = Arc::new(Mempool::new(config.pool_max_size, config.min_gas.clone()));
        let validator = Arc::new(Validator::new(
            Arc::clone(&chain),
            Arc::clone(&vault),
            Arc::clone(&mempool),
            &config,
        ));
        let miner = Arc::new(Miner::new(
            Arc::clone(&chain),
            Arc::clone(&mempool),
            Arc::clone(&validator),
            Address([0xbb; 32]),
            &config,
        ));
        let services = Services {
            chain,
            vault,
            mempool,
            validator,
            miner,
            faucet_gate: Arc::new(FaucetGate::hourly()),
        };
        let registry = Arc::new(Registry::new());
        register_all(&registry, &services);
        (registry, services)
    }

    #[test]
    fn account_lifecycle_over_rpc() {
        eprintln!("PROBE: setup");
        let (registry, services) = services();
        eprintln!("PROBE: getCount 1");
        assert_eq!(
            registry.invoke("account.getCount", Value::Null).unwrap(),
            json!(0)
        );
        eprintln!("PROBE: create");
        let addr = registry
            .invoke("account.create", json!(["hunter2"]))
            .unwrap();
        eprintln!("PROBE: getCount 2");
        assert_eq!(
            registry.invoke("account.getCount", Value::Null).unwrap(),
            json!(1)
        );
        // Faucet, mine, then query the balance.
        eprintln!("PROBE: faucet");
        registry
            .invoke("cerera.account.faucet", json!([addr.clone(), "10"]))
            .unwrap();
        eprintln!("PROBE: mine_now");
        services.miner.mine_now().unwrap();
        eprintln!("PROBE: balance");
        assert_eq!(
            registry.invoke("account.balance", json!([addr])).unwrap(),
            json!("10")
        );
        eprintln!("PROBE: done");
    }

    #[test]
    fn faucet_gate_applies_at_the_edge() {
        let (registry, _services) = services();
        let addr = Address([0x33; 32]).checksum_string();
        registry
            .invoke("account.faucet", json!([addr.clone(), "1"]))
            .unwrap();
        assert!(matches!(
            registry.invoke("account.faucet", json!([addr, "1"])),
            Err(Error::BadInput(_))
        ));
    }

    #[test]
    fn chain_queries() {
        let (registry, services) = services();
        assert_eq!(registry.invoke("chain.height", Value::Null).unwrap(), json!(0));
        let latest = registry.invoke("chain.getLatestBlock", Value::Null).unwrap();
        assert_eq!(latest["header"]["height"], json!(0));
        let by_height = registry
            .invoke("chain.getBlockByHeight", json!([0]))
            .unwrap();
        assert_eq!(by_height["hash"], latest["hash"]);
        let by_hash = registry
            .invoke("chain.getBlockByHash", json!([latest["hash"].clone()]))
            .unwrap();
        assert_eq!(by_hash["hash"], latest["hash"]);
        assert_eq!(
            registry.invoke("chain.getBlockByHeight", json!([42])),
            Err(Error::NotFound)
        );
        let _ = services;
    }

    #[test]
    fn transaction_send_and_get_over_rpc() {
        let (registry, services) = services();
        let addr = registry
            .invoke("account.create", json!(["pw"]))
            .unwrap();
        registry
            .invoke("account.faucet", json!([addr.clone(), "10"]))
            .unwrap();
        services.miner.mine_now().unwrap();

        let sender = Address::from_hex(addr.as_str().unwrap()).unwrap();
        let key_hash = services.vault.get(&sender).unwrap().key_hash;
        let hash = registry
            .invoke(
                "transaction.send",
                json!({
                    "key": key_hash.to_hex(),
                    "nonce": 1,
                    "to": Address([0x55; 32]).checksum_string(),
                    "amount": "2.5",
                    "gas": 0.000001,
                }),
            )
            .unwrap();
        // Pending form first, mined form after the next tick.
        let pending = registry
            .invoke("transaction.get", json!([hash.clone()]))
            .unwrap();
        assert_eq!(pending["value"], json!("2500000000000000000"));
        services.miner.mine_now().unwrap();
        let mined = registry.invoke("transaction.get", json!([hash])).unwrap();
        assert_eq!(mined["blockHeight"], json!(2));
    }

    #[test]
    fn miner_control() {
        let (registry, _services) = services();
        let status = registry.invoke("miner.status", Value::Null).unwrap();
        assert_eq!(status["state"], json!("stopped"));
        registry.invoke("miner.start", Value::Null).unwrap();
        registry.invoke("miner.stop", Value::Null).unwrap();
        let status = registry.invoke("miner.status", Value::Null).unwrap();
        assert_eq!(status["state"], json!("stopped"));
    }
}
