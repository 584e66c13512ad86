//! End-to-end scenarios driving the assembled node core: vault, chain,
//! mempool, validator and miner wired together the way the composition
//! root wires them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cerera_core::account::{Account, AccountStatus};
use cerera_core::block::{Block, GENESIS_DIFFICULTY, GENESIS_TIMESTAMP_MS};
use cerera_core::config::{Config, ConfigBuilder};
use cerera_core::miner::{Miner, MinerState};
use cerera_core::{
    pow, Address, BlockRule, Chain, Coins, Error, Gossip, Hash, Mempool, Transaction, Validator,
    Vault,
};

struct Node {
    config: Config,
    chain: Arc<Chain>,
    vault: Arc<Vault>,
    mempool: Arc<Mempool>,
    validator: Arc<Validator>,
    miner: Arc<Miner>,
    gossip: Arc<Gossip>,
}

const MINER_ADDRESS: Address = Address([0xbb; 32]);

fn node_with(config: Config) -> Node {
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
        MINER_ADDRESS,
        &config,
    ));
    let gossip = Arc::new(Gossip::new(
        Arc::clone(&chain),
        Arc::clone(&validator),
        Arc::clone(&mempool),
    ));
    mempool.register(miner.observer());
    Node {
        config,
        chain,
        vault,
        mempool,
        validator,
        miner,
        gossip,
    }
}

fn fast_node() -> Node {
    // Difficulty 1 admits every hash, so each mining tick lands instantly.
    node_with(ConfigBuilder::new().difficulty(1).finish())
}

/// A valid external candidate for the next height, mined at difficulty 1.
fn external_block(chain: &Chain) -> Block {
    let tip = chain.latest();
    let mut block = Block {
        header: cerera_core::Header {
            height: tip.header.height + 1,
            index: tip.header.index + 1,
            prev_hash: tip.hash(),
            timestamp: tip.header.timestamp + 1,
            difficulty: 1,
            node: Address([0xee; 32]),
            ..tip.header.clone()
        },
        transactions: vec![Transaction::coinbase(
            Address([0xee; 32]),
            Coins::whole(5),
            tip.header.timestamp + 1,
        )],
        confirmations: 0,
    };
    block.seal_size();
    block
}

#[test]
fn genesis_bootstrap() {
    let node = node_with(ConfigBuilder::new().chain_id(11).finish());
    assert_eq!(node.chain.height(), 0);
    assert_eq!(node.vault.count(), 0);

    let genesis = node.chain.by_height(0).unwrap();
    assert_eq!(genesis.header.difficulty, GENESIS_DIFFICULTY);
    assert_eq!(genesis.header.difficulty, 11_111_111);
    assert_eq!(genesis.header.timestamp, GENESIS_TIMESTAMP_MS);
    assert_eq!(genesis.header.chain_id, 11);

    // Two cold starts agree bit for bit.
    let second = node_with(ConfigBuilder::new().chain_id(11).finish());
    assert_eq!(node.chain.latest().hash(), second.chain.latest().hash());
}

#[test]
fn fund_and_transfer() {
    let node = fast_node();
    let sender = node.vault.create("passphrase").unwrap();
    let key_hash = node.vault.get(&sender).unwrap().key_hash;
    let recipient = Address([0x42; 32]);

    // Faucet credit lands with the first mining tick.
    node.validator.faucet(sender, "10").unwrap();
    node.miner.mine_now().unwrap();
    assert_eq!(node.vault.get(&sender).unwrap().balance(), Coins::whole(10));

    let params = serde_json::json!({
        "key": key_hash.to_hex(),
        "nonce": 1,
        "to": recipient.checksum_string(),
        "amount": "3.25",
        "gas": 0.000001,
    });
    let tx_hash = node.validator.send(&params).unwrap();
    let mined = node.miner.mine_now().unwrap();

    // balance(A) = 10 − 3.25 − 0.000001, balance(B) = 3.25.
    let expected_sender = Coins::whole(10)
        .checked_sub(&Coins::from_decimal_str("3.250001").unwrap())
        .unwrap();
    assert_eq!(node.vault.get(&sender).unwrap().balance(), expected_sender);
    assert_eq!(
        node.vault.get(&recipient).unwrap().balance(),
        Coins::from_decimal_str("3.25").unwrap()
    );
    assert_eq!(node.vault.get(&sender).unwrap().nonce, 1);

    // The transaction hash appears in the mined block.
    let block = node.chain.by_hash(&mined).unwrap();
    assert!(block.transactions.iter().any(|tx| tx.hash() == tx_hash));
    let (found, height) = node.chain.find_transaction(&tx_hash).unwrap();
    assert_eq!(found.value, Coins::from_decimal_str("3.25").unwrap());
    assert_eq!(height, block.header.height);

    // The recipient's inputs record the crediting transaction.
    assert_eq!(
        node.vault.get(&recipient).unwrap().input(&tx_hash).unwrap(),
        Coins::from_decimal_str("3.25").unwrap()
    );
}

#[test]
fn balance_conservation_per_block() {
    let node = fast_node();
    let sender = node.vault.create("pw").unwrap();
    let key_hash = node.vault.get(&sender).unwrap().key_hash;
    node.validator.faucet(sender, "10").unwrap();
    node.miner.mine_now().unwrap();

    let before: Coins = node
        .vault
        .all()
        .iter()
        .fold(Coins::zero(), |acc, a| acc + a.balance());

    let params = serde_json::json!({
        "key": key_hash.to_hex(),
        "nonce": 1,
        "to": Address([0x42; 32]).checksum_string(),
        "amount": "2",
        "gas": 0.000001,
    });
    node.validator.send(&params).unwrap();
    node.miner.mine_now().unwrap();

    let after: Coins = node
        .vault
        .all()
        .iter()
        .fold(Coins::zero(), |acc, a| acc + a.balance());

    // Transfers net out; the block adds the coinbase credit and burns the
    // fee debited from the sender.
    let expected = before + node.config.block_reward.clone();
    let expected = expected
        .checked_sub(&Coins::from_decimal_str("0.000001").unwrap())
        .unwrap();
    assert_eq!(after, expected);
}

#[test]
fn mempool_admission_rejection() {
    let node = fast_node();
    let mut tx = Transaction::new_legacy(
        1,
        Address([2u8; 32]),
        Coins::whole(1),
        Coins::from_decimal_str("0.000001").unwrap(),
        Coins::from_decimal_str("0.0000005").unwrap(),
        Vec::new(),
        cerera_core::now_ms(),
    );
    tx.from = Address([3u8; 32]);
    let before = node.mempool.size_bytes();
    assert_eq!(node.mempool.queue(tx), Err(Error::GasTooLow));
    assert_eq!(node.mempool.size_bytes(), before);
    assert_eq!(node.mempool.len(), 0);
}

#[test]
fn miner_cancellation_on_external_block() {
    // A practically unreachable target keeps the local search running
    // until the external block fires the cancel channel.
    let node = node_with(
        ConfigBuilder::new()
            .difficulty(u64::MAX)
            .mine_interval_ms(20)
            .finish(),
    );
    node.miner.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while node.miner.state() != MinerState::Searching {
        assert!(Instant::now() < deadline, "miner never started searching");
        std::thread::sleep(Duration::from_millis(5));
    }

    // An externally produced valid block at the same target height; its
    // own header carries an easy difficulty.
    let external = external_block(&node.chain);
    let external_hash = external.hash();
    node.gossip.deliver_block(external, "peer-x");

    assert_eq!(node.chain.height(), 1);
    assert_eq!(node.chain.latest().hash(), external_hash);

    let deadline = Instant::now() + Duration::from_secs(5);
    while node.miner.metrics().cancelled.load(std::sync::atomic::Ordering::Relaxed) == 0 {
        assert!(Instant::now() < deadline, "miner never observed the cancel");
        std::thread::sleep(Duration::from_millis(5));
    }

    node.miner.stop();
    assert_eq!(node.miner.state(), MinerState::Stopped);
    // The local candidate was discarded: the chain advanced exactly once.
    assert_eq!(node.chain.height(), 1);
}

#[test]
fn double_lock_rejection() {
    let node = fast_node();
    let a = external_block(&node.chain);
    let mut b = external_block(&node.chain);
    b.header.node = Address([0xdd; 32]);
    b.transactions[0].to = Address([0xdd; 32]);
    b.seal_size();

    let node = Arc::new(node);
    let mut handles = Vec::new();
    for block in [a, b] {
        let node = Arc::clone(&node);
        handles.push(std::thread::spawn(move || {
            node.chain
                .receive_external_block(block, &node.validator)
                .is_ok()
        }));
    }
    let outcomes: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    assert_eq!(node.chain.height(), 1);

    // A late candidate for the same height is turned away.
    let stale = external_block(&node.chain);
    let mut stale = stale;
    stale.header.height = 1;
    stale.header.prev_hash = node.chain.by_height(0).unwrap().hash();
    stale.seal_size();
    assert_eq!(
        node.chain.receive_external_block(stale, &node.validator),
        Err(Error::InvalidBlock(BlockRule::HeightGap))
    );
}

#[test]
fn account_serialization_scenario() {
    let mut account = Account::new(Address([0x1d; 32]));
    account.nonce = 9;
    account.status = AccountStatus::Node;
    account.credit(&Coins::from_decimal_str("100.5").unwrap(), Hash::digest(b"a"));
    account.credit(&Coins::whole(7), Hash::digest(b"b"));
    account.credit(&Coins::from_decimal_str("0.000001").unwrap(), Hash::digest(b"c"));
    assert_eq!(account.bloom.len(), 10);

    let bytes = account.encode();
    let decoded = Account::decode(&bytes).unwrap();
    assert_eq!(decoded.encode(), bytes);
    assert_eq!(decoded, account);
    assert_eq!(decoded.inputs_snapshot(), account.inputs_snapshot());
}

#[test]
fn every_appended_block_meets_its_target() {
    let node = fast_node();
    node.validator.faucet(Address([5; 32]), "1").unwrap();
    node.miner.mine_now().unwrap();
    node.miner.mine_now().unwrap();
    for height in 1..=node.chain.height() {
        let block = node.chain.by_height(height).unwrap();
        assert!(pow::block_meets_difficulty(&block).unwrap());
        let parent = node.chain.by_height(height - 1).unwrap();
        assert_eq!(block.header.prev_hash, parent.hash());
        assert_eq!(block.header.height, parent.header.height + 1);
    }
}

#[test]
fn observer_wakes_miner_on_admission() {
    let node = fast_node();
    node.validator.faucet(Address([5; 32]), "1").unwrap();
    node.miner.start().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while node.chain.height() == 0 {
        assert!(Instant::now() < deadline, "admission never woke the miner");
        std::thread::sleep(Duration::from_millis(5));
    }
    node.miner.stop();
    assert!(node.mempool.is_empty());
}
