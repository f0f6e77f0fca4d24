// 8.0 wallet.rs: the signing wallet boundary. the engine never sees a private
// key; it asks the wallet for the active account and chain, and to hop chains.
// a wallet that has never seen a chain gets it registered and is asked again.

use crate::resolver::ChainConfig;
use crate::types::{Address, ChainId};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WalletError {
    /// The wallet has no entry for this chain; register it and try again.
    #[error("wallet does not know chain {0}")]
    UnknownChain(ChainId),

    #[error("request declined by user")]
    Declined,

    #[error("no account connected")]
    NotConnected,

    #[error("wallet transport failure: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Wallet: Send + Sync {
    async fn account(&self) -> Result<Address, WalletError>;

    async fn active_chain(&self) -> Result<ChainId, WalletError>;

    async fn switch_chain(&self, chain: ChainId) -> Result<(), WalletError>;

    /// Add a chain the wallet has never seen.
    async fn register_chain(&self, config: &ChainConfig) -> Result<(), WalletError>;
}

/// Switch the wallet to `config`'s chain, registering it first if the wallet
/// does not know it. A decline at either step aborts.
pub async fn switch_with_register(
    wallet: &dyn Wallet,
    config: &ChainConfig,
) -> Result<(), WalletError> {
    match wallet.switch_chain(config.id).await {
        Ok(()) => Ok(()),
        Err(WalletError::UnknownChain(_)) => {
            tracing::info!(chain = %config.id, name = %config.name, "registering chain with wallet");
            wallet.register_chain(config).await?;
            wallet.switch_chain(config.id).await
        }
        Err(err) => Err(err),
    }
}

#[derive(Debug)]
struct MockWalletState {
    account: Option<Address>,
    active: ChainId,
    known: HashSet<ChainId>,
    decline_switch: bool,
    decline_register: bool,
}

/// In-memory wallet for simulations and tests.
pub struct MockWallet {
    state: Mutex<MockWalletState>,
    pub switch_calls: AtomicU32,
    pub register_calls: AtomicU32,
}

impl MockWallet {
    pub fn connected(account: Address, active: ChainId) -> Self {
        let mut known = HashSet::new();
        known.insert(active);
        Self {
            state: Mutex::new(MockWalletState {
                account: Some(account),
                active,
                known,
                decline_switch: false,
                decline_register: false,
            }),
            switch_calls: AtomicU32::new(0),
            register_calls: AtomicU32::new(0),
        }
    }

    pub fn decline_switches(&self) {
        self.state.lock().unwrap().decline_switch = true;
    }

    pub fn decline_registrations(&self) {
        self.state.lock().unwrap().decline_register = true;
    }
}

#[async_trait]
impl Wallet for MockWallet {
    async fn account(&self) -> Result<Address, WalletError> {
        self.state.lock().unwrap().account.clone().ok_or(WalletError::NotConnected)
    }

    async fn active_chain(&self) -> Result<ChainId, WalletError> {
        Ok(self.state.lock().unwrap().active)
    }

    async fn switch_chain(&self, chain: ChainId) -> Result<(), WalletError> {
        self.switch_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if state.decline_switch {
            return Err(WalletError::Declined);
        }
        if !state.known.contains(&chain) {
            return Err(WalletError::UnknownChain(chain));
        }
        state.active = chain;
        Ok(())
    }

    async fn register_chain(&self, config: &ChainConfig) -> Result<(), WalletError> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if state.decline_register {
            return Err(WalletError::Declined);
        }
        state.known.insert(config.id);
        Ok(())
    }
}
