// 6.0 resolver.rs: static multi-chain deployment registry. chains, market
// deployments and their data sources are compiled in; lookups fail fast on
// anything the build does not know about instead of limping along with a
// half-configured endpoint.

use crate::types::{Address, ChainId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolverError {
    #[error("chain {0} is not supported")]
    UnsupportedChain(ChainId),

    #[error("market '{market}' is not configured on chain {chain}")]
    MarketNotConfigured { chain: ChainId, market: String },

    #[error("market '{market}' on chain {chain} is not enabled")]
    MarketDisabled { chain: ChainId, market: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub id: ChainId,
    pub name: String,
    pub native_currency: NativeCurrency,
    pub rpc_url: String,
    pub explorer_url: Option<String>,
    /// Fallback collateral token for when on-chain resolution is exhausted.
    pub base_token: Address,
}

/// Where a market's display series comes from. Closed set; consumers match
/// exhaustively instead of sniffing config fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataSource {
    /// Bundled fixture series, keyed by data type.
    Fixture { data_type: String },
    /// External price oracle series.
    Oracle { assets: Vec<String>, days: u32, vs_currency: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEntry {
    pub id: String,
    pub address: Address,
    pub name: String,
    pub description: String,
    pub data_source: DataSource,
    pub enabled: bool,
}

impl MarketEntry {
    /// Enabled and actually deployed.
    pub fn is_available(&self) -> bool {
        self.enabled && !self.address.is_zero()
    }
}

/// The compiled-in deployment registry.
pub struct ChainRegistry {
    default_chain: ChainId,
    chains: HashMap<ChainId, ChainConfig>,
    markets: HashMap<ChainId, Vec<MarketEntry>>,
}

pub const COSTON2: ChainId = ChainId(114);
pub const HEDERA_TESTNET: ChainId = ChainId(296);
pub const FLOW_EVM_TESTNET: ChainId = ChainId(545);

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ChainRegistry {
    /// Registry of the current testnet deployments.
    pub fn builtin() -> Self {
        let chains = [
            ChainConfig {
                id: COSTON2,
                name: "Coston2 Testnet".into(),
                native_currency: NativeCurrency {
                    name: "CFLR".into(),
                    symbol: "CFLR".into(),
                    decimals: 18,
                },
                rpc_url: "https://coston2-api.flare.network/ext/C/rpc".into(),
                explorer_url: Some("https://coston2-explorer.flare.network".into()),
                base_token: Address::new("0x61cE7ff8792faA0588AD69e22F9b88AAC6f409F7"),
            },
            ChainConfig {
                id: HEDERA_TESTNET,
                name: "Hedera Testnet".into(),
                native_currency: NativeCurrency {
                    name: "HBAR".into(),
                    symbol: "HBAR".into(),
                    decimals: 18,
                },
                rpc_url: "https://testnet.hashio.io/api".into(),
                explorer_url: Some("https://hashscan.io/testnet".into()),
                base_token: Address::new("0x6c024E280439EEC7f0e816151ef53659F1155af9"),
            },
            ChainConfig {
                id: FLOW_EVM_TESTNET,
                name: "Flow EVM Testnet".into(),
                native_currency: NativeCurrency {
                    name: "FLOW".into(),
                    symbol: "FLOW".into(),
                    decimals: 18,
                },
                rpc_url: "https://testnet.evm.nodes.onflow.org".into(),
                explorer_url: Some("https://evm-testnet.flowscan.io".into()),
                base_token: Address::new("0xAB51568D34c67681156200feF7eA46ca0337b1E4"),
            },
        ];

        let mut markets: HashMap<ChainId, Vec<MarketEntry>> = HashMap::new();
        markets.insert(
            COSTON2,
            vec![
                MarketEntry {
                    id: "drivers".into(),
                    address: Address::new("0x9d127B8a587DD2fF08d24dA031eF1060625ae3f4"),
                    name: "Formula 1 Drivers Market".into(),
                    description: "Prediction market for Formula 1 driver performance".into(),
                    data_source: DataSource::Fixture { data_type: "drivers".into() },
                    enabled: true,
                },
                MarketEntry {
                    id: "crypto".into(),
                    address: Address::new("0x01481e8f8a5480fCD7557102F48FeFdAA44b8279"),
                    name: "Cryptocurrency Market".into(),
                    description: "Prediction market for cryptocurrency price movements".into(),
                    data_source: DataSource::Oracle {
                        assets: vec!["ethereum".into(), "bitcoin".into()],
                        days: 30,
                        vs_currency: "usd".into(),
                    },
                    enabled: true,
                },
            ],
        );
        markets.insert(
            HEDERA_TESTNET,
            vec![MarketEntry {
                id: "crypto".into(),
                address: Address::new("0x8A780f6dCd0e3d99a1F697147Bf0155707028bD8"),
                name: "Ethereum/Bitcoin Market".into(),
                description: "Prediction market for Ethereum/Bitcoin price movements".into(),
                data_source: DataSource::Oracle {
                    assets: vec!["ethereum".into(), "bitcoin".into()],
                    days: 30,
                    vs_currency: "usd".into(),
                },
                enabled: true,
            }],
        );
        markets.insert(
            FLOW_EVM_TESTNET,
            vec![MarketEntry {
                id: "crypto".into(),
                address: Address::zero(),
                name: "Cryptocurrency Market".into(),
                description: "Prediction market for cryptocurrency price movements".into(),
                data_source: DataSource::Oracle {
                    assets: vec!["ethereum".into(), "bitcoin".into()],
                    days: 30,
                    vs_currency: "usd".into(),
                },
                enabled: false,
            }],
        );

        Self {
            default_chain: COSTON2,
            chains: chains.into_iter().map(|c| (c.id, c)).collect(),
            markets,
        }
    }

    pub fn default_chain(&self) -> &ChainConfig {
        // the default chain is always present in the builtin table
        &self.chains[&self.default_chain]
    }

    pub fn chain(&self, id: ChainId) -> Result<&ChainConfig, ResolverError> {
        self.chains.get(&id).ok_or(ResolverError::UnsupportedChain(id))
    }

    pub fn available_chains(&self) -> Vec<&ChainConfig> {
        let mut chains: Vec<_> = self.chains.values().collect();
        chains.sort_by_key(|c| c.id);
        chains
    }

    /// All markets configured for a chain, available or not.
    pub fn markets(&self, chain: ChainId) -> Result<&[MarketEntry], ResolverError> {
        self.chain(chain)?;
        Ok(self.markets.get(&chain).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// A market that is configured, enabled and deployed.
    pub fn market(&self, chain: ChainId, id: &str) -> Result<&MarketEntry, ResolverError> {
        let entry = self
            .markets(chain)?
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| ResolverError::MarketNotConfigured { chain, market: id.to_string() })?;
        if !entry.is_available() {
            return Err(ResolverError::MarketDisabled { chain, market: id.to_string() });
        }
        Ok(entry)
    }

    pub fn market_address(&self, chain: ChainId, id: &str) -> Result<Address, ResolverError> {
        Ok(self.market(chain, id)?.address.clone())
    }

    /// Fallback collateral token address for a chain.
    pub fn base_token(&self, chain: ChainId) -> Result<Address, ResolverError> {
        Ok(self.chain(chain)?.base_token.clone())
    }

    pub fn data_source_for(&self, chain: ChainId, id: &str) -> Result<DataSource, ResolverError> {
        Ok(self.market(chain, id)?.data_source.clone())
    }
}
