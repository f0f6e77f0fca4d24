// 2.0 ledger.rs: the contract-call boundary. everything the engine knows about
// the remote ledger goes through these traits; the cost function, log primitive
// and settlement logic live on-chain and are invoked, never reimplemented.
//
// 2.1 error taxonomy: Transport/Timeout are transient and retryable by policy.
// Reverted carries a tagged reason so callers can tell "not yet resolved" from
// "out of funds". Declined is the wallet saying no; it is an abort, not a fault.

use crate::types::{Address, AssetIndex, ScaledAmount};
use async_trait::async_trait;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Why a contract call reverted. Closed set so every consumer matches
/// exhaustively; adding a reason is a compile-time exercise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevertReason {
    MarketNotResolved,
    InsufficientBalance,
    ZeroLiquidity,
    Other(String),
}

impl fmt::Display for RevertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevertReason::MarketNotResolved => write!(f, "market not resolved"),
            RevertReason::InsufficientBalance => write!(f, "insufficient balance"),
            RevertReason::ZeroLiquidity => write!(f, "zero liquidity"),
            RevertReason::Other(msg) => write!(f, "{}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("transport failure: {message}")]
    Transport { message: String },

    #[error("call timed out: {message}")]
    Timeout { message: String },

    #[error("reverted: {reason}")]
    Reverted { reason: RevertReason },

    #[error("signature request declined by wallet")]
    Declined,
}

impl LedgerError {
    /// Transient failures may be retried by policy; everything else is terminal
    /// for the call that produced it.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transport { .. } | LedgerError::Timeout { .. })
    }
}

/// A submitted but unconfirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTx {
    pub hash: String,
}

/// A confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub hash: String,
    pub block: u64,
}

// 2.2: the market contract surface. reads are idempotent; make_prediction and
// redeem_payout move funds and must be issued exactly once per lifecycle run.
#[async_trait]
pub trait MarketContract: Send + Sync {
    async fn outcome_slot_count(&self) -> Result<usize, LedgerError>;

    /// Share decimals for parsing human amounts into outcome deltas.
    async fn decimals(&self) -> Result<u32, LedgerError>;

    /// The contract's fixed unit scale (UNIT_DEC), normally 10^18.
    async fn unit_scale(&self) -> Result<ScaledAmount, LedgerError>;

    /// Net cost of applying a signed per-outcome delta vector.
    async fn calc_net_cost(&self, deltas: &[ScaledAmount]) -> Result<ScaledAmount, LedgerError>;

    async fn calc_marginal_price(&self, index: AssetIndex) -> Result<ScaledAmount, LedgerError>;

    async fn user_shares(&self, user: &Address, index: AssetIndex) -> Result<ScaledAmount, LedgerError>;

    /// Curve liquidity parameter b for the given scaled outcome quantities.
    async fn get_b(&self, quantities: &[ScaledAmount]) -> Result<ScaledAmount, LedgerError>;

    /// The ledger's own logarithm primitive, WAD in, WAD out. Treated as an
    /// oracle so quotes stay consistent with the on-chain cost function.
    async fn ln(&self, value: &ScaledAmount) -> Result<ScaledAmount, LedgerError>;

    async fn collateral_token(&self) -> Result<Address, LedgerError>;

    /// Submit a trade. Funds-moving; never routed through the retry executor.
    async fn make_prediction(&self, deltas: &[ScaledAmount]) -> Result<PendingTx, LedgerError>;

    /// Redeem payout after resolution. Funds-moving.
    async fn redeem_payout(&self) -> Result<PendingTx, LedgerError>;

    /// Await finality for a submitted transaction. Blocks the lifecycle run
    /// for as long as the ledger takes; there is no local timeout here.
    async fn confirm(&self, tx: &PendingTx) -> Result<TxReceipt, LedgerError>;
}

// 2.3: the collateral token surface (ERC20-shaped).
#[async_trait]
pub trait TokenContract: Send + Sync {
    async fn balance_of(&self, owner: &Address) -> Result<ScaledAmount, LedgerError>;

    async fn decimals(&self) -> Result<u32, LedgerError>;

    async fn symbol(&self) -> Result<String, LedgerError>;

    async fn allowance(&self, owner: &Address, spender: &Address) -> Result<ScaledAmount, LedgerError>;

    /// Submit an approval. Funds-authorizing; never retried.
    async fn approve(&self, spender: &Address, amount: &ScaledAmount) -> Result<PendingTx, LedgerError>;

    async fn confirm(&self, tx: &PendingTx) -> Result<TxReceipt, LedgerError>;

    /// Demo/test utility on the mock token deployments.
    async fn mint(&self, to: &Address, amount: &ScaledAmount) -> Result<PendingTx, LedgerError>;
}

// 2.4: binds addresses to contract instances for one chain's endpoint.
pub trait ContractProvider: Send + Sync {
    fn market(&self, address: &Address) -> Option<Arc<dyn MarketContract>>;
    fn token(&self, address: &Address) -> Option<Arc<dyn TokenContract>>;
}

// ---------------------------------------------------------------------------
// mocks. used by the sim binary and the test suites; they track call counts so
// tests can assert idempotency (exactly one submission, zero re-reads, etc).
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct MockMarketState {
    outcome_count: usize,
    decimals: u32,
    unit_scale: ScaledAmount,
    b: ScaledAmount,
    net_cost: ScaledAmount,
    marginal_prices: Vec<ScaledAmount>,
    shares: HashMap<(Address, usize), ScaledAmount>,
    collateral: Address,
    resolved: bool,
    /// Fail the next N reads with a transport error, then succeed.
    flaky_reads: u32,
    /// Force every submission to revert with this reason.
    submission_revert: Option<RevertReason>,
    decline_submissions: bool,
    /// Yield this many times inside confirm, so tests can overlap sessions.
    confirm_yields: u32,
    next_block: u64,
}

/// In-memory market contract with configurable behavior.
pub struct MockMarket {
    state: Mutex<MockMarketState>,
    pub net_cost_calls: AtomicU32,
    pub prediction_calls: AtomicU32,
    pub redeem_calls: AtomicU32,
    pub collateral_calls: AtomicU32,
}

impl MockMarket {
    pub fn new(outcome_count: usize, collateral: Address) -> Self {
        Self {
            state: Mutex::new(MockMarketState {
                outcome_count,
                decimals: 18,
                unit_scale: ScaledAmount::wad(),
                b: ScaledAmount::from_units(100),
                net_cost: ScaledAmount::from_units(10),
                marginal_prices: vec![ScaledAmount::zero(); outcome_count],
                shares: HashMap::new(),
                collateral,
                resolved: false,
                flaky_reads: 0,
                submission_revert: None,
                decline_submissions: false,
                confirm_yields: 0,
                next_block: 1,
            }),
            net_cost_calls: AtomicU32::new(0),
            prediction_calls: AtomicU32::new(0),
            redeem_calls: AtomicU32::new(0),
            collateral_calls: AtomicU32::new(0),
        }
    }

    pub fn set_b(&self, b: ScaledAmount) {
        self.state.lock().unwrap().b = b;
    }

    pub fn set_net_cost(&self, cost: ScaledAmount) {
        self.state.lock().unwrap().net_cost = cost;
    }

    pub fn set_marginal_prices(&self, prices: Vec<ScaledAmount>) {
        self.state.lock().unwrap().marginal_prices = prices;
    }

    pub fn set_user_shares(&self, user: Address, index: usize, shares: ScaledAmount) {
        self.state.lock().unwrap().shares.insert((user, index), shares);
    }

    pub fn set_resolved(&self, resolved: bool) {
        self.state.lock().unwrap().resolved = resolved;
    }

    pub fn fail_next_reads(&self, count: u32) {
        self.state.lock().unwrap().flaky_reads = count;
    }

    pub fn revert_submissions(&self, reason: RevertReason) {
        self.state.lock().unwrap().submission_revert = Some(reason);
    }

    pub fn decline_submissions(&self) {
        self.state.lock().unwrap().decline_submissions = true;
    }

    pub fn stall_confirmations(&self, yields: u32) {
        self.state.lock().unwrap().confirm_yields = yields;
    }

    fn check_flaky(state: &mut MockMarketState) -> Result<(), LedgerError> {
        if state.flaky_reads > 0 {
            state.flaky_reads -= 1;
            return Err(LedgerError::Transport { message: "connection reset".into() });
        }
        Ok(())
    }

    fn next_tx(state: &mut MockMarketState, kind: &str) -> PendingTx {
        let block = state.next_block;
        state.next_block += 1;
        PendingTx { hash: format!("0x{}{:08x}", kind, block) }
    }
}

#[async_trait]
impl MarketContract for MockMarket {
    async fn outcome_slot_count(&self) -> Result<usize, LedgerError> {
        let mut state = self.state.lock().unwrap();
        Self::check_flaky(&mut state)?;
        Ok(state.outcome_count)
    }

    async fn decimals(&self) -> Result<u32, LedgerError> {
        Ok(self.state.lock().unwrap().decimals)
    }

    async fn unit_scale(&self) -> Result<ScaledAmount, LedgerError> {
        Ok(self.state.lock().unwrap().unit_scale.clone())
    }

    async fn calc_net_cost(&self, deltas: &[ScaledAmount]) -> Result<ScaledAmount, LedgerError> {
        self.net_cost_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        Self::check_flaky(&mut state)?;
        if deltas.len() != state.outcome_count {
            return Err(LedgerError::Reverted {
                reason: RevertReason::Other(format!(
                    "delta vector length {} != outcome count {}",
                    deltas.len(),
                    state.outcome_count
                )),
            });
        }
        // sells pay out: mirror the configured cost's sign onto the delta's
        let selling = deltas.iter().any(|d| d.is_negative());
        let cost = state.net_cost.clone();
        Ok(if selling { -cost.abs() } else { cost })
    }

    async fn calc_marginal_price(&self, index: AssetIndex) -> Result<ScaledAmount, LedgerError> {
        let mut state = self.state.lock().unwrap();
        Self::check_flaky(&mut state)?;
        state
            .marginal_prices
            .get(index.0)
            .cloned()
            .ok_or(LedgerError::Reverted { reason: RevertReason::Other("index out of range".into()) })
    }

    async fn user_shares(&self, user: &Address, index: AssetIndex) -> Result<ScaledAmount, LedgerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .shares
            .get(&(user.clone(), index.0))
            .cloned()
            .unwrap_or_else(ScaledAmount::zero))
    }

    async fn get_b(&self, _quantities: &[ScaledAmount]) -> Result<ScaledAmount, LedgerError> {
        let mut state = self.state.lock().unwrap();
        Self::check_flaky(&mut state)?;
        Ok(state.b.clone())
    }

    async fn ln(&self, value: &ScaledAmount) -> Result<ScaledAmount, LedgerError> {
        if value.signum() <= 0 {
            return Err(LedgerError::Reverted {
                reason: RevertReason::Other("ln of non-positive value".into()),
            });
        }
        Ok(ln_wad(value))
    }

    async fn collateral_token(&self) -> Result<Address, LedgerError> {
        self.collateral_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        Self::check_flaky(&mut state)?;
        Ok(state.collateral.clone())
    }

    async fn make_prediction(&self, deltas: &[ScaledAmount]) -> Result<PendingTx, LedgerError> {
        self.prediction_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if state.decline_submissions {
            return Err(LedgerError::Declined);
        }
        if let Some(reason) = state.submission_revert.clone() {
            return Err(LedgerError::Reverted { reason });
        }
        if deltas.len() != state.outcome_count {
            return Err(LedgerError::Reverted {
                reason: RevertReason::Other("delta vector length mismatch".into()),
            });
        }
        Ok(Self::next_tx(&mut state, "trade"))
    }

    async fn redeem_payout(&self) -> Result<PendingTx, LedgerError> {
        self.redeem_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if state.decline_submissions {
            return Err(LedgerError::Declined);
        }
        if !state.resolved {
            return Err(LedgerError::Reverted { reason: RevertReason::MarketNotResolved });
        }
        if let Some(reason) = state.submission_revert.clone() {
            return Err(LedgerError::Reverted { reason });
        }
        Ok(Self::next_tx(&mut state, "redeem"))
    }

    async fn confirm(&self, tx: &PendingTx) -> Result<TxReceipt, LedgerError> {
        let yields = self.state.lock().unwrap().confirm_yields;
        for _ in 0..yields {
            tokio::task::yield_now().await;
        }
        let mut state = self.state.lock().unwrap();
        let block = state.next_block;
        state.next_block += 1;
        Ok(TxReceipt { hash: tx.hash.clone(), block })
    }
}

/// WAD-scaled natural log used by the mock ledger. The real primitive lives
/// on-chain; this f64 approximation exists only so simulations have numbers.
fn ln_wad(value: &ScaledAmount) -> ScaledAmount {
    let as_f64 = value
        .to_decimal(crate::types::WAD_DECIMALS)
        .to_f64()
        .unwrap_or(f64::MIN_POSITIVE);
    let scaled = (as_f64.max(f64::MIN_POSITIVE).ln() * 1e18).round();
    ScaledAmount::from_raw(num_bigint::BigInt::from(scaled as i128))
}

#[derive(Debug)]
struct MockTokenState {
    decimals: u32,
    symbol: String,
    balances: HashMap<Address, ScaledAmount>,
    allowances: HashMap<(Address, Address), ScaledAmount>,
    decline_approvals: bool,
    revert_approvals: bool,
    next_block: u64,
}

/// In-memory ERC20-style token.
pub struct MockToken {
    state: Mutex<MockTokenState>,
    pub allowance_calls: AtomicU32,
    pub approve_calls: AtomicU32,
    approvals: Mutex<Vec<(Address, ScaledAmount)>>,
}

impl MockToken {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockTokenState {
                decimals: 18,
                symbol: "MOCK".to_string(),
                balances: HashMap::new(),
                allowances: HashMap::new(),
                decline_approvals: false,
                revert_approvals: false,
                next_block: 1,
            }),
            allowance_calls: AtomicU32::new(0),
            approve_calls: AtomicU32::new(0),
            approvals: Mutex::new(Vec::new()),
        }
    }

    pub fn set_allowance(&self, owner: Address, spender: Address, amount: ScaledAmount) {
        self.state.lock().unwrap().allowances.insert((owner, spender), amount);
    }

    pub fn set_balance(&self, owner: Address, amount: ScaledAmount) {
        self.state.lock().unwrap().balances.insert(owner, amount);
    }

    pub fn decline_approvals(&self) {
        self.state.lock().unwrap().decline_approvals = true;
    }

    pub fn revert_approvals(&self) {
        self.state.lock().unwrap().revert_approvals = true;
    }

    /// Approvals recorded so far, in submission order.
    pub fn recorded_approvals(&self) -> Vec<(Address, ScaledAmount)> {
        self.approvals.lock().unwrap().clone()
    }
}

impl Default for MockToken {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenContract for MockToken {
    async fn balance_of(&self, owner: &Address) -> Result<ScaledAmount, LedgerError> {
        let state = self.state.lock().unwrap();
        Ok(state.balances.get(owner).cloned().unwrap_or_else(ScaledAmount::zero))
    }

    async fn decimals(&self) -> Result<u32, LedgerError> {
        Ok(self.state.lock().unwrap().decimals)
    }

    async fn symbol(&self) -> Result<String, LedgerError> {
        Ok(self.state.lock().unwrap().symbol.clone())
    }

    async fn allowance(&self, owner: &Address, spender: &Address) -> Result<ScaledAmount, LedgerError> {
        self.allowance_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        Ok(state
            .allowances
            .get(&(owner.clone(), spender.clone()))
            .cloned()
            .unwrap_or_else(ScaledAmount::zero))
    }

    async fn approve(&self, spender: &Address, amount: &ScaledAmount) -> Result<PendingTx, LedgerError> {
        self.approve_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if state.decline_approvals {
            return Err(LedgerError::Declined);
        }
        if state.revert_approvals {
            return Err(LedgerError::Reverted {
                reason: RevertReason::Other("approve reverted".into()),
            });
        }
        self.approvals.lock().unwrap().push((spender.clone(), amount.clone()));
        let block = state.next_block;
        state.next_block += 1;
        Ok(PendingTx { hash: format!("0xapprove{:08x}", block) })
    }

    async fn confirm(&self, tx: &PendingTx) -> Result<TxReceipt, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let block = state.next_block;
        state.next_block += 1;
        Ok(TxReceipt { hash: tx.hash.clone(), block })
    }

    async fn mint(&self, to: &Address, amount: &ScaledAmount) -> Result<PendingTx, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let balance = state.balances.entry(to.clone()).or_insert_with(ScaledAmount::zero);
        *balance = balance.clone() + amount.clone();
        let block = state.next_block;
        state.next_block += 1;
        Ok(PendingTx { hash: format!("0xmint{:08x}", block) })
    }
}

/// Provider over in-memory contracts, keyed by address.
#[derive(Default)]
pub struct MockProvider {
    markets: Mutex<HashMap<Address, Arc<MockMarket>>>,
    tokens: Mutex<HashMap<Address, Arc<MockToken>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_market(&self, address: Address, market: Arc<MockMarket>) {
        self.markets.lock().unwrap().insert(address, market);
    }

    pub fn register_token(&self, address: Address, token: Arc<MockToken>) {
        self.tokens.lock().unwrap().insert(address, token);
    }
}

impl ContractProvider for MockProvider {
    fn market(&self, address: &Address) -> Option<Arc<dyn MarketContract>> {
        self.markets
            .lock()
            .unwrap()
            .get(address)
            .map(|m| m.clone() as Arc<dyn MarketContract>)
    }

    fn token(&self, address: &Address) -> Option<Arc<dyn TokenContract>> {
        self.tokens
            .lock()
            .unwrap()
            .get(address)
            .map(|t| t.clone() as Arc<dyn TokenContract>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(LedgerError::Transport { message: "reset".into() }.is_transient());
        assert!(LedgerError::Timeout { message: "30s".into() }.is_transient());
        assert!(!LedgerError::Reverted { reason: RevertReason::ZeroLiquidity }.is_transient());
        assert!(!LedgerError::Declined.is_transient());
    }

    #[test]
    fn revert_reason_display() {
        assert_eq!(RevertReason::MarketNotResolved.to_string(), "market not resolved");
        assert_eq!(RevertReason::Other("boom".into()).to_string(), "boom");
    }

    #[tokio::test]
    async fn mock_market_counts_submissions() {
        let market = MockMarket::new(2, Address::zero());
        let deltas = vec![ScaledAmount::from_units(1), ScaledAmount::zero()];
        let tx = market.make_prediction(&deltas).await.unwrap();
        market.confirm(&tx).await.unwrap();
        assert_eq!(market.prediction_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mock_market_redeem_requires_resolution() {
        let market = MockMarket::new(2, Address::zero());
        let err = market.redeem_payout().await.unwrap_err();
        assert_eq!(err, LedgerError::Reverted { reason: RevertReason::MarketNotResolved });

        market.set_resolved(true);
        assert!(market.redeem_payout().await.is_ok());
    }

    #[tokio::test]
    async fn mock_market_sell_cost_is_negative() {
        let market = MockMarket::new(2, Address::zero());
        let deltas = vec![-ScaledAmount::from_units(1), ScaledAmount::zero()];
        let cost = market.calc_net_cost(&deltas).await.unwrap();
        assert!(cost.is_negative());
    }

    #[tokio::test]
    async fn mock_token_records_approvals() {
        let token = MockToken::new();
        let spender = Address::new("0xmarket");
        token.approve(&spender, &ScaledAmount::from_units(10)).await.unwrap();
        let recorded = token.recorded_approvals();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, spender);
        assert_eq!(recorded[0].1, ScaledAmount::from_units(10));
    }

    #[tokio::test]
    async fn flaky_reads_recover() {
        let market = MockMarket::new(2, Address::zero());
        market.fail_next_reads(1);
        assert!(market.outcome_slot_count().await.is_err());
        assert_eq!(market.outcome_slot_count().await.unwrap(), 2);
    }

    #[test]
    fn ln_wad_of_one_is_zero() {
        assert_eq!(ln_wad(&ScaledAmount::wad()), ScaledAmount::zero());
    }
}
