// 9.0 lifecycle.rs: the trade state machine. one session per user; each trade
// walks quote -> confirm -> allowance -> submit -> confirm-on-chain -> settle,
// with every transition recorded. a second trade arriving while one is in
// flight is rejected outright, never queued. a wallet decline is an abort, not
// a failure.

use crate::approval::{approve_with_headroom, read_allowance, ApprovalError};
use crate::curve::{outcome_deltas, CurveError};
use crate::executor::{with_retry, RetryPolicy, TokenAddressCache};
use crate::feed::{DataFeed, FeedError, SeriesData};
use crate::ledger::{
    ContractProvider, LedgerError, MarketContract, RevertReason, TokenContract, TxReceipt,
};
use crate::resolver::{ChainRegistry, DataSource, ResolverError};
use crate::types::{
    Address, AssetIndex, ChainId, CostQuote, ScaledAmount, Timestamp, TradeIntent, TradeOp,
};
use crate::wallet::{switch_with_register, Wallet, WalletError};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Quoting,
    AwaitingConfirmation,
    CheckingAllowance,
    Approving,
    Submitting,
    Confirming,
    Settled,
    Failed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Quoting => "quoting",
            LifecycleState::AwaitingConfirmation => "awaiting_confirmation",
            LifecycleState::CheckingAllowance => "checking_allowance",
            LifecycleState::Approving => "approving",
            LifecycleState::Submitting => "submitting",
            LifecycleState::Confirming => "confirming",
            LifecycleState::Settled => "settled",
            LifecycleState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TradeError {
    /// Another trade on this session is still in flight.
    #[error("a trade is already in flight on this session")]
    SessionBusy,

    #[error("no market connected")]
    NotConnected,

    #[error("no quote to confirm")]
    NoActiveQuote,

    #[error("no contract deployed at {0}")]
    NoContract(Address),

    /// Redemption attempted before the market resolved. Recoverable by
    /// waiting; nothing about the position is wrong.
    #[error("market is not resolved yet")]
    MarketNotResolved,

    #[error("submission reverted: {reason}")]
    SubmissionFailed { reason: RevertReason },

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error(transparent)]
    Curve(#[from] CurveError),

    #[error(transparent)]
    Approval(#[from] ApprovalError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// How a confirmed trade ended. A decline is not an error; the session just
/// returns to idle.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeOutcome {
    Settled { receipt: TxReceipt },
    Aborted,
}

/// Balances, holdings and live prices re-read after every settlement.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioSnapshot {
    pub balance: Decimal,
    pub symbol: String,
    pub shares: Vec<Decimal>,
    /// Marginal price per outcome, straight off the curve.
    pub prices: Vec<Decimal>,
    pub taken_at: Timestamp,
}

// 9.1: RAII mutual exclusion. acquire flips the busy flag or bails; drop
// releases it on every exit path, including early returns and panics.
struct SessionGuard {
    flag: Arc<AtomicBool>,
}

impl SessionGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, TradeError> {
        if flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            Ok(Self { flag: flag.clone() })
        } else {
            Err(TradeError::SessionBusy)
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct Binding {
    chain: ChainId,
    market_id: String,
    market_address: Address,
    market: Arc<dyn MarketContract>,
    token: Arc<dyn TokenContract>,
    token_address: Address,
    outcome_count: usize,
    share_decimals: u32,
    token_decimals: u32,
    data_source: DataSource,
}

struct Prepared {
    op: TradeOp,
    deltas: Vec<ScaledAmount>,
    /// Collateral the market must be allowed to pull before submission.
    required: ScaledAmount,
    quote: CostQuote,
}

struct Inner {
    binding: Option<Binding>,
    prepared: Option<Prepared>,
    state: LifecycleState,
    history: Vec<(LifecycleState, Timestamp)>,
    portfolio: Option<PortfolioSnapshot>,
}

/// One user's trading session against one market at a time.
pub struct TradeSession {
    registry: ChainRegistry,
    provider: Arc<dyn ContractProvider>,
    wallet: Arc<dyn Wallet>,
    policy: RetryPolicy,
    token_cache: TokenAddressCache,
    busy: Arc<AtomicBool>,
    inner: Mutex<Inner>,
}

impl TradeSession {
    pub fn new(
        registry: ChainRegistry,
        provider: Arc<dyn ContractProvider>,
        wallet: Arc<dyn Wallet>,
    ) -> Self {
        let policy = RetryPolicy::default();
        Self {
            registry,
            provider,
            wallet,
            token_cache: TokenAddressCache::new(policy.clone()),
            policy,
            busy: Arc::new(AtomicBool::new(false)),
            inner: Mutex::new(Inner {
                binding: None,
                prepared: None,
                state: LifecycleState::Idle,
                history: vec![(LifecycleState::Idle, Timestamp::now())],
                portfolio: None,
            }),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.token_cache = TokenAddressCache::new(policy.clone());
        self.policy = policy;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lock().unwrap().state
    }

    /// Every transition this session has made, in order.
    pub fn history(&self) -> Vec<(LifecycleState, Timestamp)> {
        self.inner.lock().unwrap().history.clone()
    }

    pub fn portfolio(&self) -> Option<PortfolioSnapshot> {
        self.inner.lock().unwrap().portfolio.clone()
    }

    pub fn active_quote(&self) -> Option<CostQuote> {
        self.inner.lock().unwrap().prepared.as_ref().map(|p| p.quote.clone())
    }

    fn transition(&self, state: LifecycleState) {
        let mut inner = self.inner.lock().unwrap();
        tracing::debug!(from = %inner.state, to = %state, "lifecycle transition");
        inner.state = state;
        inner.history.push((state, Timestamp::now()));
    }

    fn binding(&self) -> Result<Binding, TradeError> {
        self.inner.lock().unwrap().binding.clone().ok_or(TradeError::NotConnected)
    }

    // 9.2: connect. resolve the deployment, move the wallet to its chain, bind
    // contracts, and resolve the collateral token through the per-chain cache.
    pub async fn connect(&self, chain: ChainId, market_id: &str) -> Result<(), TradeError> {
        let chain_cfg = self.registry.chain(chain)?.clone();
        let entry = self.registry.market(chain, market_id)?.clone();

        switch_with_register(self.wallet.as_ref(), &chain_cfg).await?;

        let market = self
            .provider
            .market(&entry.address)
            .ok_or_else(|| TradeError::NoContract(entry.address.clone()))?;

        let fetch_market = market.clone();
        let token_address = self
            .token_cache
            .resolve(chain, &chain_cfg.base_token, || {
                let market = fetch_market.clone();
                async move { market.collateral_token().await }
            })
            .await;
        let token = self
            .provider
            .token(&token_address)
            .ok_or_else(|| TradeError::NoContract(token_address.clone()))?;

        let outcome_count = {
            let market = market.clone();
            with_retry(&self.policy, "outcome_slot_count", move || {
                let market = market.clone();
                async move { market.outcome_slot_count().await }
            })
            .await?
        };
        let share_decimals = market.decimals().await?;
        let token_decimals = token.decimals().await?;
        let unit_scale = market.unit_scale().await?;
        if unit_scale != ScaledAmount::wad() {
            tracing::warn!(%unit_scale, "market reports a non-WAD unit scale");
        }

        tracing::info!(
            %chain,
            market = %entry.id,
            address = %entry.address,
            token = %token_address,
            outcome_count,
            "connected to market"
        );

        let mut inner = self.inner.lock().unwrap();
        inner.binding = Some(Binding {
            chain,
            market_id: entry.id.clone(),
            market_address: entry.address.clone(),
            market,
            token,
            token_address,
            outcome_count,
            share_decimals,
            token_decimals,
            data_source: entry.data_source.clone(),
        });
        inner.prepared = None;
        inner.portfolio = None;
        Ok(())
    }

    // 9.3: quote. price the intent against the live curve; the result is held
    // until it is confirmed, cancelled, or replaced. pricing failures return
    // the session to idle.
    pub async fn quote(&self, intent: &TradeIntent) -> Result<CostQuote, TradeError> {
        let binding = self.binding()?;

        // invalid intents (non-positive amount, unknown asset) are rejected
        // here, before the machine ever leaves idle
        let shares = ScaledAmount::from_decimal(intent.amount, binding.share_decimals);
        let deltas = outcome_deltas(binding.outcome_count, intent.asset_index, &shares, intent.op)?;

        self.transition(LifecycleState::Quoting);
        match self.quote_inner(&binding, intent, deltas).await {
            Ok(quote) => {
                self.transition(LifecycleState::AwaitingConfirmation);
                Ok(quote)
            }
            Err(err) => {
                self.transition(LifecycleState::Idle);
                Err(err)
            }
        }
    }

    async fn quote_inner(
        &self,
        binding: &Binding,
        intent: &TradeIntent,
        deltas: Vec<ScaledAmount>,
    ) -> Result<CostQuote, TradeError> {
        let cost = {
            let market = binding.market.clone();
            let deltas = deltas.clone();
            with_retry(&self.policy, "calc_net_cost", move || {
                let market = market.clone();
                let deltas = deltas.clone();
                async move { market.calc_net_cost(&deltas).await }
            })
            .await?
        };

        let quote = CostQuote {
            asset_index: intent.asset_index,
            amount: intent.amount,
            cost: cost.abs().to_decimal(binding.token_decimals).round_dp(2),
            token_decimals: binding.token_decimals,
        };
        // the market pulls collateral for buys and moves shares for sells;
        // both need the allowance in place before submission
        let required = cost.abs();

        tracing::info!(
            op = %intent.op,
            asset = %intent.asset_index,
            amount = %intent.amount,
            cost = %quote.cost,
            price_per_share = %quote.price_per_share(),
            "quote computed"
        );

        let mut inner = self.inner.lock().unwrap();
        inner.prepared = Some(Prepared { op: intent.op, deltas, required, quote: quote.clone() });
        Ok(quote)
    }

    /// Drop the held quote and go back to idle.
    pub fn cancel_quote(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.prepared.take().is_some() {
            tracing::debug!("quote cancelled");
            inner.state = LifecycleState::Idle;
            inner.history.push((LifecycleState::Idle, Timestamp::now()));
        }
    }

    // 9.4: confirm. consumes the held quote; the curve moves with every trade,
    // so a quote is never reused even when the run aborts. exactly one
    // submission reaches the ledger per run.
    pub async fn confirm(&self) -> Result<TradeOutcome, TradeError> {
        let _guard = SessionGuard::acquire(&self.busy)?;
        let binding = self.binding()?;
        let prepared = self
            .inner
            .lock()
            .unwrap()
            .prepared
            .take()
            .ok_or(TradeError::NoActiveQuote)?;

        let owner = self.wallet.account().await?;

        self.transition(LifecycleState::CheckingAllowance);
        let snapshot = match read_allowance(
            binding.token.as_ref(),
            &owner,
            &binding.market_address,
            &self.policy,
        )
        .await
        {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.transition(LifecycleState::Failed);
                return Err(err.into());
            }
        };

        if !snapshot.covers(&prepared.required) {
            self.transition(LifecycleState::Approving);
            match approve_with_headroom(
                binding.token.as_ref(),
                &binding.market_address,
                &prepared.required,
                snapshot.token_decimals,
            )
            .await
            {
                Ok(_) => {}
                Err(ApprovalError::Declined) => {
                    tracing::info!("approval declined, aborting trade");
                    self.transition(LifecycleState::Idle);
                    return Ok(TradeOutcome::Aborted);
                }
                Err(err) => {
                    self.transition(LifecycleState::Failed);
                    return Err(err.into());
                }
            }
        }

        self.transition(LifecycleState::Submitting);
        let pending = match binding.market.make_prediction(&prepared.deltas).await {
            Ok(pending) => pending,
            Err(LedgerError::Declined) => {
                tracing::info!("trade signature declined, aborting");
                self.transition(LifecycleState::Idle);
                return Ok(TradeOutcome::Aborted);
            }
            Err(LedgerError::Reverted { reason }) => {
                self.transition(LifecycleState::Failed);
                return Err(TradeError::SubmissionFailed { reason });
            }
            Err(err) => {
                self.transition(LifecycleState::Failed);
                return Err(err.into());
            }
        };

        self.transition(LifecycleState::Confirming);
        let receipt = match binding.market.confirm(&pending).await {
            Ok(receipt) => receipt,
            Err(err) => {
                self.transition(LifecycleState::Failed);
                return Err(err.into());
            }
        };

        self.transition(LifecycleState::Settled);
        tracing::info!(op = %prepared.op, tx = %receipt.hash, block = receipt.block, "trade settled");
        self.refresh_after_settle(&binding, &owner).await;
        self.transition(LifecycleState::Idle);
        Ok(TradeOutcome::Settled { receipt })
    }

    // 9.5: redeem. no quote, no allowance; straight to submission. an
    // unresolved market is its own error so callers can tell "wait" from
    // "something broke".
    pub async fn redeem(&self) -> Result<TradeOutcome, TradeError> {
        let _guard = SessionGuard::acquire(&self.busy)?;
        let binding = self.binding()?;
        let owner = self.wallet.account().await?;

        self.transition(LifecycleState::Submitting);
        let pending = match binding.market.redeem_payout().await {
            Ok(pending) => pending,
            Err(LedgerError::Declined) => {
                tracing::info!("redeem signature declined, aborting");
                self.transition(LifecycleState::Idle);
                return Ok(TradeOutcome::Aborted);
            }
            Err(LedgerError::Reverted { reason: RevertReason::MarketNotResolved }) => {
                self.transition(LifecycleState::Failed);
                return Err(TradeError::MarketNotResolved);
            }
            Err(LedgerError::Reverted { reason }) => {
                self.transition(LifecycleState::Failed);
                return Err(TradeError::SubmissionFailed { reason });
            }
            Err(err) => {
                self.transition(LifecycleState::Failed);
                return Err(err.into());
            }
        };

        self.transition(LifecycleState::Confirming);
        let receipt = match binding.market.confirm(&pending).await {
            Ok(receipt) => receipt,
            Err(err) => {
                self.transition(LifecycleState::Failed);
                return Err(err.into());
            }
        };

        self.transition(LifecycleState::Settled);
        tracing::info!(tx = %receipt.hash, block = receipt.block, "payout redeemed");
        self.refresh_after_settle(&binding, &owner).await;
        self.transition(LifecycleState::Idle);
        Ok(TradeOutcome::Settled { receipt })
    }

    /// Re-read balance, symbol and holdings. Balance and symbol go out in
    /// parallel; all reads are retried.
    pub async fn refresh(&self) -> Result<PortfolioSnapshot, TradeError> {
        let binding = self.binding()?;
        let owner = self.wallet.account().await?;
        self.refresh_inner(&binding, &owner).await
    }

    /// A settled trade stays settled even when the follow-up reads fail.
    async fn refresh_after_settle(&self, binding: &Binding, owner: &Address) {
        if let Err(err) = self.refresh_inner(binding, owner).await {
            tracing::warn!(error = %err, "post-settlement refresh failed");
        }
    }

    async fn refresh_inner(
        &self,
        binding: &Binding,
        owner: &Address,
    ) -> Result<PortfolioSnapshot, TradeError> {
        let balance_fut = {
            let token = binding.token.clone();
            let owner = owner.clone();
            with_retry(&self.policy, "balance_of", move || {
                let token = token.clone();
                let owner = owner.clone();
                async move { token.balance_of(&owner).await }
            })
        };
        let symbol_fut = {
            let token = binding.token.clone();
            with_retry(&self.policy, "symbol", move || {
                let token = token.clone();
                async move { token.symbol().await }
            })
        };
        let (balance, symbol) = futures::join!(balance_fut, symbol_fut);
        let balance = balance?;
        let symbol = symbol?;

        let mut shares = Vec::with_capacity(binding.outcome_count);
        let mut prices = Vec::with_capacity(binding.outcome_count);
        for index in 0..binding.outcome_count {
            let (held, price) = futures::join!(
                binding.market.user_shares(owner, AssetIndex(index)),
                binding.market.calc_marginal_price(AssetIndex(index)),
            );
            shares.push(held?.to_decimal(binding.share_decimals));
            prices.push(price?.to_decimal(crate::types::WAD_DECIMALS));
        }

        let snapshot = PortfolioSnapshot {
            balance: balance.to_decimal(binding.token_decimals),
            symbol,
            shares,
            prices,
            taken_at: Timestamp::now(),
        };
        self.inner.lock().unwrap().portfolio = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Display series for the connected market.
    pub async fn load_series(&self, feed: &dyn DataFeed) -> Result<SeriesData, TradeError> {
        let binding = self.binding()?;
        let series = feed.fetch(&binding.data_source).await?;
        if series.series_count() != binding.outcome_count {
            tracing::warn!(
                market = %binding.market_id,
                series = series.series_count(),
                outcomes = binding.outcome_count,
                "series count does not match outcome count"
            );
        }
        Ok(series)
    }

    /// Mint demo collateral to the connected account. Testnet convenience.
    pub async fn mint_collateral(&self, amount: Decimal) -> Result<TxReceipt, TradeError> {
        let binding = self.binding()?;
        let owner = self.wallet.account().await?;
        let scaled = ScaledAmount::from_decimal(amount, binding.token_decimals);
        let pending = binding.token.mint(&owner, &scaled).await?;
        let receipt = binding.token.confirm(&pending).await?;
        tracing::info!(tx = %receipt.hash, %amount, "demo collateral minted");
        Ok(receipt)
    }
}
