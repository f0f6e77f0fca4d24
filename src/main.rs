//! Prediction Market Client Engine Simulation.
//!
//! Walks the full trading lifecycle against in-memory contracts: quoting,
//! approval management, settlement, redemption, chain hopping, and recovery
//! from a flaky endpoint.

use dynamica_core::*;
use rust_decimal_macros::dec;
use std::sync::Arc;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::WARN).init();

    println!("Prediction Market Client Engine Simulation");
    println!("Bonding-Curve Pricing, Idempotent Trade Lifecycle\n");

    scenario_1_buy_with_approval().await;
    scenario_2_buy_reusing_headroom().await;
    scenario_3_sell_position().await;
    scenario_4_declined_trade().await;
    scenario_5_redemption().await;
    scenario_6_flaky_endpoint().await;
    scenario_7_target_probability().await;
    scenario_8_chain_hop().await;

    println!("\nAll simulations completed successfully.");
}

struct Sim {
    session: TradeSession,
    market: Arc<MockMarket>,
    token: Arc<MockToken>,
    owner: Address,
}

fn sim() -> Sim {
    let registry = ChainRegistry::builtin();
    let market_address = registry
        .market_address(COSTON2, "drivers")
        .unwrap_or_else(|_| Address::zero());
    let token_address = registry.base_token(COSTON2).unwrap_or_else(|_| Address::zero());

    let market = Arc::new(MockMarket::new(2, token_address.clone()));
    let token = Arc::new(MockToken::new());
    let owner = Address::new("0x00a3bf4f2bafc2cd8e0ba57d5a95753391a28fc7");
    token.set_balance(owner.clone(), ScaledAmount::from_units(1000));

    let provider = MockProvider::new();
    provider.register_market(market_address, market.clone());
    provider.register_token(token_address, token.clone());

    let wallet = Arc::new(MockWallet::connected(owner.clone(), COSTON2));
    let session = TradeSession::new(ChainRegistry::builtin(), Arc::new(provider), wallet);
    Sim { session, market, token, owner }
}

fn buy(amount: rust_decimal::Decimal) -> TradeIntent {
    TradeIntent::new(
        TradeOp::Buy,
        AssetIndex(0),
        amount,
        Address::new("0x9d127B8a587DD2fF08d24dA031eF1060625ae3f4"),
        COSTON2,
    )
}

/// First buy on a fresh account: allowance is empty, so an approval with 2x
/// headroom is submitted before the trade.
async fn scenario_1_buy_with_approval() {
    println!("Scenario 1: Buy With Fresh Approval\n");

    let s = sim();
    s.session.connect(COSTON2, "drivers").await.unwrap();
    s.market.set_net_cost(ScaledAmount::from_units(10));

    let quote = s.session.quote(&buy(dec!(5))).await.unwrap();
    println!("  Quoted 5 shares of outcome 0 for {} ({} per share)", quote.cost, quote.price_per_share());

    let outcome = s.session.confirm().await.unwrap();
    if let TradeOutcome::Settled { receipt } = outcome {
        println!("  Settled in tx {} at block {}", receipt.hash, receipt.block);
    }
    for (spender, amount) in s.token.recorded_approvals() {
        println!("  Approved {} to {} (2x the trade cost)", amount.format_units(18), spender);
    }
    println!();
}

/// A second buy within the approved headroom skips the approval entirely.
async fn scenario_2_buy_reusing_headroom() {
    println!("Scenario 2: Headroom Skips Re-Approval\n");

    let s = sim();
    s.session.connect(COSTON2, "drivers").await.unwrap();
    s.market.set_net_cost(ScaledAmount::from_units(10));

    s.session.quote(&buy(dec!(5))).await.unwrap();
    s.session.confirm().await.unwrap();

    // the mock token does not draw the allowance down; set what a real ledger
    // would have left after the first buy
    let market_address = Address::new("0x9d127B8a587DD2fF08d24dA031eF1060625ae3f4");
    s.token.set_allowance(s.owner.clone(), market_address, ScaledAmount::from_units(10));

    s.session.quote(&buy(dec!(5))).await.unwrap();
    s.session.confirm().await.unwrap();

    let approvals = s.token.recorded_approvals().len();
    println!("  Two settled buys, {} approval submitted\n", approvals);
}

/// Selling pays out collateral; the market still needs an allowance to move
/// the position, sized off the absolute proceeds.
async fn scenario_3_sell_position() {
    println!("Scenario 3: Sell Position\n");

    let s = sim();
    s.session.connect(COSTON2, "drivers").await.unwrap();
    s.market.set_net_cost(ScaledAmount::from_units(6));
    s.market.set_user_shares(s.owner.clone(), 0, ScaledAmount::from_units(5));

    let intent = TradeIntent::new(TradeOp::Sell, AssetIndex(0), dec!(3), buy(dec!(3)).market, COSTON2);
    let quote = s.session.quote(&intent).await.unwrap();
    println!("  Quoted sale of 3 shares, proceeds {}", quote.cost);

    s.session.confirm().await.unwrap();
    for (_, amount) in s.token.recorded_approvals() {
        println!("  Approved {} before moving the position", amount.format_units(18));
    }
    println!("  Sold and settled\n");
}

/// The user declines the signature request; the trade aborts back to idle.
async fn scenario_4_declined_trade() {
    println!("Scenario 4: Declined Signature\n");

    let s = sim();
    s.session.connect(COSTON2, "drivers").await.unwrap();
    s.token.decline_approvals();

    s.session.quote(&buy(dec!(5))).await.unwrap();
    let outcome = s.session.confirm().await.unwrap();
    println!("  Outcome: {:?}, session back to {}\n", outcome, s.session.state());
}

/// Redemption before resolution is a distinct, recoverable error.
async fn scenario_5_redemption() {
    println!("Scenario 5: Redemption\n");

    let s = sim();
    s.session.connect(COSTON2, "drivers").await.unwrap();

    match s.session.redeem().await {
        Err(TradeError::MarketNotResolved) => println!("  Too early: market is not resolved yet"),
        other => println!("  Unexpected: {:?}", other),
    }

    s.market.set_resolved(true);
    if let Ok(TradeOutcome::Settled { receipt }) = s.session.redeem().await {
        println!("  Resolved; payout redeemed in tx {}\n", receipt.hash);
    }
}

/// Transient read failures are retried with backoff and recover silently.
async fn scenario_6_flaky_endpoint() {
    println!("Scenario 6: Flaky Endpoint Recovery\n");

    let Sim { session, market, .. } = sim();
    let policy =
        RetryPolicy { initial_delay: std::time::Duration::from_millis(10), ..RetryPolicy::default() };
    let session = session.with_retry_policy(policy);

    session.connect(COSTON2, "drivers").await.unwrap();
    market.set_net_cost(ScaledAmount::from_units(10));
    market.fail_next_reads(2);

    let quote = session.quote(&buy(dec!(5))).await.unwrap();
    println!("  Quote survived 2 transient failures: {}\n", quote.cost);
}

/// Compute the share delta that moves an outcome to a target probability.
async fn scenario_7_target_probability() {
    println!("Scenario 7: Target Probability Delta\n");

    let s = sim();
    let q0 = ScaledAmount::from_raw(10.into());
    let q1 = ScaledAmount::from_raw(4.into());
    let target = ScaledAmount::from_decimal(dec!(0.7), WAD_DECIMALS);

    let delta = compute_delta(s.market.as_ref(), &q0, &q1, &target, DeltaDirection::FirstOutcome)
        .await
        .unwrap();
    println!("  Delta to move outcome 0 to 70%: {} (WAD)\n", delta);
}

/// Moving to a chain the wallet has never seen registers it first.
async fn scenario_8_chain_hop() {
    println!("Scenario 8: Chain Hop With Registration\n");

    let registry = ChainRegistry::builtin();
    let wallet = MockWallet::connected(Address::new("0xowner"), COSTON2);

    let hedera = registry.chain(HEDERA_TESTNET).unwrap();
    switch_with_register(&wallet, hedera).await.unwrap();
    println!(
        "  Wallet now on {} after {} switch calls and {} registration",
        hedera.name,
        wallet.switch_calls.load(std::sync::atomic::Ordering::SeqCst),
        wallet.register_calls.load(std::sync::atomic::Ordering::SeqCst),
    );
}
