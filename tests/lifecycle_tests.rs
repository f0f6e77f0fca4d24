//! End-to-end lifecycle tests
//!
//! These tests drive whole trade runs through the public session API against
//! in-memory contracts, checking the guarantees that matter with real money:
//! one submission per run, rejected concurrency, and honest error reporting.

use dynamica_core::*;
use rust_decimal_macros::dec;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const DRIVERS_MARKET: &str = "0x9d127B8a587DD2fF08d24dA031eF1060625ae3f4";

struct Harness {
    session: Arc<TradeSession>,
    market: Arc<MockMarket>,
    token: Arc<MockToken>,
    owner: Address,
}

fn harness() -> Harness {
    let registry = ChainRegistry::builtin();
    let market_address = registry.market_address(COSTON2, "drivers").unwrap();
    let token_address = registry.base_token(COSTON2).unwrap();

    let market = Arc::new(MockMarket::new(2, token_address.clone()));
    let token = Arc::new(MockToken::new());
    let owner = Address::new("0xowner");
    token.set_balance(owner.clone(), ScaledAmount::from_units(1000));

    let provider = MockProvider::new();
    provider.register_market(market_address, market.clone());
    provider.register_token(token_address, token.clone());

    let wallet = Arc::new(MockWallet::connected(owner.clone(), COSTON2));
    let session = Arc::new(TradeSession::new(registry, Arc::new(provider), wallet));
    Harness { session, market, token, owner }
}

fn buy(amount: rust_decimal::Decimal) -> TradeIntent {
    TradeIntent::new(TradeOp::Buy, AssetIndex(0), amount, Address::new(DRIVERS_MARKET), COSTON2)
}

/// One submission per run, no matter how the allowance check went.
mod submission_tests {
    use super::*;

    #[tokio::test]
    async fn buy_with_existing_allowance_submits_exactly_once() {
        let h = harness();
        h.session.connect(COSTON2, "drivers").await.unwrap();
        h.token.set_allowance(
            h.owner.clone(),
            Address::new(DRIVERS_MARKET),
            ScaledAmount::from_units(1000),
        );

        h.session.quote(&buy(dec!(5))).await.unwrap();
        let outcome = h.session.confirm().await.unwrap();

        assert!(matches!(outcome, TradeOutcome::Settled { .. }));
        // the run passed through Settled and came to rest in Idle
        let states: Vec<LifecycleState> =
            h.session.history().into_iter().map(|(s, _)| s).collect();
        assert!(states.contains(&LifecycleState::Settled));
        assert_eq!(h.session.state(), LifecycleState::Idle);
        assert_eq!(h.market.prediction_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.token.approve_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.token.allowance_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reverted_submission_is_not_replayed() {
        let h = harness();
        h.session.connect(COSTON2, "drivers").await.unwrap();
        h.market.revert_submissions(RevertReason::InsufficientBalance);

        h.session.quote(&buy(dec!(5))).await.unwrap();
        let err = h.session.confirm().await.unwrap_err();

        assert_eq!(err, TradeError::SubmissionFailed { reason: RevertReason::InsufficientBalance });
        assert_eq!(h.market.prediction_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_quote_is_consumed_by_its_confirm() {
        let h = harness();
        h.session.connect(COSTON2, "drivers").await.unwrap();
        h.session.quote(&buy(dec!(5))).await.unwrap();
        h.session.confirm().await.unwrap();

        assert!(h.session.active_quote().is_none());
        assert_eq!(h.session.confirm().await.unwrap_err(), TradeError::NoActiveQuote);
        assert_eq!(h.market.prediction_calls.load(Ordering::SeqCst), 1);
    }
}

/// A second trade arriving mid-flight is rejected, never queued.
mod mutual_exclusion_tests {
    use super::*;

    #[tokio::test]
    async fn concurrent_confirm_is_rejected_while_one_is_in_flight() {
        let h = harness();
        h.session.connect(COSTON2, "drivers").await.unwrap();
        h.market.stall_confirmations(4);

        h.session.quote(&buy(dec!(5))).await.unwrap();

        let first = h.session.clone();
        let second = h.session.clone();
        let (a, b) = futures::join!(first.confirm(), second.confirm());

        let results = [a, b];
        assert_eq!(
            results.iter().filter(|r| matches!(r, Ok(TradeOutcome::Settled { .. }))).count(),
            1
        );
        assert_eq!(
            results.iter().filter(|r| matches!(r, Err(TradeError::SessionBusy))).count(),
            1
        );
        // the loser never reached the ledger
        assert_eq!(h.market.prediction_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn the_session_is_free_again_after_settlement() {
        let h = harness();
        h.session.connect(COSTON2, "drivers").await.unwrap();

        h.session.quote(&buy(dec!(5))).await.unwrap();
        h.session.confirm().await.unwrap();

        h.session.quote(&buy(dec!(3))).await.unwrap();
        let outcome = h.session.confirm().await.unwrap();
        assert!(matches!(outcome, TradeOutcome::Settled { .. }));
        assert_eq!(h.market.prediction_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn the_session_is_free_again_after_a_failure() {
        let h = harness();
        h.session.connect(COSTON2, "drivers").await.unwrap();
        h.market.revert_submissions(RevertReason::ZeroLiquidity);

        h.session.quote(&buy(dec!(5))).await.unwrap();
        assert!(h.session.confirm().await.is_err());

        // guard released on the error path too
        let err = h.session.redeem().await.unwrap_err();
        assert_eq!(err, TradeError::MarketNotResolved);
    }
}

/// Redemption errors: "wait" and "broken" must not look alike.
mod redemption_tests {
    use super::*;

    #[tokio::test]
    async fn unresolved_market_is_not_a_submission_failure() {
        let h = harness();
        h.session.connect(COSTON2, "drivers").await.unwrap();

        let err = h.session.redeem().await.unwrap_err();
        assert_eq!(err, TradeError::MarketNotResolved);
        assert!(!matches!(err, TradeError::SubmissionFailed { .. }));
    }

    #[tokio::test]
    async fn resolved_redemption_settles_and_refreshes() {
        let h = harness();
        h.session.connect(COSTON2, "drivers").await.unwrap();
        h.market.set_resolved(true);

        let outcome = h.session.redeem().await.unwrap();
        assert!(matches!(outcome, TradeOutcome::Settled { .. }));
        assert!(h.session.portfolio().is_some());
    }
}

/// Quote math at the human boundary.
mod pricing_tests {
    use super::*;

    #[tokio::test]
    async fn ten_tokens_for_five_shares_is_two_per_share() {
        let h = harness();
        h.session.connect(COSTON2, "drivers").await.unwrap();
        h.market.set_net_cost(ScaledAmount::from_units(10));

        let quote = h.session.quote(&buy(dec!(5))).await.unwrap();
        assert_eq!(quote.cost, dec!(10.00));
        assert_eq!(quote.price_per_share(), dec!(2.00));
    }

    #[tokio::test]
    async fn sell_quotes_report_absolute_proceeds() {
        let h = harness();
        h.session.connect(COSTON2, "drivers").await.unwrap();
        h.market.set_net_cost(ScaledAmount::from_units(6));

        let intent =
            TradeIntent::new(TradeOp::Sell, AssetIndex(0), dec!(3), Address::new(DRIVERS_MARKET), COSTON2);
        let quote = h.session.quote(&intent).await.unwrap();
        assert_eq!(quote.cost, dec!(6.00));
        assert_eq!(quote.price_per_share(), dec!(2.00));
    }
}

/// Transient failures: retried with backoff, then surfaced honestly.
mod resilience_tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn flaky_quote_reads_retry_on_the_backoff_schedule() {
        let h = harness();
        h.session.connect(COSTON2, "drivers").await.unwrap();
        h.market.fail_next_reads(2);

        let start = Instant::now();
        let quote = h.session.quote(&buy(dec!(5))).await.unwrap();
        assert_eq!(quote.cost, dec!(10.00));
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_reads_fail_the_quote_and_return_to_idle() {
        let h = harness();
        h.session.connect(COSTON2, "drivers").await.unwrap();
        h.market.fail_next_reads(10);

        let err = h.session.quote(&buy(dec!(5))).await.unwrap_err();
        assert!(matches!(err, TradeError::Ledger(LedgerError::Transport { .. })));
        assert_eq!(h.session.state(), LifecycleState::Idle);
        assert!(h.session.active_quote().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn token_resolution_falls_back_after_exhaustion() {
        let h = harness();
        // eat the whole retry budget of the collateral lookup; the registry
        // fallback happens to be where the token actually lives, so the
        // session still comes up
        h.market.fail_next_reads(3);
        h.session.connect(COSTON2, "drivers").await.unwrap();
        assert_eq!(h.market.collateral_calls.load(Ordering::SeqCst), 3);

        let quote = h.session.quote(&buy(dec!(5))).await.unwrap();
        assert_eq!(quote.cost, dec!(10.00));
    }
}
