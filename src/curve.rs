// 3.0 curve.rs: bonding-curve calculator. computes the signed share delta that
// moves an outcome to a target probability, and the per-outcome delta vectors
// trades submit. the liquidity parameter b and the logarithm both come from the
// ledger so quotes can never drift from the on-chain cost function.

use crate::ledger::{LedgerError, MarketContract};
use crate::types::{AssetIndex, ScaledAmount, TradeOp};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CurveError {
    /// The curve has no liquidity (b == 0); any delta would divide by zero.
    #[error("curve liquidity parameter is zero")]
    DivisionByZero,

    /// Target probability outside the open interval (0, 1).
    #[error("target probability must be strictly between 0 and 1")]
    InvalidTarget,

    #[error("asset index {index} out of range for {outcome_count} outcomes")]
    IndexOutOfRange { index: AssetIndex, outcome_count: usize },

    #[error("share amount must be positive")]
    AmountNotPositive,

    /// Redemption settles positions; it has no outcome delta.
    #[error("{0} has no outcome delta")]
    NoDelta(TradeOp),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Which outcome the delta drives toward the target probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaDirection {
    FirstOutcome,
    SecondOutcome,
}

/// Signed share delta that moves a two-outcome curve to `target` probability.
///
/// `q0` and `q1` are whole-share outcome quantities; `target` is a WAD-scaled
/// probability. The steps mirror the ledger's cost function exactly:
/// quantities are lifted to WAD, `b` is read for the lifted pair, the odds
/// ratio t/(1-t) is formed in WAD, its log is taken by the ledger, and the
/// whole-share adjustment is lifted to WAD before it joins the product term.
/// Every division truncates, as the ledger's does.
pub async fn compute_delta(
    market: &dyn MarketContract,
    q0: &ScaledAmount,
    q1: &ScaledAmount,
    target: &ScaledAmount,
    direction: DeltaDirection,
) -> Result<ScaledAmount, CurveError> {
    let wad = ScaledAmount::wad();

    let q0_wad = q0.clone() * wad.clone();
    let q1_wad = q1.clone() * wad.clone();
    let b = market.get_b(&[q0_wad, q1_wad]).await?;
    if b.is_zero() {
        return Err(CurveError::DivisionByZero);
    }

    if target.signum() <= 0 || *target >= wad {
        return Err(CurveError::InvalidTarget);
    }

    let ratio = target.clone() * wad.clone() / (wad.clone() - target.clone());
    let ln_ratio = market.ln(&ratio).await?;
    let raw = b * ln_ratio / wad.clone();

    let adjustment = match direction {
        DeltaDirection::FirstOutcome => q1.clone() - q0.clone(),
        DeltaDirection::SecondOutcome => q0.clone() - q1.clone(),
    };

    Ok(raw + adjustment * wad)
}

/// Per-outcome delta vector for buying or selling `shares` of one outcome:
/// the traded slot carries the signed amount, every other slot is zero.
pub fn outcome_deltas(
    outcome_count: usize,
    index: AssetIndex,
    shares: &ScaledAmount,
    op: TradeOp,
) -> Result<Vec<ScaledAmount>, CurveError> {
    let sign = match op {
        TradeOp::Buy => 1,
        TradeOp::Sell => -1,
        TradeOp::Redeem => return Err(CurveError::NoDelta(op)),
    };
    if index.0 >= outcome_count {
        return Err(CurveError::IndexOutOfRange { index, outcome_count });
    }
    if shares.signum() <= 0 {
        return Err(CurveError::AmountNotPositive);
    }

    let mut deltas = vec![ScaledAmount::zero(); outcome_count];
    deltas[index.0] = if sign < 0 { -shares.clone() } else { shares.clone() };
    Ok(deltas)
}
