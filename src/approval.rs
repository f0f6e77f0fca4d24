// 5.0 approval.rs: ERC20 allowance management for trade collateral. the
// allowance is read fresh before every trade, approved with 2x headroom when
// short, and trusted once the approval confirms. the approve submission itself
// is never retried.

use crate::executor::{with_retry, RetryPolicy};
use crate::ledger::{LedgerError, RevertReason, TokenContract, TxReceipt};
use crate::types::{Address, AllowanceState, ScaledAmount};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApprovalError {
    /// The user declined the approval signature in their wallet.
    #[error("approval declined by wallet")]
    Declined,

    /// The token contract rejected the approval.
    #[error("approval rejected: {0}")]
    Rejected(RevertReason),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApprovalOutcome {
    /// Existing allowance already covers the trade; nothing was submitted.
    AlreadySufficient { allowance: ScaledAmount },
    /// A new approval was submitted and confirmed.
    Approved { approved: ScaledAmount, receipt: TxReceipt },
}

/// Fresh allowance snapshot for one (owner, spender) pair. The read goes
/// through the retry executor; the result is never cached across trades.
pub async fn read_allowance(
    token: &dyn TokenContract,
    owner: &Address,
    spender: &Address,
    policy: &RetryPolicy,
) -> Result<AllowanceState, ApprovalError> {
    let allowance = with_retry(policy, "read_allowance", || token.allowance(owner, spender)).await?;
    Ok(AllowanceState {
        owner: owner.clone(),
        spender: spender.clone(),
        allowance,
        token_decimals: token.decimals().await?,
    })
}

/// Submit an approval for `2 x required` and await its confirmation. The
/// headroom lets small follow-up trades skip the approval step. Submitted
/// exactly once; the confirmed approval is trusted without a second read.
pub async fn approve_with_headroom(
    token: &dyn TokenContract,
    spender: &Address,
    required: &ScaledAmount,
    token_decimals: u32,
) -> Result<(ScaledAmount, TxReceipt), ApprovalError> {
    let approved = required.clone() * 2u32;
    tracing::info!(
        %spender,
        amount = %approved.format_units(token_decimals),
        "submitting approval"
    );
    let pending = match token.approve(spender, &approved).await {
        Ok(pending) => pending,
        Err(LedgerError::Declined) => return Err(ApprovalError::Declined),
        Err(LedgerError::Reverted { reason }) => return Err(ApprovalError::Rejected(reason)),
        Err(other) => return Err(ApprovalError::Ledger(other)),
    };
    let receipt = token.confirm(&pending).await?;
    tracing::info!(tx = %receipt.hash, block = receipt.block, "approval confirmed");
    Ok((approved, receipt))
}

/// Make sure `spender` may pull at least `required` collateral from `owner`:
/// one fresh read, then one approval if the snapshot falls short.
pub async fn ensure_allowance(
    token: &dyn TokenContract,
    owner: &Address,
    spender: &Address,
    required: &ScaledAmount,
    policy: &RetryPolicy,
) -> Result<ApprovalOutcome, ApprovalError> {
    let snapshot = read_allowance(token, owner, spender, policy).await?;

    if snapshot.covers(required) {
        tracing::debug!(
            allowance = %snapshot.allowance.format_units(snapshot.token_decimals),
            required = %required.format_units(snapshot.token_decimals),
            "allowance already covers trade"
        );
        return Ok(ApprovalOutcome::AlreadySufficient { allowance: snapshot.allowance });
    }

    let (approved, receipt) =
        approve_with_headroom(token, spender, required, snapshot.token_decimals).await?;
    Ok(ApprovalOutcome::Approved { approved, receipt })
}
