// 1.0: all the primitives live here. nothing in the engine works without these types.
// chain/asset/address IDs, WAD-scaled amounts, trade intents. each is a newtype so
// the compiler catches unit mixups between raw and scaled quantities.

use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetIndex(pub usize);

impl fmt::Display for AssetIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.1: contract address. kept as the hex string the RPC layer hands out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    pub fn new(s: &str) -> Self {
        Self(s.to_string())
    }

    /// The zero address, used as a placeholder for undeployed contracts.
    pub fn zero() -> Self {
        Self(format!("0x{}", "0".repeat(40)))
    }

    pub fn is_zero(&self) -> bool {
        self.0
            .strip_prefix("0x")
            .map(|hex| !hex.is_empty() && hex.bytes().all(|b| b == b'0'))
            .unwrap_or(false)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of decimals in the canonical fixed unit scale (WAD = 10^18).
pub const WAD_DECIMALS: u32 = 18;

// 1.2: WAD-scaled amount: a signed arbitrary-precision integer carrying a token
// quantity at a fixed scale. all money math happens here; Decimal appears only
// at the human boundary. division truncates toward zero, like the ledger's.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScaledAmount(BigInt);

impl ScaledAmount {
    pub fn from_raw(raw: BigInt) -> Self {
        Self(raw)
    }

    pub fn zero() -> Self {
        Self(BigInt::zero())
    }

    /// One whole unit at the WAD scale (10^18).
    pub fn wad() -> Self {
        Self(pow10(WAD_DECIMALS))
    }

    /// Scale a whole-unit integer quantity to WAD.
    pub fn from_units(units: i64) -> Self {
        Self(BigInt::from(units) * pow10(WAD_DECIMALS))
    }

    /// Parse a human-readable decimal into an integer at the given scale,
    /// truncating excess fractional digits. Mirrors the RPC layer's parseUnits.
    pub fn from_decimal(value: Decimal, decimals: u32) -> Self {
        let mantissa = BigInt::from(value.mantissa());
        let scale = value.scale();
        if scale <= decimals {
            Self(mantissa * pow10(decimals - scale))
        } else {
            Self(mantissa / pow10(scale - decimals))
        }
    }

    /// Format as a decimal string at the given scale (formatUnits).
    pub fn format_units(&self, decimals: u32) -> String {
        let sign = if self.0.is_negative() { "-" } else { "" };
        let abs = self.0.abs();
        let unit = pow10(decimals);
        let int_part = &abs / &unit;
        let frac_part = &abs % &unit;
        if decimals == 0 {
            format!("{}{}", sign, int_part)
        } else {
            format!("{}{}.{:0>width$}", sign, int_part, frac_part, width = decimals as usize)
        }
    }

    /// Convert to a Decimal at the given scale for display math. Quantities
    /// beyond Decimal's 96-bit range degrade to fewer fractional digits
    /// rather than failing; exact values stay in ScaledAmount.
    pub fn to_decimal(&self, decimals: u32) -> Decimal {
        if let Ok(d) = Decimal::from_str(&self.format_units(decimals)) {
            return d;
        }
        let mut kept = decimals;
        while kept > 0 {
            kept -= 1;
            let truncated = Self(&self.0 / pow10(decimals - kept));
            if let Ok(d) = Decimal::from_str(&truncated.format_units(kept)) {
                return d;
            }
        }
        Decimal::ZERO
    }

    pub fn raw(&self) -> &BigInt {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    pub fn signum(&self) -> i8 {
        if self.0.is_negative() {
            -1
        } else if self.0.is_zero() {
            0
        } else {
            1
        }
    }
}

fn pow10(exp: u32) -> BigInt {
    num_traits::pow(BigInt::from(10u8), exp as usize)
}

impl Add for ScaledAmount {
    type Output = ScaledAmount;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for ScaledAmount {
    type Output = ScaledAmount;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Mul for ScaledAmount {
    type Output = ScaledAmount;
    fn mul(self, rhs: Self) -> Self {
        Self(self.0 * rhs.0)
    }
}

impl Mul<u32> for ScaledAmount {
    type Output = ScaledAmount;
    fn mul(self, rhs: u32) -> Self {
        Self(self.0 * BigInt::from(rhs))
    }
}

impl Div for ScaledAmount {
    type Output = ScaledAmount;
    fn div(self, rhs: Self) -> Self {
        Self(self.0 / rhs.0)
    }
}

impl Neg for ScaledAmount {
    type Output = ScaledAmount;
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl fmt::Display for ScaledAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.3: the three operations a lifecycle run can perform. redeem carries no
// amount or asset; those fields are ignored for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeOp {
    Buy,
    Sell,
    Redeem,
}

impl TradeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeOp::Buy => "buy",
            TradeOp::Sell => "sell",
            TradeOp::Redeem => "redeem",
        }
    }
}

impl fmt::Display for TradeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// 1.4: one user intent, immutable for the whole lifecycle run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub op: TradeOp,
    pub asset_index: AssetIndex,
    /// Human-readable share amount, scaled to market decimals at the boundary.
    pub amount: Decimal,
    pub market: Address,
    pub chain_id: ChainId,
}

impl TradeIntent {
    pub fn new(
        op: TradeOp,
        asset_index: AssetIndex,
        amount: Decimal,
        market: Address,
        chain_id: ChainId,
    ) -> Self {
        Self { op, asset_index, amount, market, chain_id }
    }
}

// 1.5: a freshly computed cost quote. consumed by confirm, never reused: the
// curve moves with every trade, so a stale quote is a wrong quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostQuote {
    pub asset_index: AssetIndex,
    /// Share amount the quote was computed for.
    pub amount: Decimal,
    /// Absolute cost in collateral tokens, rounded to 2 dp at the boundary.
    pub cost: Decimal,
    pub token_decimals: u32,
}

impl CostQuote {
    pub fn price_per_share(&self) -> Decimal {
        if self.amount <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.cost / self.amount).round_dp(2)
    }
}

// 1.6: read-only allowance snapshot. re-fetched before every trade attempt,
// never assumed still valid.
#[derive(Debug, Clone, PartialEq)]
pub struct AllowanceState {
    pub owner: Address,
    pub spender: Address,
    pub allowance: ScaledAmount,
    pub token_decimals: u32,
}

impl AllowanceState {
    pub fn covers(&self, required: &ScaledAmount) -> bool {
        self.allowance >= *required
    }
}

// 1.7: millisecond timestamp for audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }
}
