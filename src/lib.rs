// dynamica-core: client engine for logarithmic bonding-curve prediction markets.
// ledger-first architecture: pricing math delegates to the on-chain cost
// function, and anything that moves funds is submitted exactly once.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: ChainId, Address, ScaledAmount, TradeIntent
//   2.x  ledger.rs: contract-call traits, error taxonomy, mocks
//   3.x  curve.rs: bonding-curve delta math, outcome delta vectors
//   4.x  executor.rs: retry with backoff, single-flight token address cache
//   5.x  approval.rs: ERC20 allowance management with 2x headroom
//   6.x  resolver.rs: multi-chain deployment registry
//   7.x  feed.rs: display series boundary (fixtures, oracles)
//   8.x  wallet.rs: signing wallet boundary, chain switch/register
//   9.x  lifecycle.rs: trade state machine, session mutual exclusion

// pricing and execution modules
pub mod curve;
pub mod executor;
pub mod lifecycle;
pub mod types;

// ledger boundary modules
pub mod approval;
pub mod ledger;
pub mod wallet;

// configuration and data modules
pub mod feed;
pub mod resolver;

// re exports for convenience
pub use approval::*;
pub use curve::*;
pub use executor::*;
pub use feed::*;
pub use ledger::*;
pub use lifecycle::*;
pub use resolver::*;
pub use types::*;
pub use wallet::*;
