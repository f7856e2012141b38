//! 令牌账本与权益闸门
//!
//! - `TokenLedger`：本地持久化余额，惰性月度重置，乐观扣费 / 预留确认
//! - `EntitlementGate`：本地 Pro 近似 + 购买服务商权威校验，决定付费操作是否放行

pub mod entitlement;
pub mod gate;
pub mod state;
pub mod token_ledger;

#[cfg(test)]
pub(crate) mod testing;

pub use entitlement::{
    EntitlementInfo, EntitlementSnapshot, ProviderError, PurchaseOutcome, PurchaseProvider,
    PurchaseResult,
};
pub use gate::{EntitlementGate, GateDecision, Gated, PaidAction};
pub use state::TokenState;
pub use token_ledger::{Reconciliation, Reservation, TokenLedger};
