//! 令牌账本 Lifecycle Hook
//!
//! App 回到前台时主动检查月度重置，不依赖"之后总会有人读余额"。

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::Result;
use crate::ledger::{Reconciliation, TokenLedger};

use super::LifecycleHook;

pub struct LedgerReconcileHook {
    ledger: TokenLedger,
}

impl LedgerReconcileHook {
    pub fn new(ledger: TokenLedger) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl LifecycleHook for LedgerReconcileHook {
    fn name(&self) -> &'static str {
        "ledger_reconcile"
    }

    async fn on_background(&self) -> Result<()> {
        Ok(())
    }

    async fn on_foreground(&self) -> Result<()> {
        match self.ledger.reconcile_if_stale().await? {
            Reconciliation::Fresh => debug!("令牌账本未到重置周期"),
            // 权威校验在后台继续，不阻塞前台切换
            Reconciliation::Reset {
                previous_balance, ..
            } => info!("🔄 前台切换触发令牌重置: 原余额 {}", previous_balance),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::{FakeProvider, LedgerFixture};
    use crate::lifecycle::LifecycleManager;
    use crate::utils::time::Clock;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn foreground_reconciles_ledger() {
        let fx = LedgerFixture::new(FakeProvider::free()).await;
        fx.ledger.debit(7).await.unwrap();

        let manager = LifecycleManager::new();
        manager.register_hook(Arc::new(LedgerReconcileHook::new(fx.ledger.clone())));

        fx.clock.advance(Duration::from_secs(31 * 24 * 60 * 60));
        manager.notify_foreground().await.unwrap();

        let state = fx.ledger.state().await.unwrap();
        assert_eq!(state.balance, 10);
        assert_eq!(state.last_reset_at, fx.clock.now_millis());
    }
}
