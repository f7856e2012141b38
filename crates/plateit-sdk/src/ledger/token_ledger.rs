//! 令牌账本
//!
//! 余额存于 KV 的 `token_state`，所有读改写都走 sled CAS 循环，
//! 因此并发扣费不会同时读到同一个"足够"的余额。
//!
//! 月度重置是惰性的：任何一次读写都会先检查是否到期；到期则在同一次 CAS 中
//! 把余额设为免费档默认值，并在后台向购买服务商查询权威的 Pro 状态。

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::error::{PlateitSDKError, Result};
use crate::events::{BalanceChangeReason, EventManager, SDKEvent};
use crate::storage::kv::{keys, KvStore};
use crate::utils::time::Clock;

use super::entitlement::PurchaseProvider;
use super::state::TokenState;

/// `reconcile_if_stale` 的结果
#[derive(Debug)]
pub enum Reconciliation {
    /// 未到期，无变化
    Fresh,
    /// 已重置；后台权威校验的句柄可等待也可丢弃
    Reset {
        previous_balance: u32,
        entitlement_check: JoinHandle<()>,
    },
}

impl Reconciliation {
    pub fn is_reset(&self) -> bool {
        matches!(self, Reconciliation::Reset { .. })
    }

    /// 等待后台权威校验结束（未重置时立即返回）
    pub async fn wait(self) {
        if let Reconciliation::Reset {
            entitlement_check, ..
        } = self
        {
            if let Err(e) = entitlement_check.await {
                warn!("⚠️ 权益校验任务异常结束: {}", e);
            }
        }
    }
}

/// 权威 Pro 状态写回账本时的补足策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TopUpPolicy {
    /// 仅在之前不是 Pro 时补到下限
    IfNewlyPro,
    /// 低于下限则补到下限并重新开始重置周期
    RestartCycle,
    /// 补到下限（取 max，重复执行结果相同）
    Always,
}

/// 一次 CAS 修改的前后快照
struct Applied<R> {
    /// 惰性创建与重置之后、本次修改之前
    previous: TokenState,
    current: TokenState,
    output: R,
    reset_from: Option<u32>,
    /// Pro 标记在册但余额低于下限时，补足前的余额
    floor_from: Option<u32>,
}

/// 令牌账本（廉价 Clone，内部全是 Arc）
#[derive(Clone)]
pub struct TokenLedger {
    kv: Arc<KvStore>,
    config: Arc<LedgerConfig>,
    clock: Arc<dyn Clock>,
    provider: Arc<dyn PurchaseProvider>,
    events: Arc<EventManager>,
    session: CancellationToken,
}

impl std::fmt::Debug for TokenLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenLedger")
            .field("uid", &self.kv.uid())
            .field("config", &self.config)
            .finish()
    }
}

impl TokenLedger {
    pub fn new(
        kv: Arc<KvStore>,
        config: LedgerConfig,
        clock: Arc<dyn Clock>,
        provider: Arc<dyn PurchaseProvider>,
        events: Arc<EventManager>,
        session: CancellationToken,
    ) -> Self {
        Self {
            kv,
            config: Arc::new(config),
            clock,
            provider,
            events,
            session,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub(crate) fn provider(&self) -> &Arc<dyn PurchaseProvider> {
        &self.provider
    }

    pub(crate) fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    pub(crate) fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    fn period_ms(&self) -> i64 {
        i64::try_from(self.config.reset_period.as_millis()).unwrap_or(i64::MAX)
    }

    /// 原子读改写：惰性创建 + 到期重置 + Pro 下限补足 + `f`，在同一次 CAS 中完成。
    /// `f` 返回错误时不写入任何变化（包括重置）。
    async fn apply<R, F>(&self, f: F) -> Result<Applied<R>>
    where
        F: FnMut(&mut TokenState, i64) -> Result<R> + Send,
        R: Send,
    {
        self.apply_with(true, f).await
    }

    /// 重置当次不补足下限，余额先回到免费档，由后台权威校验决定是否补足
    async fn apply_with<R, F>(&self, raise_floor: bool, mut f: F) -> Result<Applied<R>>
    where
        F: FnMut(&mut TokenState, i64) -> Result<R> + Send,
        R: Send,
    {
        let now = self.now();
        let period_ms = self.period_ms();
        let free = self.config.free_tier_default;
        let floor = self.config.pro_tier_floor;

        let applied = self
            .kv
            .update(keys::TOKEN_STATE, |current: Option<TokenState>| {
                let mut state = current.unwrap_or_else(|| TokenState::fresh(now, free));
                let reset_from = state.reset_if_due(now, period_ms, free);
                let floor_from = if raise_floor && reset_from.is_none() {
                    state.raise_to_floor(floor)
                } else {
                    None
                };
                let previous = state.clone();
                let output = f(&mut state, now)?;
                Ok((
                    state.clone(),
                    Applied {
                        previous,
                        current: state,
                        output,
                        reset_from,
                        floor_from,
                    },
                ))
            })
            .await?;

        if let Some(old) = applied.reset_from {
            info!(
                "🔄 令牌月度重置: uid={}, {} -> {}",
                self.kv.uid(),
                old,
                applied.previous.balance
            );
            self.emit_balance(old, applied.previous.balance, BalanceChangeReason::MonthlyReset)
                .await;
        }
        if let Some(old) = applied.floor_from {
            debug!("👑 Pro 余额补足下限: uid={}, {} -> {}", self.kv.uid(), old, floor);
            self.emit_balance(old, applied.previous.balance, BalanceChangeReason::ProTopUp)
                .await;
        }
        Ok(applied)
    }

    /// `apply` 之后，若发生了重置则在后台发起权威校验
    async fn mutate<R, F>(&self, f: F) -> Result<(Applied<R>, Option<JoinHandle<()>>)>
    where
        F: FnMut(&mut TokenState, i64) -> Result<R> + Send,
        R: Send,
    {
        let applied = self.apply(f).await?;
        let check = applied
            .reset_from
            .map(|_| self.spawn_entitlement_check());
        Ok((applied, check))
    }

    fn spawn_entitlement_check(&self) -> JoinHandle<()> {
        let ledger = self.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = ledger.session.cancelled() => {
                    debug!("会话已取消，跳过重置后的权益校验");
                    return;
                }
                result = ledger.provider.get_current_entitlement() => result,
            };

            match result {
                Ok(snapshot) => {
                    if ledger.session.is_cancelled() {
                        return;
                    }
                    let active = snapshot.is_pro(&ledger.config);
                    if let Err(e) = ledger.apply_entitlement(active, TopUpPolicy::Always).await {
                        warn!("⚠️ 写回权益状态失败: {}", e);
                    }
                }
                Err(e) => warn!("⚠️ 重置后的权益校验失败，保持免费档余额: {}", e),
            }
        })
    }

    /// 把权威 Pro 状态写回账本，返回写回后的状态
    pub(crate) async fn apply_entitlement(
        &self,
        active: bool,
        policy: TopUpPolicy,
    ) -> Result<TokenState> {
        let floor = self.config.pro_tier_floor;
        let applied = self
            .apply_with(false, move |state, now| {
                if active {
                    match policy {
                        TopUpPolicy::IfNewlyPro => {
                            if !state.pro_cached {
                                state.balance = state.balance.max(floor);
                            }
                        }
                        TopUpPolicy::Always => state.balance = state.balance.max(floor),
                        TopUpPolicy::RestartCycle => {
                            if state.balance < floor {
                                state.balance = floor;
                                state.last_reset_at = now;
                            }
                        }
                    }
                    state.pro_cached = true;
                    state.free_trial_consumed = false;
                } else {
                    state.pro_cached = false;
                }
                Ok(())
            })
            .await?;

        let Applied {
            previous, current, ..
        } = applied;
        self.emit_balance(previous.balance, current.balance, BalanceChangeReason::ProTopUp)
            .await;
        if previous.pro_cached != current.pro_cached {
            info!("👑 Pro 状态变化: uid={}, is_pro={}", self.kv.uid(), current.pro_cached);
            self.events
                .emit(SDKEvent::ProStatusChanged {
                    is_pro: current.pro_cached,
                    timestamp: self.now(),
                })
                .await;
        }
        Ok(current)
    }

    async fn emit_balance(&self, old: u32, new: u32, reason: BalanceChangeReason) {
        if old == new {
            return;
        }
        self.events
            .emit(SDKEvent::BalanceChanged {
                old,
                new,
                reason,
                timestamp: self.now(),
            })
            .await;
    }

    /// 幂等的到期检查；可由读路径调用，也可由前台回调主动调用
    pub async fn reconcile_if_stale(&self) -> Result<Reconciliation> {
        let (applied, check) = self.mutate(|_, _| Ok(())).await?;
        Ok(match (applied.reset_from, check) {
            (Some(previous_balance), Some(entitlement_check)) => Reconciliation::Reset {
                previous_balance,
                entitlement_check,
            },
            _ => Reconciliation::Fresh,
        })
    }

    /// 当前状态（已完成惰性重置）
    pub async fn state(&self) -> Result<TokenState> {
        let (applied, _) = self.mutate(|_, _| Ok(())).await?;
        Ok(applied.current)
    }

    pub async fn get_balance(&self) -> Result<u32> {
        Ok(self.state().await?.balance)
    }

    pub async fn can_afford(&self, cost: u32) -> Result<bool> {
        Ok(self.get_balance().await? >= cost)
    }

    /// 本地快速判断：`pro_cached || balance >= pro_tier_floor`
    pub async fn is_pro_now(&self) -> Result<bool> {
        let state = self.state().await?;
        Ok(state.pro_cached || state.balance >= self.config.pro_tier_floor)
    }

    /// 乐观扣费，返回剩余余额；余额不足时返回 `InsufficientBalance` 且余额不变
    pub async fn debit(&self, cost: u32) -> Result<u32> {
        self.take(cost, BalanceChangeReason::Debit).await
    }

    pub async fn credit(&self, amount: u32) -> Result<u32> {
        self.give(amount, BalanceChangeReason::Credit).await
    }

    /// 预留 `cost`：先扣除，操作成功后 `commit`，失败则 `release` 退回
    pub async fn reserve(&self, cost: u32) -> Result<Reservation> {
        let remaining = self.take(cost, BalanceChangeReason::ReservationHeld).await?;
        let reservation = Reservation {
            id: Uuid::new_v4(),
            cost,
            remaining,
            ledger: Some(self.clone()),
        };
        debug!("预留令牌: id={}, cost={}", reservation.id, cost);
        Ok(reservation)
    }

    async fn take(&self, cost: u32, reason: BalanceChangeReason) -> Result<u32> {
        let (applied, _) = self
            .mutate(move |state, _| {
                if state.balance < cost {
                    return Err(PlateitSDKError::InsufficientBalance {
                        balance: state.balance,
                        cost,
                    });
                }
                state.balance -= cost;
                Ok(state.balance)
            })
            .await?;
        debug!("💸 扣除令牌: cost={}, remaining={}", cost, applied.output);
        self.emit_balance(applied.previous.balance, applied.current.balance, reason)
            .await;
        Ok(applied.output)
    }

    async fn give(&self, amount: u32, reason: BalanceChangeReason) -> Result<u32> {
        let (applied, _) = self
            .mutate(move |state, _| {
                state.balance = state.balance.saturating_add(amount);
                Ok(state.balance)
            })
            .await?;
        self.emit_balance(applied.previous.balance, applied.current.balance, reason)
            .await;
        Ok(applied.output)
    }

    /// 使用一次性免费操作；已用过返回 false
    pub async fn consume_free_action(&self) -> Result<bool> {
        let (applied, _) = self
            .mutate(|state, _| {
                if state.free_trial_consumed {
                    return Ok(false);
                }
                state.free_trial_consumed = true;
                Ok(true)
            })
            .await?;
        Ok(applied.output)
    }

    /// 免费操作执行失败时归还
    pub(crate) async fn restore_free_action(&self) -> Result<()> {
        self.apply(|state, _| {
            state.free_trial_consumed = false;
            Ok(())
        })
        .await
        .map(|_| ())
    }
}

/// 令牌预留
///
/// 未 `commit` / `release` 即被丢弃时，在当前运行时上自动退回。
#[derive(Debug)]
pub struct Reservation {
    id: Uuid,
    cost: u32,
    remaining: u32,
    ledger: Option<TokenLedger>,
}

impl Reservation {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// 预留后的剩余余额
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// 确认扣费
    pub fn commit(mut self) {
        if self.ledger.take().is_some() {
            debug!("✅ 预留已确认: id={}, cost={}", self.id, self.cost);
        }
    }

    /// 退回预留，返回退回后的余额
    pub async fn release(mut self) -> Result<u32> {
        let ledger = self
            .ledger
            .take()
            .ok_or_else(|| PlateitSDKError::Other("预留已结算".to_string()))?;
        debug!("↩️ 释放预留: id={}, cost={}", self.id, self.cost);
        ledger
            .give(self.cost, BalanceChangeReason::ReservationReleased)
            .await
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let Some(ledger) = self.ledger.take() else {
            return;
        };
        let (id, cost) = (self.id, self.cost);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("⚠️ 预留未结算即被丢弃，自动退回: id={}, cost={}", id, cost);
                handle.spawn(async move {
                    if let Err(e) = ledger
                        .give(cost, BalanceChangeReason::ReservationReleased)
                        .await
                    {
                        warn!("⚠️ 自动退回预留失败: id={}, error={}", id, e);
                    }
                });
            }
            Err(_) => warn!("⚠️ 无可用运行时，预留无法退回: id={}, cost={}", id, cost),
        }
    }
}
