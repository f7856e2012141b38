//! 权益闸门 - 付费操作的放行决策
//!
//! 判定顺序：本地 Pro 近似 → 一次性免费操作 → 余额扣费 → 付费墙。

use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{PlateitSDKError, Result};
use crate::events::SDKEvent;

use super::entitlement::{PurchaseOutcome, PurchaseResult};
use super::token_ledger::{TokenLedger, TopUpPolicy};

/// 付费操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaidAction {
    /// 从链接提取菜谱（视频链接更贵）
    ExtractRecipe { url: String },
    /// 拍照识别食材
    PantryScan,
    /// AI 对话：不扣令牌，免费用户仅可使用一次
    Chat,
}

impl PaidAction {
    pub fn cost(&self) -> u32 {
        match self {
            PaidAction::ExtractRecipe { url } => {
                if is_video_url(url) {
                    2
                } else {
                    1
                }
            }
            PaidAction::PantryScan => 1,
            PaidAction::Chat => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PaidAction::ExtractRecipe { .. } => "extract_recipe",
            PaidAction::PantryScan => "pantry_scan",
            PaidAction::Chat => "chat",
        }
    }

    /// 无令牌价格、只能靠 Pro 或免费操作放行
    fn is_pro_only(&self) -> bool {
        matches!(self, PaidAction::Chat)
    }
}

fn is_video_url(url: &str) -> bool {
    let url = url.to_ascii_lowercase();
    url.contains("youtube.com") || url.contains("youtu.be")
}

/// 放行决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    AllowedPro,
    AllowedFreeAction,
    Debited { cost: u32, remaining: u32 },
    Paywall { cost: u32, balance: u32 },
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, GateDecision::Paywall { .. })
    }
}

/// `run_gated` 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gated<T> {
    Completed(T),
    Paywall { cost: u32, balance: u32 },
}

/// 权益闸门
#[derive(Debug, Clone)]
pub struct EntitlementGate {
    ledger: TokenLedger,
}

impl EntitlementGate {
    pub fn new(ledger: TokenLedger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    /// 本地快速判断，可能与权威状态不一致
    pub async fn is_pro_now(&self) -> Result<bool> {
        self.ledger.is_pro_now().await
    }

    /// 权威判断：查询购买服务商并写回账本。查询失败返回 false，缓存标记保持不变
    pub async fn is_pro(&self) -> bool {
        match self.ledger.provider().get_current_entitlement().await {
            Ok(snapshot) => {
                let active = snapshot.is_pro(self.ledger.config());
                if let Err(e) = self
                    .ledger
                    .apply_entitlement(active, TopUpPolicy::IfNewlyPro)
                    .await
                {
                    warn!("⚠️ 写回 Pro 状态失败: {}", e);
                }
                active
            }
            Err(e) => {
                warn!("⚠️ 查询权益失败: {}", e);
                false
            }
        }
    }

    /// 回调形式的 `is_pro`
    pub fn is_pro_with<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let gate = self.clone();
        tokio::spawn(async move { callback(gate.is_pro().await) })
    }

    /// 购买/恢复后强制刷新 Pro 状态，返回是否 Pro
    pub async fn force_refresh_pro_status(&self) -> Result<bool> {
        let snapshot = self
            .ledger
            .provider()
            .get_current_entitlement()
            .await
            .map_err(|e| PlateitSDKError::Entitlement(e.to_string()))?;
        self.mirror(snapshot.is_pro(self.ledger.config())).await
    }

    pub async fn purchase(&self, product_id: &str) -> Result<PurchaseOutcome> {
        let result = self
            .ledger
            .provider()
            .purchase(product_id)
            .await
            .map_err(|e| PlateitSDKError::Entitlement(e.to_string()))?;
        match result {
            PurchaseResult::Completed(snapshot) => {
                let is_pro = self.mirror(snapshot.is_pro(self.ledger.config())).await?;
                info!("🛒 购买完成: product={}, is_pro={}", product_id, is_pro);
                Ok(PurchaseOutcome::Purchased { is_pro })
            }
            PurchaseResult::Cancelled => {
                info!("购买已被用户取消: product={}", product_id);
                Ok(PurchaseOutcome::Cancelled)
            }
        }
    }

    /// 恢复购买，返回是否 Pro
    pub async fn restore(&self) -> Result<bool> {
        let snapshot = self
            .ledger
            .provider()
            .restore()
            .await
            .map_err(|e| PlateitSDKError::Entitlement(e.to_string()))?;
        self.mirror(snapshot.is_pro(self.ledger.config())).await
    }

    async fn mirror(&self, active: bool) -> Result<bool> {
        let state = self
            .ledger
            .apply_entitlement(active, TopUpPolicy::RestartCycle)
            .await?;
        Ok(state.pro_cached)
    }

    /// 按给定价格判定并（必要时）乐观扣费
    pub async fn authorize(&self, cost: u32) -> Result<GateDecision> {
        self.decide("action", cost, false).await
    }

    pub async fn authorize_action(&self, action: &PaidAction) -> Result<GateDecision> {
        self.decide(action.name(), action.cost(), action.is_pro_only())
            .await
    }

    async fn decide(&self, label: &str, cost: u32, pro_only: bool) -> Result<GateDecision> {
        if self.ledger.is_pro_now().await? {
            return Ok(GateDecision::AllowedPro);
        }
        if self.consume_free_action(label).await? {
            return Ok(GateDecision::AllowedFreeAction);
        }
        if pro_only {
            let balance = self.ledger.get_balance().await?;
            return Ok(self.paywall(label, cost, balance).await);
        }
        match self.ledger.debit(cost).await {
            Ok(remaining) => Ok(GateDecision::Debited { cost, remaining }),
            Err(PlateitSDKError::InsufficientBalance { balance, .. }) => {
                Ok(self.paywall(label, cost, balance).await)
            }
            Err(e) => Err(e),
        }
    }

    /// 预留后执行：操作成功才确认扣费，失败则退回（免费操作同理归还）
    pub async fn run_gated<T, Fut>(&self, action: &PaidAction, fut: Fut) -> Result<Gated<T>>
    where
        Fut: Future<Output = Result<T>>,
    {
        let label = action.name();
        let cost = action.cost();

        if self.ledger.is_pro_now().await? {
            return fut.await.map(Gated::Completed);
        }

        if self.consume_free_action(label).await? {
            return match fut.await {
                Ok(value) => Ok(Gated::Completed(value)),
                Err(e) => {
                    if let Err(restore_err) = self.ledger.restore_free_action().await {
                        warn!("⚠️ 归还免费操作失败: {}", restore_err);
                    }
                    Err(e)
                }
            };
        }

        if action.is_pro_only() {
            let balance = self.ledger.get_balance().await?;
            self.paywall(label, cost, balance).await;
            return Ok(Gated::Paywall { cost, balance });
        }

        let reservation = match self.ledger.reserve(cost).await {
            Ok(reservation) => reservation,
            Err(PlateitSDKError::InsufficientBalance { balance, .. }) => {
                self.paywall(label, cost, balance).await;
                return Ok(Gated::Paywall { cost, balance });
            }
            Err(e) => return Err(e),
        };

        match fut.await {
            Ok(value) => {
                reservation.commit();
                Ok(Gated::Completed(value))
            }
            Err(e) => {
                if let Err(release_err) = reservation.release().await {
                    warn!("⚠️ 退回预留失败: {}", release_err);
                }
                Err(e)
            }
        }
    }

    async fn consume_free_action(&self, label: &str) -> Result<bool> {
        if !self.ledger.consume_free_action().await? {
            return Ok(false);
        }
        info!("🎁 使用一次性免费操作: {}", label);
        self.ledger
            .events()
            .emit(SDKEvent::FreeActionConsumed {
                action: label.to_string(),
                timestamp: self.ledger.now(),
            })
            .await;
        Ok(true)
    }

    async fn paywall(&self, label: &str, cost: u32, balance: u32) -> GateDecision {
        info!("🔒 余额不足，转付费墙: action={}, cost={}, balance={}", label, cost, balance);
        self.ledger
            .events()
            .emit(SDKEvent::PaywallRequired {
                action: label.to_string(),
                cost,
                balance,
                timestamp: self.ledger.now(),
            })
            .await;
        GateDecision::Paywall { cost, balance }
    }
}
