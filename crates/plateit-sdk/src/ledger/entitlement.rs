//! 购买服务商（外部协作方）与权益快照

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LedgerConfig;

/// 购买服务商错误
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("purchase provider network error: {0}")]
    Network(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("purchase provider not configured")]
    NotConfigured,
}

/// 单个权益
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementInfo {
    pub identifier: String,
    pub is_active: bool,
    pub product_id: Option<String>,
    /// 过期时间（毫秒），None 表示永久
    pub expires_at: Option<i64>,
}

impl EntitlementInfo {
    pub fn active(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            is_active: true,
            product_id: None,
            expires_at: None,
        }
    }
}

/// 服务商返回的权益快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementSnapshot {
    pub entitlements: Vec<EntitlementInfo>,
}

impl EntitlementSnapshot {
    pub fn free() -> Self {
        Self::default()
    }

    pub fn with_active(identifier: impl Into<String>) -> Self {
        Self {
            entitlements: vec![EntitlementInfo::active(identifier)],
        }
    }

    pub fn active_ids(&self) -> impl Iterator<Item = &str> {
        self.entitlements
            .iter()
            .filter(|e| e.is_active)
            .map(|e| e.identifier.as_str())
    }

    /// 命中配置的 Pro 权益，或（开启时）任意权益处于激活状态
    pub fn is_pro(&self, config: &LedgerConfig) -> bool {
        let mut active = self.active_ids().peekable();
        if config.any_active_entitlement_is_pro && active.peek().is_some() {
            return true;
        }
        active.any(|id| config.pro_entitlement_ids.iter().any(|pro| pro == id))
    }
}

/// 购买结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseResult {
    Completed(EntitlementSnapshot),
    /// 用户主动取消，不算错误
    Cancelled,
}

/// 购买/恢复后对外的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseOutcome {
    Purchased { is_pro: bool },
    Cancelled,
}

/// 购买服务商
#[async_trait]
pub trait PurchaseProvider: Send + Sync {
    /// 查询当前权益（权威来源）
    async fn get_current_entitlement(&self) -> Result<EntitlementSnapshot, ProviderError>;

    async fn purchase(&self, product_id: &str) -> Result<PurchaseResult, ProviderError>;

    async fn restore(&self) -> Result<EntitlementSnapshot, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pro_detection_follows_config() {
        let mut config = LedgerConfig::default();
        assert!(!EntitlementSnapshot::free().is_pro(&config));
        assert!(EntitlementSnapshot::with_active("pro_access").is_pro(&config));
        assert!(EntitlementSnapshot::with_active("legacy_bundle").is_pro(&config));

        config.any_active_entitlement_is_pro = false;
        assert!(!EntitlementSnapshot::with_active("legacy_bundle").is_pro(&config));
        assert!(EntitlementSnapshot::with_active("PlateIt Pro").is_pro(&config));

        let inactive = EntitlementSnapshot {
            entitlements: vec![EntitlementInfo {
                is_active: false,
                ..EntitlementInfo::active("PlateIt Pro")
            }],
        };
        assert!(!inactive.is_pro(&config));
    }
}
