//! 令牌状态（每个登录用户一份，存于 KV `token_state`）

use serde::{Deserialize, Serialize};

/// 持久化的令牌状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    /// 当前余额，永不为负
    pub balance: u32,
    /// 上次月度重置时间（毫秒）
    pub last_reset_at: i64,
    /// 最近一次权威校验得到的 Pro 标记
    pub pro_cached: bool,
    /// 一次性免费操作是否已使用
    pub free_trial_consumed: bool,
}

impl TokenState {
    /// 首次访问时创建：免费档默认余额，重置周期从现在开始
    pub fn fresh(now: i64, free_tier_default: u32) -> Self {
        Self {
            balance: free_tier_default,
            last_reset_at: now,
            pro_cached: false,
            free_trial_consumed: false,
        }
    }

    pub fn is_reset_due(&self, now: i64, period_ms: i64) -> bool {
        now.saturating_sub(self.last_reset_at) > period_ms
    }

    /// 到期则重置（设置而非累加，重复触发结果相同）；返回重置前余额
    pub(crate) fn reset_if_due(
        &mut self,
        now: i64,
        period_ms: i64,
        free_tier_default: u32,
    ) -> Option<u32> {
        if !self.is_reset_due(now, period_ms) {
            return None;
        }
        let previous = self.balance;
        self.balance = free_tier_default;
        self.last_reset_at = now;
        self.free_trial_consumed = false;
        Some(previous)
    }

    /// Pro 标记在册时余额不低于下限；补足时返回补足前余额
    pub(crate) fn raise_to_floor(&mut self, pro_tier_floor: u32) -> Option<u32> {
        if !self.pro_cached || self.balance >= pro_tier_floor {
            return None;
        }
        let previous = self.balance;
        self.balance = pro_tier_floor;
        Some(previous)
    }
}
