//! SDK 配置

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PlateitSDKError, Result};
use crate::sync::Collection;

/// SDK 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateitConfig {
    /// 数据存储目录，用户数据位于 {data_dir}/users/{uid}/
    pub data_dir: PathBuf,
    /// 同步配置
    pub sync_config: SyncConfig,
    /// 令牌账本配置
    pub ledger_config: LedgerConfig,
    /// 事件配置
    pub event_config: EventConfig,
    /// 调试模式（初始化 tracing 输出）
    pub debug_mode: bool,
}

/// 同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// 食材库节流阈值
    pub pantry_staleness: Duration,
    /// 推荐视频节流阈值
    pub recommendations_staleness: Duration,
}

impl SyncConfig {
    pub fn staleness(&self, collection: Collection) -> Duration {
        match collection {
            Collection::Pantry => self.pantry_staleness,
            Collection::Recommendations => self.recommendations_staleness,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pantry_staleness: Collection::Pantry.default_staleness(),
            recommendations_staleness: Collection::Recommendations.default_staleness(),
        }
    }
}

/// 令牌账本配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// 免费档默认余额（每个重置周期）
    pub free_tier_default: u32,
    /// Pro 档余额下限
    pub pro_tier_floor: u32,
    /// 重置周期
    pub reset_period: Duration,
    /// 视为 Pro 的权益标识
    pub pro_entitlement_ids: Vec<String>,
    /// 任意一个权益处于激活状态即视为 Pro
    pub any_active_entitlement_is_pro: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            free_tier_default: 10,
            pro_tier_floor: 50,
            reset_period: Duration::from_secs(30 * 24 * 60 * 60),
            pro_entitlement_ids: vec!["PlateIt Pro".to_string(), "pro_access".to_string()],
            any_active_entitlement_is_pro: true,
        }
    }
}

/// 事件配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventConfig {
    /// 事件广播缓冲区大小
    pub buffer_size: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

impl Default for PlateitConfig {
    fn default() -> Self {
        Self {
            data_dir: get_default_data_dir(),
            sync_config: SyncConfig::default(),
            ledger_config: LedgerConfig::default(),
            event_config: EventConfig::default(),
            debug_mode: false,
        }
    }
}

/// 默认数据目录 ~/.plateit/
fn get_default_data_dir() -> PathBuf {
    if let Some(home_dir) = std::env::var("HOME").ok().map(PathBuf::from) {
        home_dir.join(".plateit")
    } else if let Some(home_dir) = std::env::var("USERPROFILE").ok().map(PathBuf::from) {
        home_dir.join(".plateit")
    } else {
        PathBuf::from("./plateit_data")
    }
}

impl PlateitConfig {
    pub fn builder() -> PlateitConfigBuilder {
        PlateitConfigBuilder::new()
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(PlateitSDKError::Config("data_dir 不能为空".to_string()));
        }
        for collection in Collection::ALL {
            if self.sync_config.staleness(collection).is_zero() {
                return Err(PlateitSDKError::Config(format!(
                    "{} 节流阈值不能为 0",
                    collection
                )));
            }
        }
        let ledger = &self.ledger_config;
        if ledger.reset_period.is_zero() {
            return Err(PlateitSDKError::Config("reset_period 不能为 0".to_string()));
        }
        if ledger.pro_tier_floor < ledger.free_tier_default {
            return Err(PlateitSDKError::Config(format!(
                "pro_tier_floor ({}) 不能小于 free_tier_default ({})",
                ledger.pro_tier_floor, ledger.free_tier_default
            )));
        }
        if self.event_config.buffer_size == 0 {
            return Err(PlateitSDKError::Config("事件缓冲区大小不能为 0".to_string()));
        }
        Ok(())
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct PlateitConfigBuilder {
    config: PlateitConfig,
}

impl PlateitConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PlateitConfig::default(),
        }
    }

    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.data_dir = path.as_ref().to_path_buf();
        self
    }

    /// 设置某个集合的节流阈值
    pub fn staleness(mut self, collection: Collection, threshold: Duration) -> Self {
        match collection {
            Collection::Pantry => self.config.sync_config.pantry_staleness = threshold,
            Collection::Recommendations => {
                self.config.sync_config.recommendations_staleness = threshold
            }
        }
        self
    }

    pub fn free_tier_default(mut self, balance: u32) -> Self {
        self.config.ledger_config.free_tier_default = balance;
        self
    }

    pub fn pro_tier_floor(mut self, balance: u32) -> Self {
        self.config.ledger_config.pro_tier_floor = balance;
        self
    }

    pub fn reset_period(mut self, period: Duration) -> Self {
        self.config.ledger_config.reset_period = period;
        self
    }

    /// 设置视为 Pro 的权益标识
    pub fn pro_entitlements<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.ledger_config.pro_entitlement_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn any_active_entitlement_is_pro(mut self, enabled: bool) -> Self {
        self.config.ledger_config.any_active_entitlement_is_pro = enabled;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.config.event_config.buffer_size = size;
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.config.debug_mode = enabled;
        self
    }

    pub fn build(self) -> PlateitConfig {
        self.config
    }
}
