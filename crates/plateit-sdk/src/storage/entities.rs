//! 本地缓存实体

use serde::{Deserialize, Serialize};

use crate::utils::time::parse_backend_timestamp;

/// 食材库条目（缓存行）
///
/// `id` 为本地自增主键，`remote_id` 为服务端 id（乐观插入尚未确认时为空）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PantryItem {
    pub id: i64,
    pub remote_id: Option<i64>,
    pub name: String,
    pub amount: String,
    pub image_url: Option<String>,
    /// 加入时间（毫秒），列表按此倒序
    pub added_at: i64,
    /// 服务端原始 created_at
    pub created_at: Option<String>,
}

/// 新增食材请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPantryItem {
    pub name: String,
    pub amount: String,
    pub image_url: Option<String>,
}

impl NewPantryItem {
    pub fn new(name: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            amount: amount.into(),
            image_url: None,
        }
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }
}

/// 服务端返回的食材条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePantryItem {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl RemotePantryItem {
    /// 转换为缓存行；created_at 无法解析时回退到拉取时间
    pub fn into_cached(self, fetched_at: i64) -> PantryItem {
        let added_at = self
            .created_at
            .as_deref()
            .and_then(parse_backend_timestamp)
            .unwrap_or(fetched_at);
        PantryItem {
            id: 0,
            remote_id: Some(self.id),
            name: self.name,
            amount: self.amount,
            image_url: self.image_url,
            added_at,
            created_at: self.created_at,
        }
    }
}

/// 推荐视频（缓存行，没有稳定的服务端 id，保持服务端顺序）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendedVideo {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    /// 播放量文案，例如 "1.2M views"
    #[serde(default)]
    pub views: Option<String>,
    /// 时长文案，例如 "12:34"
    #[serde(default)]
    pub length: Option<String>,
}
