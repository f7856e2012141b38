//! 同步集合 - 每个集合对应一张本地缓存表和一个远端拉取接口

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::storage::entities::{PantryItem, RecommendedVideo};

/// 受同步管理的集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// 食材库
    Pantry,
    /// 推荐视频
    Recommendations,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Pantry, Collection::Recommendations];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pantry => "pantry",
            Self::Recommendations => "recommendations",
        }
    }

    /// 默认节流阈值：距上次成功拉取不超过此时长则不发起被动刷新
    pub fn default_staleness(self) -> Duration {
        match self {
            Self::Pantry => Duration::from_secs(5 * 60),
            Self::Recommendations => Duration::from_secs(30 * 60),
        }
    }
}

impl FromStr for Collection {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pantry" => Ok(Self::Pantry),
            "recommendations" => Ok(Self::Recommendations),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 某个集合的一组缓存行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionRows {
    Pantry(Vec<PantryItem>),
    Recommendations(Vec<RecommendedVideo>),
}

impl CollectionRows {
    pub fn empty(collection: Collection) -> Self {
        match collection {
            Collection::Pantry => Self::Pantry(Vec::new()),
            Collection::Recommendations => Self::Recommendations(Vec::new()),
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            Self::Pantry(_) => Collection::Pantry,
            Self::Recommendations(_) => Collection::Recommendations,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Pantry(rows) => rows.len(),
            Self::Recommendations(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_pantry(&self) -> Option<&[PantryItem]> {
        match self {
            Self::Pantry(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn as_recommendations(&self) -> Option<&[RecommendedVideo]> {
        match self {
            Self::Recommendations(rows) => Some(rows),
            _ => None,
        }
    }
}
