//! 远端网关（由宿主应用实现）
//!
//! 每个集合一个拉取接口；失败以 [`GatewayError`] 返回，不存在部分结果。

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::storage::entities::{NewPantryItem, RecommendedVideo, RemotePantryItem};

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// 拉取用户的全部食材
    async fn fetch_pantry_items(&self, user_id: &str) -> GatewayResult<Vec<RemotePantryItem>>;

    /// 拉取用户的推荐视频（服务端顺序）
    async fn fetch_recommendations(&self, user_id: &str) -> GatewayResult<Vec<RecommendedVideo>>;

    /// 新增食材，返回服务端保存后的条目
    async fn add_pantry_item(
        &self,
        user_id: &str,
        item: &NewPantryItem,
    ) -> GatewayResult<RemotePantryItem>;

    /// 按服务端 id 删除食材
    async fn delete_pantry_item(&self, user_id: &str, remote_id: i64) -> GatewayResult<()>;
}
