//! 测试用远端：计数调用次数，可设置失败或阻塞，食材增删作用在内存"服务端"

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::GatewayError;
use crate::storage::entities::{NewPantryItem, RecommendedVideo, RemotePantryItem};

use super::gateway::{GatewayResult, RemoteGateway};
use super::Collection;

#[derive(Default)]
pub(crate) struct FakeGateway {
    pub pantry: Mutex<Vec<RemotePantryItem>>,
    pub videos: Mutex<Vec<RecommendedVideo>>,
    /// 拉取失败
    pub fail: Mutex<Option<GatewayError>>,
    /// 增删失败
    pub mutation_fail: Mutex<Option<GatewayError>>,
    pub gate: Mutex<Option<Arc<Notify>>>,
    pub pantry_calls: AtomicUsize,
    pub video_calls: AtomicUsize,
    pub add_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    next_id: AtomicI64,
}

impl FakeGateway {
    pub fn calls(&self, collection: Collection) -> usize {
        match collection {
            Collection::Pantry => self.pantry_calls.load(Ordering::SeqCst),
            Collection::Recommendations => self.video_calls.load(Ordering::SeqCst),
        }
    }

    async fn maybe_block(&self) {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl RemoteGateway for FakeGateway {
    async fn fetch_pantry_items(&self, _user_id: &str) -> GatewayResult<Vec<RemotePantryItem>> {
        self.pantry_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_block().await;
        if let Some(e) = self.fail.lock().clone() {
            return Err(e);
        }
        Ok(self.pantry.lock().clone())
    }

    async fn fetch_recommendations(&self, _user_id: &str) -> GatewayResult<Vec<RecommendedVideo>> {
        self.video_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_block().await;
        if let Some(e) = self.fail.lock().clone() {
            return Err(e);
        }
        Ok(self.videos.lock().clone())
    }

    async fn add_pantry_item(
        &self,
        _user_id: &str,
        item: &NewPantryItem,
    ) -> GatewayResult<RemotePantryItem> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.mutation_fail.lock().clone() {
            return Err(e);
        }
        let id = 1000 + self.next_id.fetch_add(1, Ordering::SeqCst);
        let remote = RemotePantryItem {
            id,
            name: item.name.clone(),
            amount: item.amount.clone(),
            image_url: item.image_url.clone(),
            created_at: Some(format!("2024-03-01T12:00:{:02}", id % 60)),
        };
        self.pantry.lock().push(remote.clone());
        Ok(remote)
    }

    async fn delete_pantry_item(&self, _user_id: &str, remote_id: i64) -> GatewayResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.mutation_fail.lock().clone() {
            return Err(e);
        }
        let mut pantry = self.pantry.lock();
        let before = pantry.len();
        pantry.retain(|item| item.id != remote_id);
        if pantry.len() == before {
            return Err(GatewayError::Rejected {
                status: 404,
                message: format!("pantry item {} not found", remote_id),
            });
        }
        Ok(())
    }
}
