//! 测试用购买服务商与账本夹具

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::LedgerConfig;
use crate::events::EventManager;
use crate::storage::KvStore;
use crate::utils::time::ManualClock;

use super::entitlement::{
    EntitlementSnapshot, ProviderError, PurchaseProvider, PurchaseResult,
};
use super::TokenLedger;

pub(crate) const START: i64 = 1_700_000_000_000;

pub(crate) struct FakeProvider {
    snapshot: Mutex<Result<EntitlementSnapshot, ProviderError>>,
    purchase: Mutex<Result<PurchaseResult, ProviderError>>,
    gate: Mutex<Option<Arc<Notify>>>,
    calls: AtomicUsize,
}

impl FakeProvider {
    fn with(snapshot: EntitlementSnapshot) -> Arc<Self> {
        Arc::new(Self {
            snapshot: Mutex::new(Ok(snapshot)),
            purchase: Mutex::new(Ok(PurchaseResult::Cancelled)),
            gate: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn free() -> Arc<Self> {
        Self::with(EntitlementSnapshot::free())
    }

    pub fn pro() -> Arc<Self> {
        Self::with(EntitlementSnapshot::with_active("PlateIt Pro"))
    }

    pub fn set_pro(&self, pro: bool) {
        *self.snapshot.lock() = Ok(if pro {
            EntitlementSnapshot::with_active("PlateIt Pro")
        } else {
            EntitlementSnapshot::free()
        });
    }

    pub fn fail(&self) {
        *self.snapshot.lock() = Err(ProviderError::Network("offline".to_string()));
    }

    pub fn set_purchase(&self, result: Result<PurchaseResult, ProviderError>) {
        *self.purchase.lock() = result;
    }

    /// 之后的权益查询阻塞到返回的 Notify 被唤醒
    pub fn block(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock() = Some(notify.clone());
        notify
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PurchaseProvider for FakeProvider {
    async fn get_current_entitlement(&self) -> Result<EntitlementSnapshot, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.snapshot.lock().clone()
    }

    async fn purchase(&self, _product_id: &str) -> Result<PurchaseResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.purchase.lock().clone()
    }

    async fn restore(&self) -> Result<EntitlementSnapshot, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.snapshot.lock().clone()
    }
}

pub(crate) struct LedgerFixture {
    _dir: TempDir,
    pub ledger: TokenLedger,
    pub clock: Arc<ManualClock>,
    pub events: Arc<EventManager>,
    pub session: CancellationToken,
}

impl LedgerFixture {
    pub async fn new(provider: Arc<FakeProvider>) -> Self {
        let dir = TempDir::new().unwrap();
        let kv = Arc::new(KvStore::open(dir.path(), "u1").await.unwrap());
        let clock = ManualClock::new(START);
        let events = Arc::new(EventManager::new(64));
        let session = CancellationToken::new();
        let ledger = TokenLedger::new(
            kv,
            LedgerConfig::default(),
            clock.clone(),
            provider,
            events.clone(),
            session.clone(),
        );
        Self {
            _dir: dir,
            ledger,
            clock,
            events,
            session,
        }
    }
}
