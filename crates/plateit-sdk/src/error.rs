use std::fmt;
use rusqlite;

/// 远端网关错误（无部分结果语义：要么整批成功，要么失败）
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("网络不可用: {0}")]
    Unavailable(String),

    #[error("请求超时: {0}")]
    Timeout(String),

    #[error("服务端拒绝请求 [{status}]: {message}")]
    Rejected { status: u16, message: String },

    #[error("响应解析失败: {0}")]
    Decode(String),
}

impl GatewayError {
    /// 是否为瞬时错误（下一次节流窗口或强制刷新可重试）
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Unavailable(_) | GatewayError::Timeout(_) => true,
            GatewayError::Rejected { status, .. } => *status >= 500 || *status == 429,
            GatewayError::Decode(_) => false,
        }
    }
}

#[derive(Debug)]
pub enum PlateitSDKError {
    SqliteError(rusqlite::Error),
    JsonError(String),
    InvalidArgument(String),
    NotFound(String),
    Other(String),
    KvStore(String),
    Serialization(String),
    IO(String),
    Database(String),
    Migration(String),
    // 远端与购买服务
    Gateway(GatewayError),
    Entitlement(String),
    // 账本
    InsufficientBalance { balance: u32, cost: u32 },
    // 会话与生命周期
    NotLoggedIn,
    Config(String),         // 配置错误
    NotInitialized(String), // 未初始化错误
    ShuttingDown(String),   // 正在关闭错误
    Cancelled(String),      // 任务被取消（登出或视图销毁）
}

impl fmt::Display for PlateitSDKError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlateitSDKError::SqliteError(e) => write!(f, "SQLite error: {}", e),
            PlateitSDKError::JsonError(e) => write!(f, "JSON error: {}", e),
            PlateitSDKError::InvalidArgument(e) => write!(f, "Invalid argument: {}", e),
            PlateitSDKError::NotFound(e) => write!(f, "Not found: {}", e),
            PlateitSDKError::Other(e) => write!(f, "Other error: {}", e),
            PlateitSDKError::KvStore(e) => write!(f, "KV store error: {}", e),
            PlateitSDKError::Serialization(e) => write!(f, "Serialization error: {}", e),
            PlateitSDKError::IO(e) => write!(f, "IO error: {}", e),
            PlateitSDKError::Database(e) => write!(f, "Database error: {}", e),
            PlateitSDKError::Migration(e) => write!(f, "Migration error: {}", e),
            PlateitSDKError::Gateway(e) => write!(f, "Gateway error: {}", e),
            PlateitSDKError::Entitlement(e) => write!(f, "Entitlement error: {}", e),
            PlateitSDKError::InsufficientBalance { balance, cost } => {
                write!(f, "Insufficient balance: have {}, need {}", balance, cost)
            }
            PlateitSDKError::NotLoggedIn => write!(f, "Not logged in"),
            PlateitSDKError::Config(e) => write!(f, "Config error: {}", e),
            PlateitSDKError::NotInitialized(e) => write!(f, "Not initialized: {}", e),
            PlateitSDKError::ShuttingDown(e) => write!(f, "Shutting down: {}", e),
            PlateitSDKError::Cancelled(e) => write!(f, "Cancelled: {}", e),
        }
    }
}

impl std::error::Error for PlateitSDKError {}

impl From<rusqlite::Error> for PlateitSDKError {
    fn from(error: rusqlite::Error) -> Self {
        PlateitSDKError::SqliteError(error)
    }
}

impl From<serde_json::Error> for PlateitSDKError {
    fn from(error: serde_json::Error) -> Self {
        PlateitSDKError::JsonError(error.to_string())
    }
}

impl From<std::io::Error> for PlateitSDKError {
    fn from(error: std::io::Error) -> Self {
        PlateitSDKError::IO(error.to_string())
    }
}

impl From<GatewayError> for PlateitSDKError {
    fn from(error: GatewayError) -> Self {
        PlateitSDKError::Gateway(error)
    }
}

impl PlateitSDKError {
    /// 视图层可重试的错误（展示可恢复提示，而非致命错误）
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PlateitSDKError::Gateway(_)
                | PlateitSDKError::Cancelled(_)
                | PlateitSDKError::InsufficientBalance { .. }
        )
    }

    /// 是否为余额不足（应路由到付费墙，而非报错）
    pub fn is_insufficient_balance(&self) -> bool {
        matches!(self, PlateitSDKError::InsufficientBalance { .. })
    }
}

pub type Result<T> = std::result::Result<T, PlateitSDKError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_error_transient_classification() {
        assert!(GatewayError::Timeout("5s".into()).is_transient());
        assert!(GatewayError::Rejected { status: 503, message: "busy".into() }.is_transient());
        assert!(!GatewayError::Rejected { status: 404, message: "gone".into() }.is_transient());
        assert!(!GatewayError::Decode("bad json".into()).is_transient());
    }

    #[test]
    fn recoverable_errors() {
        let err: PlateitSDKError = GatewayError::Unavailable("offline".into()).into();
        assert!(err.is_recoverable());
        assert!(PlateitSDKError::InsufficientBalance { balance: 1, cost: 2 }.is_insufficient_balance());
        assert!(!PlateitSDKError::Database("disk full".into()).is_recoverable());
    }
}
