//! SDK 版本与构建元信息
//!
//! - SDK 版本来自 Cargo.toml
//! - 数据库版本来自 migrations/ 文件名（refinery 管理）

/// SDK semver，来自 Cargo.toml
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// git commit（vergen 生成；非 git 环境下为 "unknown"）
pub const GIT_SHA: &str = match option_env!("VERGEN_GIT_SHA") {
    Some(sha) => sha,
    None => "unknown",
};

/// 构建时间（vergen 生成）
pub const BUILD_TIME: &str = match option_env!("VERGEN_BUILD_TIMESTAMP") {
    Some(ts) => ts,
    None => "unknown",
};

/// 当前 SDK 支持的最高缓存库 migration 版本，build.rs 扫描 migrations/V{n}__*.sql 得出。
/// 打开用户库时若库内版本更高则拒绝（防止降级后 schema 不兼容）。
pub const SDK_DB_VERSION: i64 = parse_db_version(env!("SDK_DB_VERSION"));

const fn parse_db_version(s: &str) -> i64 {
    let b = s.as_bytes();
    let mut v = 0i64;
    let mut i = 0usize;
    while i < b.len() {
        if b[i] >= b'0' && b[i] <= b'9' {
            v = v * 10 + (b[i] - b'0') as i64;
        }
        i += 1;
    }
    v
}

/// 单行版本描述，用于启动日志
pub fn version_line() -> String {
    format!(
        "plateit-sdk {} (git {}, built {}, db v{})",
        SDK_VERSION, GIT_SHA, BUILD_TIME, SDK_DB_VERSION
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_version_parsed_from_migrations() {
        assert!(SDK_DB_VERSION >= 1);
        assert_eq!(parse_db_version("12"), 12);
        assert!(version_line().contains(SDK_VERSION));
    }
}
