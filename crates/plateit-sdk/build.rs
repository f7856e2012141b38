//! 编译期生成构建元信息（vergen），并扫描 migrations/ 得到 SDK_DB_VERSION

use std::env;
use std::fs;
use std::path::Path;
use vergen::EmitBuilder;

fn main() {
    let _ = EmitBuilder::builder()
        .build_timestamp()
        .git_sha(false)
        .emit();

    let manifest_dir = env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR");
    let migrations_dir = Path::new(&manifest_dir).join("migrations");

    // refinery 文件名格式: V{version}__{name}.sql
    let max_version = fs::read_dir(&migrations_dir)
        .map(|entries| {
            entries
                .flatten()
                .filter_map(|entry| entry.file_name().to_str().and_then(migration_version))
                .max()
                .unwrap_or(0)
        })
        .unwrap_or(0);

    println!("cargo:rustc-env=SDK_DB_VERSION={}", max_version);
    println!("cargo:rerun-if-changed=migrations/");
}

fn migration_version(file_name: &str) -> Option<i64> {
    let rest = file_name.strip_prefix('V')?.strip_suffix(".sql")?;
    rest.split("__").next()?.parse().ok()
}
