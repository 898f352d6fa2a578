use thiserror::Error;

/// # Summary
/// 持久化存储错误枚举，覆盖订阅源与执行状态库的访问失败。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
#[derive(Error, Debug)]
pub enum StoreError {
    /// 数据库操作失败
    #[error("Database error: {0}")]
    Database(String),
    /// 记录未找到
    #[error("Not found")]
    NotFound,
    /// 存储中的数据无法解析为领域实体
    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
    /// 初始化存储失败
    #[error("Initialization error: {0}")]
    InitError(String),
}
