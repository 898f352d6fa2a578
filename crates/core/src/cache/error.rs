use thiserror::Error;

/// # Summary
/// 订阅缓存错误。刷新失败时缓存保留上一份快照，错误只用于上报。
#[derive(Error, Debug)]
pub enum CacheError {
    // 订阅源查询失败
    #[error("Refresh failed: {0}")]
    Refresh(String),
    // 刷新例程已停止
    #[error("Cache closed")]
    Closed,
}
