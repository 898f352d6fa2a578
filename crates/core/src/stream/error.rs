use thiserror::Error;

/// # Summary
/// 信号流访问错误。
#[derive(Error, Debug)]
pub enum StreamError {
    /// 流暂时不可用（连接断开、broker 不可达等），可退避重试
    #[error("Stream unavailable: {0}")]
    Unavailable(String),
    /// 读位置提交失败
    #[error("Commit failed: {0}")]
    Commit(String),
    /// 读位置回退失败
    #[error("Seek failed: {0}")]
    Seek(String),
    /// 流已永久关闭，消费循环应当退出
    #[error("Stream closed")]
    Closed,
}
