use thiserror::Error;

/// 分发器错误类型定义
#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("消息 {id} 已被处理为 {resolution}，忽略重复操作")]
    AlreadyResolved { id: String, resolution: String },

    #[error("无效的消息负载: {0}")]
    InvalidPayload(String),

    #[error("消息 {id} 投递次数 {delivery_count} 超过上限 {max}")]
    DeliveryLimitExceeded {
        id: String,
        delivery_count: u32,
        max: u32,
    },

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("计算后端错误: {0}")]
    Backend(String),

    #[error("计算后端调用超时: {operation} ({seconds}s)")]
    BackendTimeout { operation: String, seconds: u64 },

    #[error("Provider初始化失败: {0}")]
    ProviderInit(String),

    #[error("消息队列连接已关闭")]
    QueueClosed,

    #[error("连续 {attempts} 次接收消息失败: {last_error}")]
    ReceiveRetriesExhausted { attempts: u32, last_error: String },

    #[error("连续 {attempts} 次协调失败: {last_error}")]
    ReconcileRetriesExhausted { attempts: u32, last_error: String },

    #[error("网络错误: {0}")]
    Network(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// Whether an error is contained to one message / one pass, or means a
/// shared resource (queue connection, provider) is no longer usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    Local,
    Fatal,
}

impl DispatcherError {
    pub fn scope(&self) -> ErrorScope {
        match self {
            DispatcherError::QueueClosed
            | DispatcherError::ReceiveRetriesExhausted { .. }
            | DispatcherError::ReconcileRetriesExhausted { .. }
            | DispatcherError::ProviderInit(_)
            | DispatcherError::Configuration(_) => ErrorScope::Fatal,
            _ => ErrorScope::Local,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.scope() == ErrorScope::Fatal
    }
}

impl From<serde_json::Error> for DispatcherError {
    fn from(err: serde_json::Error) -> Self {
        DispatcherError::Serialization(err.to_string())
    }
}

/// Failure returned by a queue listener's `receive`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReceiveError {
    /// The transport reported an error; the connection may recover.
    #[error("接收消息失败: {0}")]
    Transport(String),

    /// The consumer stream ended; no further deliveries will arrive.
    #[error("消费者已关闭")]
    Closed,
}

impl From<ReceiveError> for DispatcherError {
    fn from(err: ReceiveError) -> Self {
        match err {
            ReceiveError::Closed => DispatcherError::QueueClosed,
            ReceiveError::Transport(message) => DispatcherError::MessageQueue(message),
        }
    }
}

/// 统一的Result类型
pub type DispatcherResult<T> = std::result::Result<T, DispatcherError>;
