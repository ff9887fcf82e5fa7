use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapError {
    #[error("Ошибка конфигурации: {0}")]
    Config(#[from] anyhow::Error),

    #[error("Ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ошибка Accessibility API: {0}")]
    Accessibility(String),

    #[error("Не удалось подписаться на события окон: {0}")]
    Subscription(String),

    #[error("Недостаточно прав доступа: {0}")]
    Permission(String),

    #[error("Сервис недоступен: {0}")]
    ServiceUnavailable(String),

    #[error("Недопустимый переход анимации: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::services::frame_animator::AnimationState,
        to: crate::services::frame_animator::AnimationState,
    },

    #[error("Внутренняя ошибка: {0}")]
    Internal(String),
}

impl SnapError {
    pub fn accessibility<T>(msg: impl Into<String>) -> Result<T> {
        Err(SnapError::Accessibility(msg.into()))
    }
}

pub type Result<T> = std::result::Result<T, SnapError>;

// Удобные макросы для создания ошибок
#[macro_export]
macro_rules! snap_error {
    (accessibility, $($arg:tt)*) => {
        $crate::error::SnapError::Accessibility(format!($($arg)*))
    };
    (subscription, $($arg:tt)*) => {
        $crate::error::SnapError::Subscription(format!($($arg)*))
    };
    (permission, $($arg:tt)*) => {
        $crate::error::SnapError::Permission(format!($($arg)*))
    };
    (service_unavailable, $($arg:tt)*) => {
        $crate::error::SnapError::ServiceUnavailable(format!($($arg)*))
    };
    (internal, $($arg:tt)*) => {
        $crate::error::SnapError::Internal(format!($($arg)*))
    };
}
