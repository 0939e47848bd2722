use serde::Serialize;

pub const ERROR_NOT_FOUND: i64 = 404;
pub const ERROR_INTERNAL: i64 = -9999;
pub const ERROR_NO_PERMISSION: i64 = -9998;
pub const ERROR_VALIDATION: i64 = -9997;
pub const ERROR_ENCRYPTION_LOCK: i64 = -9996;
pub const ERROR_NETWORK: i64 = -9995;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{message}")]
    Network { code: i64, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Validation(String),

    #[error("Encryption lock error: {0}")]
    EncryptionLock(String),

    #[error("{0}")]
    General(String),
}

impl AppError {
    pub fn remote(code: i64, message: impl Into<String>) -> Self {
        if code == ERROR_NOT_FOUND {
            return Self::NotFound(message.into());
        }
        Self::Network {
            code,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Integer code delivered to subscribers. Zero is reserved for success.
    pub fn error_code(&self) -> i64 {
        match self {
            Self::Network { code, .. } if *code != 0 => *code,
            Self::Network { .. } => ERROR_NETWORK,
            Self::NotFound(_) => ERROR_NOT_FOUND,
            Self::PermissionDenied(_) => ERROR_NO_PERMISSION,
            Self::Validation(_) => ERROR_VALIDATION,
            Self::EncryptionLock(_) => ERROR_ENCRYPTION_LOCK,
            Self::Database(_) | Self::Io(_) | Self::Serde(_) | Self::General(_) => ERROR_INTERNAL,
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
