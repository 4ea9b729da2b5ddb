use domain::{DomainErrors, ErrorKind, EventCodecError};
use std::time::Duration;
use thiserror::Error;

/// アプリケーション全体で使用される包括的なエラー型
#[derive(Debug, Clone, Error)]
pub enum AppError {
    // ドメインエラー
    #[error("Domain error: {0}")]
    Domain(#[from] DomainErrors),

    /// 期待したバージョンとストリームの現在バージョンが一致しない
    #[error("Version conflict on stream {stream_id}: expected version {expected}")]
    VersionConflict { stream_id: String, expected: u64 },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    // インフラストラクチャエラー
    #[error("DynamoDB error: {0}")]
    DynamoDb(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // システムエラー
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// 壊れた不変条件（移行チェーンのホップ上限超過、破損した保存データなど）
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// エラーの分類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    /// クライアントエラー（4xx相当）
    Client,
    /// サーバーエラー（5xx相当）
    Server,
    /// 一時的なエラー（リトライ可能）
    Transient,
    /// 永続的なエラー（リトライ不可）
    Permanent,
}

/// エラーの重要度
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// リトライ戦略
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    /// 最大試行回数
    pub max_attempts: u32,
    /// 初期遅延時間
    pub initial_delay: Duration,
    /// 最大遅延時間
    pub max_delay: Duration,
    /// バックオフ倍率
    pub backoff_multiplier: f64,
    /// ジッター追加フラグ
    pub add_jitter: bool,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

/// エラーメタデータ
#[derive(Debug, Clone)]
pub struct ErrorMetadata {
    pub code: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub retryable: bool,
    pub retry_strategy: Option<RetryStrategy>,
}

impl ErrorMetadata {
    fn permanent(code: &str, category: ErrorCategory, severity: ErrorSeverity) -> Self {
        Self {
            code: code.to_string(),
            category,
            severity,
            retryable: false,
            retry_strategy: None,
        }
    }

    fn transient(code: &str, severity: ErrorSeverity, strategy: RetryStrategy) -> Self {
        Self {
            code: code.to_string(),
            category: ErrorCategory::Transient,
            severity,
            retryable: true,
            retry_strategy: Some(strategy),
        }
    }
}

impl AppError {
    /// エラーメタデータを取得
    pub fn metadata(&self) -> ErrorMetadata {
        match self {
            AppError::Domain(_) => {
                ErrorMetadata::permanent("DOMAIN_ERROR", ErrorCategory::Client, ErrorSeverity::Info)
            }

            AppError::VersionConflict { .. } => ErrorMetadata::transient(
                "VERSION_CONFLICT",
                ErrorSeverity::Warning,
                RetryStrategy {
                    max_attempts: 5,
                    initial_delay: Duration::from_millis(50),
                    max_delay: Duration::from_secs(5),
                    backoff_multiplier: 1.5,
                    add_jitter: true,
                },
            ),

            AppError::NotFound(_) => {
                ErrorMetadata::permanent("NOT_FOUND", ErrorCategory::Client, ErrorSeverity::Info)
            }

            AppError::AlreadyExists(_) => ErrorMetadata::permanent(
                "ALREADY_EXISTS",
                ErrorCategory::Client,
                ErrorSeverity::Info,
            ),

            AppError::DynamoDb(msg) => {
                if is_dynamodb_retryable(msg) {
                    ErrorMetadata::transient(
                        "DYNAMODB_ERROR",
                        ErrorSeverity::Error,
                        RetryStrategy::default(),
                    )
                } else {
                    ErrorMetadata::permanent(
                        "DYNAMODB_ERROR",
                        ErrorCategory::Server,
                        ErrorSeverity::Error,
                    )
                }
            }

            AppError::ServiceUnavailable(_) => ErrorMetadata::transient(
                "SERVICE_UNAVAILABLE",
                ErrorSeverity::Error,
                RetryStrategy::default(),
            ),

            AppError::Serialization(_) | AppError::Deserialization(_) => ErrorMetadata::permanent(
                "SERIALIZATION_ERROR",
                ErrorCategory::Server,
                ErrorSeverity::Error,
            ),

            AppError::Configuration(_) => ErrorMetadata::permanent(
                "CONFIGURATION_ERROR",
                ErrorCategory::Permanent,
                ErrorSeverity::Critical,
            ),

            AppError::Cancelled(_) => {
                ErrorMetadata::permanent("CANCELLED", ErrorCategory::Client, ErrorSeverity::Info)
            }

            AppError::InvariantViolation(_) => ErrorMetadata::permanent(
                "INVARIANT_VIOLATION",
                ErrorCategory::Permanent,
                ErrorSeverity::Critical,
            ),

            AppError::Internal(_) => ErrorMetadata::permanent(
                "INTERNAL_ERROR",
                ErrorCategory::Server,
                ErrorSeverity::Critical,
            ),
        }
    }

    /// ドメインのエラー種別に対応付ける
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Domain(errors) => errors.first().kind(),
            AppError::VersionConflict { .. } | AppError::AlreadyExists(_) => ErrorKind::Conflict,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::DynamoDb(_) | AppError::ServiceUnavailable(_) => ErrorKind::ExternalService,
            AppError::Serialization(_)
            | AppError::Deserialization(_)
            | AppError::Configuration(_)
            | AppError::Cancelled(_)
            | AppError::InvariantViolation(_)
            | AppError::Internal(_) => ErrorKind::Failure,
        }
    }

    /// ドメインエラーに指定のコードが含まれるか
    pub fn has_domain_code(&self, code: &str) -> bool {
        matches!(self, AppError::Domain(errors) if errors.contains_code(code))
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, AppError::VersionConflict { .. })
    }

    /// 処理を止めるべき致命的なエラーか
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::InvariantViolation(_))
    }
}

impl From<domain::DomainError> for AppError {
    fn from(error: domain::DomainError) -> Self {
        AppError::Domain(error.into())
    }
}

impl From<EventCodecError> for AppError {
    fn from(error: EventCodecError) -> Self {
        match error {
            EventCodecError::Serialization(msg) => AppError::Serialization(msg),
            other => AppError::Deserialization(other.to_string()),
        }
    }
}

/// DynamoDBエラーがリトライ可能かどうかを判定
fn is_dynamodb_retryable(error_message: &str) -> bool {
    let retryable_errors = [
        "ThrottlingException",
        "ProvisionedThroughputExceededException",
        "ServiceUnavailable",
        "InternalServerError",
        "RequestLimitExceeded",
        "TransactionConflict",
    ];

    retryable_errors
        .iter()
        .any(|&err| error_message.contains(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::DomainError;

    #[test]
    fn test_error_metadata() {
        let error = AppError::NotFound("post".to_string());
        let metadata = error.metadata();

        assert_eq!(metadata.code, "NOT_FOUND");
        assert_eq!(metadata.category, ErrorCategory::Client);
        assert!(!metadata.retryable);
    }

    #[test]
    fn test_version_conflict_retryable() {
        let error = AppError::VersionConflict {
            stream_id: "image-post-1".to_string(),
            expected: 3,
        };
        let metadata = error.metadata();

        assert_eq!(metadata.code, "VERSION_CONFLICT");
        assert_eq!(metadata.category, ErrorCategory::Transient);
        assert!(metadata.retryable);
        assert!(metadata.retry_strategy.is_some());
        assert_eq!(error.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_domain_error_kind() {
        let error: AppError = DomainError::business_rule("ImagePost.Tag.NotFound", "missing").into();
        assert_eq!(error.kind(), ErrorKind::BusinessRule);
        assert!(error.has_domain_code("ImagePost.Tag.NotFound"));
        assert!(!error.metadata().retryable);
    }

    #[test]
    fn test_invariant_violation_is_fatal() {
        let error = AppError::InvariantViolation("hop limit".to_string());
        assert!(error.is_fatal());
        assert_eq!(error.metadata().severity, ErrorSeverity::Critical);
        assert_eq!(error.kind(), ErrorKind::Failure);
    }

    #[test]
    fn test_event_codec_error_conversion() {
        let error: AppError = EventCodecError::UnknownEventType("x".to_string()).into();
        assert!(matches!(error, AppError::Deserialization(_)));
    }

    #[test]
    fn test_dynamodb_retryable_detection() {
        assert!(is_dynamodb_retryable("ThrottlingException: Rate exceeded"));
        assert!(is_dynamodb_retryable("ServiceUnavailable"));
        assert!(!is_dynamodb_retryable("ValidationException: Invalid input"));
        assert!(!is_dynamodb_retryable("ConditionalCheckFailedException"));
    }
}
