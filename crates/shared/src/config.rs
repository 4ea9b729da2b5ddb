use crate::errors::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub dynamodb_table: String,
    pub environment: String,
    pub aws_region: String,
    /// ローカル DynamoDB などのエンドポイント上書き
    pub dynamodb_endpoint: Option<String>,
    pub retry_max_attempts: u32,
    pub retry_initial_delay_ms: u64,
    /// カスケード伝播の1バッチあたりの投稿数
    pub cascade_batch_size: usize,
    /// カスケード伝播で同時に処理するバッチ数
    pub cascade_max_concurrency: usize,
    /// 移行チェーンをたどる最大ホップ数
    pub migration_hop_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dynamodb_table: "image-tagging-dev".to_string(),
            environment: "dev".to_string(),
            aws_region: "ap-northeast-1".to_string(),
            dynamodb_endpoint: None,
            retry_max_attempts: 3,
            retry_initial_delay_ms: 100,
            cascade_batch_size: 250,
            cascade_max_concurrency: 8,
            migration_hop_limit: 32,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// 任意の取得関数から設定を読み込む
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();

        Ok(Config {
            dynamodb_table: lookup("DYNAMODB_TABLE").unwrap_or(defaults.dynamodb_table),
            environment: lookup("ENVIRONMENT").unwrap_or(defaults.environment),
            aws_region: lookup("AWS_REGION").unwrap_or(defaults.aws_region),
            dynamodb_endpoint: lookup("DYNAMODB_ENDPOINT").filter(|v| !v.trim().is_empty()),
            retry_max_attempts: positive(
                &lookup,
                "RETRY_MAX_ATTEMPTS",
                defaults.retry_max_attempts,
            )?,
            retry_initial_delay_ms: positive(
                &lookup,
                "RETRY_INITIAL_DELAY_MS",
                defaults.retry_initial_delay_ms,
            )?,
            cascade_batch_size: positive(
                &lookup,
                "CASCADE_BATCH_SIZE",
                defaults.cascade_batch_size,
            )?,
            cascade_max_concurrency: positive(
                &lookup,
                "CASCADE_MAX_CONCURRENCY",
                defaults.cascade_max_concurrency,
            )?,
            migration_hop_limit: positive(
                &lookup,
                "MIGRATION_HOP_LIMIT",
                defaults.migration_hop_limit,
            )?,
        })
    }
}

fn positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, AppError>
where
    T: FromStr + PartialEq + Default,
{
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };

    let value = raw
        .trim()
        .parse::<T>()
        .map_err(|_| AppError::Configuration(format!("{name} must be a number: {raw}")))?;

    if value == T::default() {
        return Err(AppError::Configuration(format!(
            "{name} must be greater than zero"
        )));
    }

    Ok(value)
}
