use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::errors::{AppError, RetryStrategy};

/// リトライ実行結果
#[derive(Debug)]
pub enum RetryResult<T> {
    /// 成功
    Success(T),
    /// 最大試行回数に達して失敗
    MaxAttemptsReached(AppError),
    /// リトライ不可能なエラーで失敗
    NonRetryable(AppError),
}

impl<T> RetryResult<T> {
    /// 最後のエラーをそのまま返す Result に変換
    pub fn into_result(self) -> Result<T, AppError> {
        match self {
            RetryResult::Success(value) => Ok(value),
            RetryResult::MaxAttemptsReached(error) | RetryResult::NonRetryable(error) => Err(error),
        }
    }
}

/// リトライ実行器
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    strategy: RetryStrategy,
}

impl RetryExecutor {
    pub fn new(strategy: RetryStrategy) -> Self {
        Self { strategy }
    }

    /// 設定値の試行回数と初期遅延で作成
    pub fn from_config(config: &Config) -> Self {
        Self::exponential_backoff(
            config.retry_max_attempts,
            Duration::from_millis(config.retry_initial_delay_ms),
        )
    }

    /// 指数バックオフ設定でリトライ実行器を作成
    pub fn exponential_backoff(max_attempts: u32, initial_delay: Duration) -> Self {
        Self::new(RetryStrategy {
            max_attempts,
            initial_delay,
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            add_jitter: true,
        })
    }

    /// 固定間隔設定でリトライ実行器を作成
    pub fn fixed_interval(max_attempts: u32, interval: Duration) -> Self {
        Self::new(RetryStrategy {
            max_attempts,
            initial_delay: interval,
            max_delay: interval,
            backoff_multiplier: 1.0,
            add_jitter: false,
        })
    }

    pub fn strategy(&self) -> &RetryStrategy {
        &self.strategy
    }

    /// 操作をリトライ付きで実行（メタデータでリトライ可能なエラーのみ再試行）
    pub async fn execute<F, Fut, T>(&self, operation: F) -> RetryResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        self.execute_when(operation, |error| error.metadata().retryable)
            .await
    }

    /// 判定関数が true を返すエラーのみ再試行する
    pub async fn execute_when<F, Fut, T, P>(&self, operation: F, should_retry: P) -> RetryResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
        P: Fn(&AppError) -> bool,
    {
        let mut attempt = 1;

        loop {
            debug!(
                attempt,
                max_attempts = self.strategy.max_attempts,
                "Executing operation"
            );

            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retries");
                    }
                    return RetryResult::Success(result);
                }
                Err(error) => {
                    if !should_retry(&error) {
                        warn!(error = %error, "Non-retryable error encountered");
                        return RetryResult::NonRetryable(error);
                    }

                    if attempt >= self.strategy.max_attempts {
                        error!(
                            max_attempts = self.strategy.max_attempts,
                            error = %error,
                            "Max attempts reached, giving up"
                        );
                        return RetryResult::MaxAttemptsReached(error);
                    }

                    let delay = self.calculate_delay(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.strategy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Operation failed, retrying"
                    );

                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// 遅延時間を計算
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = if self.strategy.backoff_multiplier == 1.0 {
            self.strategy.initial_delay
        } else {
            let multiplier = self.strategy.backoff_multiplier.powi((attempt - 1) as i32);
            Duration::from_millis(
                (self.strategy.initial_delay.as_millis() as f64 * multiplier) as u64,
            )
        };

        let delay = std::cmp::min(base_delay, self.strategy.max_delay);

        if self.strategy.add_jitter {
            add_jitter(delay)
        } else {
            delay
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryStrategy::default())
    }
}

/// ジッターを追加（±25%のランダム変動）
fn add_jitter(delay: Duration) -> Duration {
    let jitter_factor = rand::thread_rng().gen_range(0.75..=1.25);
    Duration::from_millis((delay.as_millis() as f64 * jitter_factor) as u64)
}

/// DynamoDB操作専用のリトライ実行器
pub struct DynamoDbRetryExecutor;

impl DynamoDbRetryExecutor {
    /// DynamoDB操作をリトライ付きで実行
    pub async fn execute<F, Fut, T>(operation: F) -> RetryResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let strategy = RetryStrategy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: true,
        };

        // バージョン競合は呼び出し側で読み直しが必要なのでここでは再試行しない
        RetryExecutor::new(strategy)
            .execute_when(operation, |error| {
                error.metadata().retryable && !error.is_version_conflict()
            })
            .await
    }
}

/// 楽観的ロック専用のリトライ実行器
///
/// 読み込み・判定・追記をまとめた操作を、バージョン競合の間だけ再実行する。
#[derive(Debug, Clone)]
pub struct OptimisticLockRetryExecutor {
    inner: RetryExecutor,
}

impl OptimisticLockRetryExecutor {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            inner: RetryExecutor::new(RetryStrategy {
                max_attempts,
                initial_delay,
                max_delay: Duration::from_secs(5),
                backoff_multiplier: 1.5,
                add_jitter: true,
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.retry_max_attempts,
            Duration::from_millis(config.retry_initial_delay_ms),
        )
    }

    /// 楽観的ロック操作をリトライ付きで実行
    pub async fn execute<F, Fut, T>(&self, operation: F) -> RetryResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        self.inner
            .execute_when(operation, AppError::is_version_conflict)
            .await
    }
}

impl Default for OptimisticLockRetryExecutor {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(50))
    }
}
