use crate::image_post_service::{ImagePostService, MigrationOutcome};
use domain::{PostId, TagData, TagMigrated};
use futures::stream::StreamExt;
use infrastructure::PostTagIndex;
use shared::{AppError, Config};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// カスケード伝播のバッチ設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeConfig {
    pub batch_size: usize,
    pub max_concurrency: usize,
}

impl CascadeConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.cascade_batch_size.max(1),
            max_concurrency: config.cascade_max_concurrency.max(1),
        }
    }
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// 1バッチ内で書き換えに失敗した投稿
#[derive(Debug, Clone)]
pub struct BatchFailure {
    /// 0 始まりのバッチ番号
    pub batch: usize,
    pub failures: Vec<(PostId, AppError)>,
}

/// カスケード伝播の結果
///
/// 失敗した投稿は移行元タグのインデックスに残るので、同じ移行で再実行すれば
/// 残りの投稿だけが処理される。
#[derive(Debug, Clone)]
pub struct CascadeReport {
    pub source: TagData,
    pub target: TagData,
    /// 書き換えた投稿数
    pub rewritten: usize,
    /// 既に移行元を持っておらず、インデックスだけを直した投稿数
    pub repaired: usize,
    pub failed_batches: Vec<BatchFailure>,
    /// 投稿の列挙自体が失敗した場合のエラー
    pub enumeration_error: Option<AppError>,
    pub cancelled: bool,
}

impl CascadeReport {
    fn new(migration: &TagMigrated) -> Self {
        Self {
            source: migration.source_tag.clone(),
            target: migration.target_tag.clone(),
            rewritten: 0,
            repaired: 0,
            failed_batches: Vec::new(),
            enumeration_error: None,
            cancelled: false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed_batches.is_empty() && self.enumeration_error.is_none() && !self.cancelled
    }

    pub fn failed_post_ids(&self) -> Vec<PostId> {
        self.failed_batches
            .iter()
            .flat_map(|batch| batch.failures.iter().map(|(post_id, _)| *post_id))
            .collect()
    }

    fn record(&mut self, outcome: BatchOutcome) {
        self.rewritten += outcome.rewritten;
        self.repaired += outcome.repaired;
        if !outcome.failures.is_empty() {
            self.failed_batches.push(BatchFailure {
                batch: outcome.batch,
                failures: outcome.failures,
            });
        }
        if self.enumeration_error.is_none() {
            self.enumeration_error = outcome.enumeration_error;
        }
    }
}

struct BatchOutcome {
    batch: usize,
    rewritten: usize,
    repaired: usize,
    failures: Vec<(PostId, AppError)>,
    enumeration_error: Option<AppError>,
}

/// タグ移行を移行元タグを持つすべての投稿へ伝播する
#[derive(Clone)]
pub struct CascadePropagator {
    index: Arc<dyn PostTagIndex>,
    posts: ImagePostService,
    config: CascadeConfig,
}

impl CascadePropagator {
    pub fn new(index: Arc<dyn PostTagIndex>, posts: ImagePostService, config: CascadeConfig) -> Self {
        Self {
            index,
            posts,
            config,
        }
    }

    pub fn config(&self) -> CascadeConfig {
        self.config
    }

    /// 移行元タグを持つ投稿を列挙し、バッチごとに移行イベントを追記する
    ///
    /// 列挙は常に現在の読み取りモデルに対して行う。キャンセルされると新しい
    /// バッチの発行を止めるが、コミット済みのバッチはそのまま残る。
    /// 追記後にインデックスへ反映できなかった投稿は、再実行時に修復される。
    pub async fn propagate(
        &self,
        migration: &TagMigrated,
        cancel: &CancellationToken,
    ) -> CascadeReport {
        let mut report = CascadeReport::new(migration);

        info!(
            source_tag = %migration.source_tag,
            target_tag = %migration.target_tag,
            batch_size = self.config.batch_size,
            max_concurrency = self.config.max_concurrency,
            "カスケード伝播開始"
        );

        let batches = self
            .index
            .stream_post_ids_with_tag(&migration.source_tag)
            .chunks(self.config.batch_size)
            .enumerate()
            .map(|(batch, ids)| self.process_batch(batch, ids, migration))
            .buffer_unordered(self.config.max_concurrency);
        tokio::pin!(batches);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(source_tag = %migration.source_tag, "カスケード伝播がキャンセルされた");
                    report.cancelled = true;
                    break;
                }
                next = batches.next() => match next {
                    Some(outcome) => report.record(outcome),
                    None => break,
                },
            }
        }

        info!(
            source_tag = %migration.source_tag,
            rewritten = report.rewritten,
            repaired = report.repaired,
            failed_batches = report.failed_batches.len(),
            cancelled = report.cancelled,
            "カスケード伝播終了"
        );
        report
    }

    async fn process_batch(
        &self,
        batch: usize,
        ids: Vec<Result<PostId, AppError>>,
        migration: &TagMigrated,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome {
            batch,
            rewritten: 0,
            repaired: 0,
            failures: Vec::new(),
            enumeration_error: None,
        };

        for id in ids {
            let post_id = match id {
                Ok(post_id) => post_id,
                Err(e) => {
                    error!(batch, error = %e, "投稿の列挙に失敗");
                    outcome.enumeration_error.get_or_insert(e);
                    continue;
                }
            };

            match self.posts.apply_migration(post_id, migration).await {
                Ok(MigrationOutcome::Rewritten) => outcome.rewritten += 1,
                Ok(MigrationOutcome::Repaired) => outcome.repaired += 1,
                Err(e) => {
                    warn!(batch, post_id = %post_id, error = %e, "投稿の書き換えに失敗");
                    outcome.failures.push((post_id, e));
                }
            }
        }

        debug!(
            batch,
            rewritten = outcome.rewritten,
            repaired = outcome.repaired,
            failed = outcome.failures.len(),
            "バッチ処理完了"
        );
        outcome
    }
}
