use crate::tag_resolver::TagResolver;
use domain::{
    AggregateRoot, DomainError, DomainResult, HistoryEntry, ImagePost, ImagePostEvent, PostId,
    PostStatus, TagData, TagMigrated, Uncommitted, UserId,
};
use infrastructure::{EventSourcedRepository, PostTagIndex, TagIndexChange};
use shared::{AppError, OptimisticLockRetryExecutor};
use std::sync::Arc;
use tracing::{debug, error, info};

/// 1投稿への移行の適用結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// 移行イベントを追記した
    Rewritten,
    /// 投稿は既に移行元を持っておらず、インデックスだけを現在の状態に合わせた
    Repaired,
}

/// 投稿に対するコマンドの実行
///
/// 読み込み・判定・追記を1単位として、バージョン競合の間だけ再実行する。
/// 追記に成功したらタグの差分を読み取りモデルへ反映する。
#[derive(Clone)]
pub struct ImagePostService {
    repository: EventSourcedRepository<ImagePost>,
    index: Arc<dyn PostTagIndex>,
    resolver: TagResolver,
    retry: OptimisticLockRetryExecutor,
}

impl ImagePostService {
    pub fn new(
        repository: EventSourcedRepository<ImagePost>,
        index: Arc<dyn PostTagIndex>,
        resolver: TagResolver,
        retry: OptimisticLockRetryExecutor,
    ) -> Self {
        Self {
            repository,
            index,
            resolver,
            retry,
        }
    }

    /// 投稿を作成（タグは移行を解決してから検証する）
    pub async fn create(
        &self,
        title: &str,
        tags: &[TagData],
        created_by: &UserId,
    ) -> Result<ImagePost, AppError> {
        let tags = self.resolver.resolve_all(tags).await?;
        let events = ImagePost::create(PostId::new(), title, &tags, created_by)?;

        let created = self
            .repository
            .save(Uncommitted::new(ImagePost::default()).record(events))
            .await?;
        self.project(&ImagePost::default(), &created).await?;

        info!(post_id = %created.id(), tag_count = created.tags().len(), "投稿を作成");
        Ok(created)
    }

    pub async fn get(&self, post_id: PostId) -> Result<ImagePost, AppError> {
        let post = self.repository.load(post_id).await?;
        if !post.exists() {
            return Err(post_not_found(post_id).into());
        }
        Ok(post)
    }

    pub async fn history(&self, post_id: PostId) -> Result<Vec<HistoryEntry>, AppError> {
        let history = self.repository.history(post_id).await?;
        if history.is_empty() {
            return Err(post_not_found(post_id).into());
        }
        Ok(history)
    }

    pub async fn rename(
        &self,
        post_id: PostId,
        title: &str,
        renamed_by: &UserId,
    ) -> Result<ImagePost, AppError> {
        self.execute(post_id, |post| post.rename(title, renamed_by))
            .await
    }

    /// タグを追加（移行済みのタグは正規形に置き換える）
    pub async fn add_tags(
        &self,
        post_id: PostId,
        tags: &[TagData],
        added_by: &UserId,
    ) -> Result<ImagePost, AppError> {
        let tags = self.resolver.resolve_all(tags).await?;
        self.execute(post_id, |post| post.add_tags(&tags, added_by))
            .await
    }

    pub async fn remove_tags(
        &self,
        post_id: PostId,
        tags: &[TagData],
        removed_by: &UserId,
    ) -> Result<ImagePost, AppError> {
        self.execute(post_id, |post| post.remove_tags(tags, removed_by))
            .await
    }

    pub async fn change_status(
        &self,
        post_id: PostId,
        next: PostStatus,
        reason: Option<String>,
        changed_by: &UserId,
    ) -> Result<ImagePost, AppError> {
        self.execute(post_id, |post| {
            post.change_status(next, reason.clone(), changed_by)
        })
        .await
    }

    pub async fn delete(&self, post_id: PostId, deleted_by: &UserId) -> Result<ImagePost, AppError> {
        self.execute(post_id, |post| post.delete(deleted_by)).await
    }

    /// タグ移行を1つの投稿に適用する
    ///
    /// 既に移行元を持たない投稿や削除済みの投稿にはイベントを追記しない。
    /// その場合も、追記後の反映が失われている可能性があるので、
    /// インデックスを投稿の現在の状態に合わせ直す。
    pub async fn apply_migration(
        &self,
        post_id: PostId,
        migration: &TagMigrated,
    ) -> Result<MigrationOutcome, AppError> {
        let (post, changed) = self
            .execute_tracked(post_id, |post| {
                if !post.exists() {
                    return Ok(Vec::new());
                }
                post.migrate_tag(migration)
            })
            .await?;
        if changed {
            return Ok(MigrationOutcome::Rewritten);
        }

        let repair = TagIndexChange::repair(post_id, &post, &migration.source_tag);
        self.project_change(&repair).await?;
        debug!(post_id = %post_id, source_tag = %migration.source_tag, "タグインデックスを修復");
        Ok(MigrationOutcome::Repaired)
    }

    async fn execute<F>(&self, post_id: PostId, decide: F) -> Result<ImagePost, AppError>
    where
        F: Fn(&ImagePost) -> DomainResult<Vec<ImagePostEvent>>,
    {
        self.execute_tracked(post_id, decide)
            .await
            .map(|(post, _)| post)
    }

    /// 判定と追記を競合時に再実行し、反映後の投稿とイベントを追記したかを返す
    async fn execute_tracked<F>(
        &self,
        post_id: PostId,
        decide: F,
    ) -> Result<(ImagePost, bool), AppError>
    where
        F: Fn(&ImagePost) -> DomainResult<Vec<ImagePostEvent>>,
    {
        let (before, after) = self
            .retry
            .execute(|| async {
                let post = self.repository.load(post_id).await?;
                let events = decide(&post)?;
                let before = post.clone();
                let after = self
                    .repository
                    .save(Uncommitted::new(post).record(events))
                    .await?;
                Ok((before, after))
            })
            .await
            .into_result()?;

        let changed = after.version() != before.version();
        if changed {
            self.project(&before, &after).await?;
        }
        Ok((after, changed))
    }

    async fn project(&self, before: &ImagePost, after: &ImagePost) -> Result<(), AppError> {
        self.project_change(&TagIndexChange::between(before, after))
            .await
    }

    async fn project_change(&self, change: &TagIndexChange) -> Result<(), AppError> {
        if change.is_empty() {
            return Ok(());
        }

        self.index.project(change).await.map_err(|e| {
            error!(post_id = %change.post_id, error = %e, "タグインデックスの更新に失敗");
            e
        })
    }
}

fn post_not_found(post_id: PostId) -> DomainError {
    DomainError::not_found("ImagePost.NotFound", format!("Image post {post_id} not found"))
}
