use domain::{
    AggregateRoot, Collection, CollectionEvent, CollectionId, DomainError, DomainResult,
    HistoryEntry, ImagePost, PostId, Tag, Uncommitted, UserId,
};
use futures::stream::{self, StreamExt, TryStreamExt};
use infrastructure::EventSourcedRepository;
use shared::{AppError, OptimisticLockRetryExecutor};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// メンバー投稿を同時に読み込む数
const MEMBER_LOAD_CONCURRENCY: usize = 8;

/// コレクションに対するコマンドの実行
#[derive(Clone)]
pub struct CollectionService {
    repository: EventSourcedRepository<Collection>,
    posts: EventSourcedRepository<ImagePost>,
    retry: OptimisticLockRetryExecutor,
}

impl CollectionService {
    pub fn new(
        repository: EventSourcedRepository<Collection>,
        posts: EventSourcedRepository<ImagePost>,
        retry: OptimisticLockRetryExecutor,
    ) -> Self {
        Self {
            repository,
            posts,
            retry,
        }
    }

    pub async fn create(&self, title: &str, created_by: &UserId) -> Result<Collection, AppError> {
        let events = Collection::create(CollectionId::new(), title, created_by)?;
        let created = self
            .repository
            .save(Uncommitted::new(Collection::default()).record(events))
            .await?;

        info!(collection_id = %created.id(), "コレクションを作成");
        Ok(created)
    }

    pub async fn get(&self, collection_id: CollectionId) -> Result<Collection, AppError> {
        let collection = self.repository.load(collection_id).await?;
        if !collection.exists() {
            return Err(collection_not_found(collection_id).into());
        }
        Ok(collection)
    }

    pub async fn history(&self, collection_id: CollectionId) -> Result<Vec<HistoryEntry>, AppError> {
        let history = self.repository.history(collection_id).await?;
        if history.is_empty() {
            return Err(collection_not_found(collection_id).into());
        }
        Ok(history)
    }

    pub async fn rename(
        &self,
        collection_id: CollectionId,
        title: &str,
        renamed_by: &UserId,
    ) -> Result<Collection, AppError> {
        self.execute(collection_id, |collection| {
            collection.rename(title, renamed_by)
        })
        .await
    }

    pub async fn delete(
        &self,
        collection_id: CollectionId,
        deleted_by: &UserId,
    ) -> Result<Collection, AppError> {
        self.execute(collection_id, |collection| collection.delete(deleted_by))
            .await
    }

    /// 投稿をコレクションに追加する（存在しない投稿は追加できない）
    pub async fn add_image_post(
        &self,
        collection_id: CollectionId,
        post_id: PostId,
        added_by: &UserId,
    ) -> Result<Collection, AppError> {
        if !post_id.is_nil() {
            let post = self.posts.load(post_id).await?;
            if !post.exists() {
                return Err(DomainError::not_found(
                    "ImagePost.NotFound",
                    format!("Image post {post_id} not found"),
                )
                .into());
            }
        }

        self.execute(collection_id, |collection| {
            collection.add_image_post(post_id, added_by)
        })
        .await
    }

    pub async fn remove_image_post(
        &self,
        collection_id: CollectionId,
        post_id: PostId,
        removed_by: &UserId,
    ) -> Result<Collection, AppError> {
        self.execute(collection_id, |collection| {
            collection.remove_image_post(post_id, removed_by)
        })
        .await
    }

    /// メンバー投稿のタグの和集合（削除済みの投稿は除く）
    pub async fn collection_tags(
        &self,
        collection_id: CollectionId,
    ) -> Result<BTreeSet<Tag>, AppError> {
        let collection = self.get(collection_id).await?;

        let posts: Vec<ImagePost> = stream::iter(collection.post_ids().iter().copied())
            .map(|post_id| self.posts.load(post_id))
            .buffered(MEMBER_LOAD_CONCURRENCY)
            .try_collect()
            .await?;

        let tags = collection.aggregated_tags(&posts);
        debug!(
            collection_id = %collection_id,
            post_count = posts.len(),
            tag_count = tags.len(),
            "コレクションのタグを集計"
        );
        Ok(tags)
    }

    async fn execute<F>(&self, collection_id: CollectionId, decide: F) -> Result<Collection, AppError>
    where
        F: Fn(&Collection) -> DomainResult<Vec<CollectionEvent>>,
    {
        self.retry
            .execute(|| async {
                let collection = self.repository.load(collection_id).await?;
                let events = decide(&collection)?;
                self.repository
                    .save(Uncommitted::new(collection).record(events))
                    .await
            })
            .await
            .into_result()
    }
}

fn collection_not_found(collection_id: CollectionId) -> DomainError {
    DomainError::not_found(
        "Collection.NotFound",
        format!("Collection {collection_id} not found"),
    )
}
