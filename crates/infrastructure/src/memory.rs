use crate::ports::{EventStreamStore, PostTagIndex, TagIndexChange, TagMigrationStore};
use async_trait::async_trait;
use domain::{DomainEvent, PostId, TagData, TagMigration};
use futures::stream::{self, BoxStream, StreamExt};
use shared::AppError;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound::{Excluded, Unbounded};
use tokio::sync::Mutex;
use tracing::debug;

/// メモリ上のイベントストア（テスト・ローカル開発用）
pub struct InMemoryEventStore<E> {
    streams: Mutex<HashMap<String, Vec<E>>>,
}

impl<E> InMemoryEventStore<E> {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
        }
    }
}

impl<E> Default for InMemoryEventStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: DomainEvent> EventStreamStore<E> for InMemoryEventStore<E> {
    async fn append(
        &self,
        stream_id: &str,
        expected_version: u64,
        events: &[E],
    ) -> Result<u64, AppError> {
        let mut streams = self.streams.lock().await;
        let stream = streams.entry(stream_id.to_string()).or_default();

        if stream.len() as u64 != expected_version {
            debug!(
                stream_id,
                expected_version,
                actual_version = stream.len(),
                "バージョン不一致"
            );
            return Err(AppError::VersionConflict {
                stream_id: stream_id.to_string(),
                expected: expected_version,
            });
        }

        stream.extend_from_slice(events);
        Ok(stream.len() as u64)
    }

    async fn read_stream(&self, stream_id: &str) -> Result<Vec<E>, AppError> {
        let streams = self.streams.lock().await;
        Ok(streams.get(stream_id).cloned().unwrap_or_default())
    }
}

/// メモリ上のタグ移行ストア（移行元タグをキーとする）
#[derive(Default)]
pub struct InMemoryTagMigrationStore {
    migrations: Mutex<BTreeMap<TagData, TagMigration>>,
}

impl InMemoryTagMigrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存されているすべての移行（移行元の順）
    pub async fn all(&self) -> Vec<TagMigration> {
        self.migrations.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl TagMigrationStore for InMemoryTagMigrationStore {
    async fn find_by_source(&self, tag: &TagData) -> Result<Option<TagMigration>, AppError> {
        Ok(self.migrations.lock().await.get(tag).cloned())
    }

    async fn find_by_target(&self, tag: &TagData) -> Result<Vec<TagMigration>, AppError> {
        Ok(self
            .migrations
            .lock()
            .await
            .values()
            .filter(|migration| &migration.target_tag == tag)
            .cloned()
            .collect())
    }

    async fn create_one(&self, migration: TagMigration) -> Result<(), AppError> {
        let mut migrations = self.migrations.lock().await;
        if migrations.contains_key(&migration.source_tag) {
            return Err(AppError::AlreadyExists(format!(
                "tag migration from {}",
                migration.source_tag
            )));
        }
        migrations.insert(migration.source_tag.clone(), migration);
        Ok(())
    }

    async fn replace_many(
        &self,
        delete: Vec<TagMigration>,
        insert: Vec<TagMigration>,
    ) -> Result<(), AppError> {
        let mut migrations = self.migrations.lock().await;
        let mut staged = migrations.clone();

        for migration in &delete {
            match staged.get(&migration.source_tag) {
                Some(current) if current.target_tag == migration.target_tag => {
                    staged.remove(&migration.source_tag);
                }
                _ => {
                    return Err(AppError::AlreadyExists(format!(
                        "tag migration from {} was changed concurrently",
                        migration.source_tag
                    )));
                }
            }
        }

        for migration in insert {
            if staged.contains_key(&migration.source_tag) {
                return Err(AppError::AlreadyExists(format!(
                    "tag migration from {}",
                    migration.source_tag
                )));
            }
            staged.insert(migration.source_tag.clone(), migration);
        }

        *migrations = staged;
        Ok(())
    }
}

/// メモリ上のタグ → 投稿ID インデックス
pub struct InMemoryPostTagIndex {
    entries: Mutex<BTreeMap<TagData, BTreeSet<PostId>>>,
    page_size: usize,
}

impl InMemoryPostTagIndex {
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    /// 列挙時の1ページあたりの件数を指定して作成
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            page_size: page_size.max(1),
        }
    }

    async fn page(&self, tag: &TagData, after: Option<PostId>) -> Vec<PostId> {
        let entries = self.entries.lock().await;
        let Some(ids) = entries.get(tag) else {
            return Vec::new();
        };

        match after {
            Some(cursor) => ids
                .range((Excluded(cursor), Unbounded))
                .take(self.page_size)
                .copied()
                .collect(),
            None => ids.iter().take(self.page_size).copied().collect(),
        }
    }
}

impl Default for InMemoryPostTagIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PostTagIndex for InMemoryPostTagIndex {
    async fn project(&self, change: &TagIndexChange) -> Result<(), AppError> {
        let mut entries = self.entries.lock().await;

        for tag in &change.removed {
            if let Some(ids) = entries.get_mut(tag) {
                ids.remove(&change.post_id);
                if ids.is_empty() {
                    entries.remove(tag);
                }
            }
        }
        for tag in &change.added {
            entries
                .entry(tag.clone())
                .or_default()
                .insert(change.post_id);
        }

        Ok(())
    }

    fn stream_post_ids_with_tag(&self, tag: &TagData) -> BoxStream<'_, Result<PostId, AppError>> {
        let tag = tag.clone();

        // 状態: 次のページの開始位置。None で列挙終了
        stream::unfold(Some(None), move |cursor: Option<Option<PostId>>| {
            let tag = tag.clone();
            async move {
                let after = cursor?;
                let page = self.page(&tag, after).await;
                if page.is_empty() {
                    return None;
                }

                let next = if page.len() < self.page_size {
                    None
                } else {
                    page.last().copied().map(Some)
                };
                Some((stream::iter(page.into_iter().map(Ok)), next))
            }
        })
        .flatten()
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{ImagePostEvent, TagType, UserId};

    fn tag(value: &str) -> TagData {
        TagData::new(TagType::General, value)
    }

    fn user() -> UserId {
        UserId::from_string("user123").unwrap()
    }

    #[tokio::test]
    async fn test_event_store_append_and_read() {
        let store = InMemoryEventStore::<ImagePostEvent>::new();
        let post_id = PostId::new();
        let event = ImagePostEvent::new_tag_added(post_id, tag("sunset"), user());

        let version = store.append("image-post-1", 0, &[event.clone()]).await.unwrap();
        assert_eq!(version, 1);

        let events = store.read_stream("image-post-1").await.unwrap();
        assert_eq!(events, vec![event]);
        assert!(store.read_stream("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_event_store_rejects_stale_version() {
        let store = InMemoryEventStore::<ImagePostEvent>::new();
        let event = ImagePostEvent::new_post_deleted(PostId::new(), user());
        store.append("s", 0, &[event.clone()]).await.unwrap();

        let result = store.append("s", 0, &[event]).await;
        assert!(matches!(
            result,
            Err(AppError::VersionConflict { expected: 0, .. })
        ));
        assert_eq!(store.read_stream("s").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_migration_store_create_one() {
        let store = InMemoryTagMigrationStore::new();
        store
            .create_one(TagMigration::new(tag("colour"), tag("color"), user()))
            .await
            .unwrap();

        let result = store
            .create_one(TagMigration::new(tag("colour"), tag("hue"), user()))
            .await;
        assert!(matches!(result, Err(AppError::AlreadyExists(_))));

        assert_eq!(store.find_by_target(&tag("color")).await.unwrap().len(), 1);
        assert!(store.find_by_source(&tag("color")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_many_is_atomic() {
        let store = InMemoryTagMigrationStore::new();
        let upstream = TagMigration::new(tag("colr"), tag("colour"), user());
        let blocker = TagMigration::new(tag("colour"), tag("hue"), user());
        store.create_one(upstream.clone()).await.unwrap();
        store.create_one(blocker).await.unwrap();

        // 挿入する移行元が既に存在するので全体が失敗する
        let result = store
            .replace_many(
                vec![upstream.clone()],
                vec![
                    upstream.repointed(tag("color"), &user()),
                    TagMigration::new(tag("colour"), tag("color"), user()),
                ],
            )
            .await;
        assert!(matches!(result, Err(AppError::AlreadyExists(_))));

        let stored = store.find_by_source(&tag("colr")).await.unwrap().unwrap();
        assert_eq!(stored.target_tag, tag("colour"));
    }

    #[tokio::test]
    async fn test_replace_many_rejects_stale_delete() {
        let store = InMemoryTagMigrationStore::new();
        let stale = TagMigration::new(tag("colr"), tag("colour"), user());

        let result = store.replace_many(vec![stale], vec![]).await;
        assert!(matches!(result, Err(AppError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_post_tag_index_pages_lazily() {
        let index = InMemoryPostTagIndex::with_page_size(2);
        let mut ids: Vec<PostId> = (0..5).map(|_| PostId::new()).collect();
        ids.sort();

        for id in &ids {
            index
                .project(&TagIndexChange {
                    post_id: *id,
                    added: vec![tag("sunset")],
                    removed: vec![],
                })
                .await
                .unwrap();
        }

        let streamed: Vec<PostId> = index
            .stream_post_ids_with_tag(&tag("sunset"))
            .map(|id| id.unwrap())
            .collect()
            .await;
        assert_eq!(streamed, ids);

        let none: Vec<_> = index
            .stream_post_ids_with_tag(&tag("ocean"))
            .collect()
            .await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_post_tag_index_removal() {
        let index = InMemoryPostTagIndex::new();
        let post_id = PostId::new();
        index
            .project(&TagIndexChange {
                post_id,
                added: vec![tag("colour")],
                removed: vec![],
            })
            .await
            .unwrap();
        index
            .project(&TagIndexChange {
                post_id,
                added: vec![tag("color")],
                removed: vec![tag("colour")],
            })
            .await
            .unwrap();

        let old: Vec<_> = index
            .stream_post_ids_with_tag(&tag("colour"))
            .collect()
            .await;
        assert!(old.is_empty());

        let new: Vec<_> = index
            .stream_post_ids_with_tag(&tag("color"))
            .collect()
            .await;
        assert_eq!(new.len(), 1);
    }
}
