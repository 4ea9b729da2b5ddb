use async_trait::async_trait;
use domain::{AggregateRoot, DomainEvent, ImagePost, PostId, Tag, TagData, TagMigration};
use futures::stream::BoxStream;
use shared::AppError;
use std::collections::BTreeSet;

/// ストリーム単位で順序付けられた追記専用のイベントストア
#[async_trait]
pub trait EventStreamStore<E: DomainEvent>: Send + Sync {
    /// イベントを追記して新しいバージョンを返す
    ///
    /// ストリームの現在バージョンが `expected_version` と異なる場合は
    /// `AppError::VersionConflict` を返し、何も書き込まない。
    async fn append(
        &self,
        stream_id: &str,
        expected_version: u64,
        events: &[E],
    ) -> Result<u64, AppError>;

    /// ストリームのイベントを追記順に読み込む（存在しなければ空）
    async fn read_stream(&self, stream_id: &str) -> Result<Vec<E>, AppError>;
}

/// タグ移行レコードのストア
#[async_trait]
pub trait TagMigrationStore: Send + Sync {
    async fn find_by_source(&self, tag: &TagData) -> Result<Option<TagMigration>, AppError>;

    async fn find_by_target(&self, tag: &TagData) -> Result<Vec<TagMigration>, AppError>;

    /// 同じ移行元が既にあれば `AppError::AlreadyExists`
    async fn create_one(&self, migration: TagMigration) -> Result<(), AppError>;

    /// 削除と挿入を1つの原子的な単位で適用する
    ///
    /// 削除対象が既に変更されている場合や、挿入する移行元が既に存在する
    /// 場合は `AppError::AlreadyExists` を返し、何も変更しない。
    async fn replace_many(
        &self,
        delete: Vec<TagMigration>,
        insert: Vec<TagMigration>,
    ) -> Result<(), AppError>;
}

/// タグ → 投稿ID の読み取りモデル
#[async_trait]
pub trait PostTagIndex: Send + Sync {
    /// 投稿のタグの変化を反映する（同じ変化を何度適用しても同じ結果）
    async fn project(&self, change: &TagIndexChange) -> Result<(), AppError>;

    /// 現在タグを持つ投稿IDを遅延的に列挙する
    ///
    /// ページごとに現在の状態を問い合わせるため、列挙中に移行された投稿は
    /// 後続のページには現れない。再開はできない。
    fn stream_post_ids_with_tag(&self, tag: &TagData) -> BoxStream<'_, Result<PostId, AppError>>;
}

/// 読み取りモデルに反映する1投稿分のタグの差分
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagIndexChange {
    pub post_id: PostId,
    pub added: Vec<TagData>,
    pub removed: Vec<TagData>,
}

impl TagIndexChange {
    /// 更新前後の投稿からタグの差分を求める（削除済みの投稿はタグなし扱い）
    pub fn between(before: &ImagePost, after: &ImagePost) -> Self {
        let visible = |post: &ImagePost| -> BTreeSet<Tag> {
            if post.exists() {
                post.tags().clone()
            } else {
                BTreeSet::new()
            }
        };
        let before_tags = visible(before);
        let after_tags = visible(after);

        Self {
            post_id: after.id(),
            added: after_tags.difference(&before_tags).map(Tag::to_data).collect(),
            removed: before_tags.difference(&after_tags).map(Tag::to_data).collect(),
        }
    }

    /// 読み取りモデルを投稿の現在の状態に合わせ直す差分
    ///
    /// `stale` はインデックスに残っているかもしれない古いタグで、投稿が
    /// 現在持っていなければ削除対象にする。反映は冪等なので何度適用してもよい。
    pub fn repair(post_id: PostId, post: &ImagePost, stale: &TagData) -> Self {
        let current = Self::between(&ImagePost::default(), post);
        let removed = if current.added.contains(stale) {
            Vec::new()
        } else {
            vec![stale.clone()]
        };

        Self {
            post_id,
            added: current.added,
            removed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
