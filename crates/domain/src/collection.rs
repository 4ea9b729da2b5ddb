use crate::aggregate::AggregateRoot;
use crate::errors::{DomainError, DomainResult};
use crate::events::CollectionEvent;
use crate::identifiers::{CollectionId, PostId, UserId};
use crate::image_post::ImagePost;
use crate::tag::Tag;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

pub const COLLECTION_TITLE_MIN_LENGTH: usize = 5;
pub const COLLECTION_TITLE_MAX_LENGTH: usize = 200;

/// コレクション集約
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Collection {
    id: CollectionId,
    title: String,
    posts: BTreeSet<PostId>,
    created_at: Option<DateTime<Utc>>,
    created_by: Option<UserId>,
    last_modified_at: Option<DateTime<Utc>>,
    last_modified_by: Option<UserId>,
    deleted: bool,
    version: u64,
}

impl Collection {
    pub fn create(
        id: CollectionId,
        title: &str,
        created_by: &UserId,
    ) -> DomainResult<Vec<CollectionEvent>> {
        if id.is_nil() {
            return Err(
                DomainError::validation("Collection.Id.Empty", "Collection ID cannot be nil").into(),
            );
        }
        let title = validate_title(title)?;

        Ok(vec![CollectionEvent::new_collection_created(
            id,
            title,
            created_by.clone(),
        )])
    }

    pub fn rename(&self, title: &str, renamed_by: &UserId) -> DomainResult<Vec<CollectionEvent>> {
        self.ensure_exists()?;
        let title = validate_title(title)?;

        if title == self.title {
            return Ok(Vec::new());
        }

        Ok(vec![CollectionEvent::new_collection_renamed(
            self.id,
            title,
            renamed_by.clone(),
        )])
    }

    /// 投稿の追加を判定（既に含まれていれば Conflict）
    pub fn add_image_post(
        &self,
        post_id: PostId,
        added_by: &UserId,
    ) -> DomainResult<Vec<CollectionEvent>> {
        self.ensure_exists()?;
        ensure_post_id(post_id)?;

        if self.posts.contains(&post_id) {
            return Err(DomainError::conflict(
                "Collection.ImagePost.AlreadyExists",
                format!("Image post {post_id} is already in collection {}", self.id),
            )
            .into());
        }

        Ok(vec![CollectionEvent::new_image_post_added(
            self.id,
            post_id,
            added_by.clone(),
        )])
    }

    /// 投稿の削除を判定（含まれていなければ NotFound）
    pub fn remove_image_post(
        &self,
        post_id: PostId,
        removed_by: &UserId,
    ) -> DomainResult<Vec<CollectionEvent>> {
        self.ensure_exists()?;
        ensure_post_id(post_id)?;

        if !self.posts.contains(&post_id) {
            return Err(DomainError::not_found(
                "Collection.ImagePost.NotFound",
                format!("Image post {post_id} is not in collection {}", self.id),
            )
            .into());
        }

        Ok(vec![CollectionEvent::new_image_post_removed(
            self.id,
            post_id,
            removed_by.clone(),
        )])
    }

    pub fn delete(&self, deleted_by: &UserId) -> DomainResult<Vec<CollectionEvent>> {
        self.ensure_exists()?;
        Ok(vec![CollectionEvent::new_collection_deleted(
            self.id,
            deleted_by.clone(),
        )])
    }

    /// メンバー投稿のタグの和集合
    ///
    /// メンバーでない投稿と削除済みの投稿は無視する。
    pub fn aggregated_tags<'a>(&self, posts: impl IntoIterator<Item = &'a ImagePost>) -> BTreeSet<Tag> {
        posts
            .into_iter()
            .filter(|post| post.exists() && self.posts.contains(&post.id()))
            .flat_map(|post| post.tags().iter().cloned())
            .collect()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn post_ids(&self) -> &BTreeSet<PostId> {
        &self.posts
    }

    pub fn contains(&self, post_id: PostId) -> bool {
        self.posts.contains(&post_id)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn created_by(&self) -> Option<&UserId> {
        self.created_by.as_ref()
    }

    pub fn last_modified_at(&self) -> Option<DateTime<Utc>> {
        self.last_modified_at
    }

    pub fn last_modified_by(&self) -> Option<&UserId> {
        self.last_modified_by.as_ref()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn exists(&self) -> bool {
        self.created_at.is_some() && !self.deleted
    }

    fn ensure_exists(&self) -> DomainResult<()> {
        if self.exists() {
            Ok(())
        } else {
            Err(DomainError::not_found(
                "Collection.NotFound",
                format!("Collection not found: {}", self.id),
            )
            .into())
        }
    }

    fn touch(&mut self, at: DateTime<Utc>, by: &UserId) {
        self.last_modified_at = Some(at);
        self.last_modified_by = Some(by.clone());
    }
}

impl AggregateRoot for Collection {
    type Id = CollectionId;
    type Event = CollectionEvent;

    const KIND: &'static str = "collection";

    fn id(&self) -> CollectionId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn apply(&mut self, event: &CollectionEvent) {
        match event {
            CollectionEvent::CollectionCreatedV1 {
                collection_id,
                title,
                created_by,
                timestamp,
                ..
            } => {
                self.id = *collection_id;
                self.title = title.clone();
                self.posts.clear();
                self.created_at = Some(*timestamp);
                self.created_by = Some(created_by.clone());
                self.deleted = false;
                self.touch(*timestamp, created_by);
            }
            CollectionEvent::CollectionRenamedV1 {
                title,
                renamed_by,
                timestamp,
                ..
            } => {
                self.title = title.clone();
                self.touch(*timestamp, renamed_by);
            }
            CollectionEvent::ImagePostAddedToCollectionV1 {
                post_id,
                added_by,
                timestamp,
                ..
            } => {
                self.posts.insert(*post_id);
                self.touch(*timestamp, added_by);
            }
            CollectionEvent::ImagePostRemovedFromCollectionV1 {
                post_id,
                removed_by,
                timestamp,
                ..
            } => {
                self.posts.remove(post_id);
                self.touch(*timestamp, removed_by);
            }
            CollectionEvent::CollectionDeletedV1 {
                deleted_by,
                timestamp,
                ..
            } => {
                self.deleted = true;
                self.touch(*timestamp, deleted_by);
            }
        }
        self.version += 1;
    }
}

fn ensure_post_id(post_id: PostId) -> DomainResult<()> {
    if post_id.is_nil() {
        return Err(DomainError::validation(
            "Collection.ImagePostId.Empty",
            "Image post ID cannot be nil",
        )
        .into());
    }
    Ok(())
}

fn validate_title(title: &str) -> DomainResult<String> {
    let title = title.trim();
    let length = title.chars().count();

    if title.is_empty() {
        return Err(
            DomainError::validation("Collection.Title.Empty", "Title cannot be empty").into(),
        );
    }
    if length < COLLECTION_TITLE_MIN_LENGTH {
        return Err(DomainError::validation(
            "Collection.Title.TooShort",
            format!("Title must be at least {COLLECTION_TITLE_MIN_LENGTH} characters"),
        )
        .into());
    }
    if length > COLLECTION_TITLE_MAX_LENGTH {
        return Err(DomainError::validation(
            "Collection.Title.TooLong",
            format!("Title must be at most {COLLECTION_TITLE_MAX_LENGTH} characters"),
        )
        .into());
    }

    Ok(title.to_string())
}
