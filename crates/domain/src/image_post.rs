use crate::aggregate::AggregateRoot;
use crate::errors::{combine, combine_pair, DomainError, DomainErrors, DomainResult};
use crate::events::ImagePostEvent;
use crate::identifiers::{PostId, UserId};
use crate::tag::{Tag, TagData};
use crate::tag_migration::TagMigrated;
use crate::tagging::TaggingDecider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub const IMAGE_POST_TITLE_MAX_LENGTH: usize = 200;

/// 画像投稿の処理状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PostStatus {
    /// 一方向の遷移のみ許可（Pending → Processing → Completed | Failed）
    pub fn can_transition_to(&self, next: PostStatus) -> bool {
        matches!(
            (self, next),
            (PostStatus::Pending, PostStatus::Processing)
                | (PostStatus::Processing, PostStatus::Completed)
                | (PostStatus::Processing, PostStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PostStatus::Completed | PostStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Pending => "pending",
            PostStatus::Processing => "processing",
            PostStatus::Completed => "completed",
            PostStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 画像投稿集約
///
/// 状態は `apply` でのみ変化する。判定メソッドは `&self` を取り、
/// 発生すべきイベントだけを返す。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImagePost {
    id: PostId,
    title: String,
    tags: BTreeSet<Tag>,
    status: PostStatus,
    created_at: Option<DateTime<Utc>>,
    created_by: Option<UserId>,
    last_modified_at: Option<DateTime<Utc>>,
    last_modified_by: Option<UserId>,
    deleted: bool,
    version: u64,
}

impl ImagePost {
    /// 新規投稿の作成を判定
    pub fn create(
        id: PostId,
        title: &str,
        tags: &[TagData],
        created_by: &UserId,
    ) -> DomainResult<Vec<ImagePostEvent>> {
        if id.is_nil() {
            return Err(DomainError::validation("ImagePost.Id.Empty", "Post ID cannot be nil").into());
        }

        let (title, tags) = combine_pair(validate_title(title), Tag::parse_many(tags))?;
        let unique = TaggingDecider::tags_to_add(&BTreeSet::new(), &tags);

        Ok(vec![ImagePostEvent::new_post_created(
            id,
            title,
            unique.iter().map(Tag::to_data).collect(),
            created_by.clone(),
        )])
    }

    pub fn rename(&self, title: &str, renamed_by: &UserId) -> DomainResult<Vec<ImagePostEvent>> {
        self.ensure_exists()?;
        let title = validate_title(title)?;

        if title == self.title {
            return Ok(Vec::new());
        }

        Ok(vec![ImagePostEvent::new_post_renamed(
            self.id,
            title,
            renamed_by.clone(),
        )])
    }

    /// タグの追加を判定（既存のタグは無視する）
    pub fn add_tags(
        &self,
        requested: &[TagData],
        added_by: &UserId,
    ) -> DomainResult<Vec<ImagePostEvent>> {
        self.ensure_exists()?;
        let requested = Tag::parse_many(requested)?;

        Ok(TaggingDecider::tags_to_add(&self.tags, &requested)
            .into_iter()
            .map(|tag| ImagePostEvent::new_tag_added(self.id, tag.into(), added_by.clone()))
            .collect())
    }

    /// タグの削除を判定（1つでも付いていなければ全体が失敗）
    pub fn remove_tags(
        &self,
        requested: &[TagData],
        removed_by: &UserId,
    ) -> DomainResult<Vec<ImagePostEvent>> {
        self.ensure_exists()?;
        let requested = Tag::parse_many(requested)?;

        // 付いていない要求タグ
        let missing = TaggingDecider::tags_to_add(&self.tags, &requested);
        combine(missing.iter().map(|tag| -> DomainResult<()> {
            Err(DomainError::business_rule(
                "ImagePost.Tag.NotFound",
                format!("Tag {tag} is not attached to post {}", self.id),
            )
            .into())
        }))?;

        Ok(TaggingDecider::tags_to_remove(&self.tags, &requested)
            .into_iter()
            .map(|tag| ImagePostEvent::new_tag_removed(self.id, tag.into(), removed_by.clone()))
            .collect())
    }

    /// 状態遷移を判定
    pub fn change_status(
        &self,
        next: PostStatus,
        reason: Option<String>,
        changed_by: &UserId,
    ) -> DomainResult<Vec<ImagePostEvent>> {
        self.ensure_exists()?;

        if !self.status.can_transition_to(next) {
            return Err(DomainError::business_rule(
                "ImagePost.Status.InvalidTransition",
                format!("Cannot change status from {} to {next}", self.status),
            )
            .into());
        }

        Ok(vec![ImagePostEvent::new_status_changed(
            self.id,
            self.status,
            next,
            reason,
            changed_by.clone(),
        )])
    }

    pub fn start_processing(&self, changed_by: &UserId) -> DomainResult<Vec<ImagePostEvent>> {
        self.change_status(PostStatus::Processing, None, changed_by)
    }

    pub fn complete(&self, changed_by: &UserId) -> DomainResult<Vec<ImagePostEvent>> {
        self.change_status(PostStatus::Completed, None, changed_by)
    }

    pub fn fail(&self, reason: impl Into<String>, changed_by: &UserId) -> DomainResult<Vec<ImagePostEvent>> {
        self.change_status(PostStatus::Failed, Some(reason.into()), changed_by)
    }

    /// タグ移行の適用を判定
    ///
    /// 移行元のタグを持っていなければイベントは発生しない。
    pub fn migrate_tag(&self, migration: &TagMigrated) -> DomainResult<Vec<ImagePostEvent>> {
        self.ensure_exists()?;

        if !self.has_tag(&migration.source_tag) || migration.source_tag == migration.target_tag {
            return Ok(Vec::new());
        }

        Ok(vec![ImagePostEvent::new_tag_migrated(
            self.id,
            migration.source_tag.clone(),
            migration.target_tag.clone(),
            migration.migrated_by.clone(),
        )])
    }

    pub fn delete(&self, deleted_by: &UserId) -> DomainResult<Vec<ImagePostEvent>> {
        self.ensure_exists()?;
        Ok(vec![ImagePostEvent::new_post_deleted(
            self.id,
            deleted_by.clone(),
        )])
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn tags(&self) -> &BTreeSet<Tag> {
        &self.tags
    }

    pub fn has_tag(&self, data: &TagData) -> bool {
        self.tags.iter().any(|tag| tag.matches(data))
    }

    pub fn status(&self) -> PostStatus {
        self.status
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

    /// 作成済みかつ未削除
    pub fn exists(&self) -> bool {
        self.created_at.is_some() && !self.deleted
    }

    fn ensure_exists(&self) -> Result<(), DomainErrors> {
        if self.exists() {
            Ok(())
        } else {
            Err(DomainError::not_found(
                "ImagePost.NotFound",
                format!("Image post not found: {}", self.id),
            )
            .into())
        }
    }

    fn touch(&mut self, at: DateTime<Utc>, by: &UserId) {
        self.last_modified_at = Some(at);
        self.last_modified_by = Some(by.clone());
    }
}

impl AggregateRoot for ImagePost {
    type Id = PostId;
    type Event = ImagePostEvent;

    const KIND: &'static str = "image-post";

    fn id(&self) -> PostId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn apply(&mut self, event: &ImagePostEvent) {
        match event {
            ImagePostEvent::PostCreatedV1 {
                post_id,
                title,
                tags,
                created_by,
                timestamp,
                ..
            } => {
                self.id = *post_id;
                self.title = title.clone();
                self.tags = tags.iter().map(Tag::from_trusted).collect();
                self.status = PostStatus::Pending;
                self.created_at = Some(*timestamp);
                self.created_by = Some(created_by.clone());
                self.deleted = false;
                self.touch(*timestamp, created_by);
            }
            ImagePostEvent::PostRenamedV1 {
                title,
                renamed_by,
                timestamp,
                ..
            } => {
                self.title = title.clone();
                self.touch(*timestamp, renamed_by);
            }
            ImagePostEvent::PostStatusChangedV1 {
                to,
                changed_by,
                timestamp,
                ..
            } => {
                self.status = *to;
                self.touch(*timestamp, changed_by);
            }
            ImagePostEvent::TagAddedV1 {
                tag,
                added_by,
                timestamp,
                ..
            } => {
                self.tags.insert(Tag::from_trusted(tag));
                self.touch(*timestamp, added_by);
            }
            ImagePostEvent::TagRemovedV1 {
                tag,
                removed_by,
                timestamp,
                ..
            } => {
                self.tags.remove(&Tag::from_trusted(tag));
                self.touch(*timestamp, removed_by);
            }
            ImagePostEvent::TagMigratedV1 {
                source_tag,
                target_tag,
                migrated_by,
                timestamp,
                ..
            } => {
                self.tags.remove(&Tag::from_trusted(source_tag));
                // 移行先を既に持っている場合は集合なので重複しない
                self.tags.insert(Tag::from_trusted(target_tag));
                self.touch(*timestamp, migrated_by);
            }
            ImagePostEvent::PostDeletedV1 {
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

fn validate_title(title: &str) -> DomainResult<String> {
    let title = title.trim();

    if title.is_empty() {
        return Err(DomainError::validation("ImagePost.Title.Empty", "Title cannot be empty").into());
    }
    if title.chars().count() > IMAGE_POST_TITLE_MAX_LENGTH {
        return Err(DomainError::validation(
            "ImagePost.Title.TooLong",
            format!("Title must be at most {IMAGE_POST_TITLE_MAX_LENGTH} characters"),
        )
        .into());
    }

    Ok(title.to_string())
}
