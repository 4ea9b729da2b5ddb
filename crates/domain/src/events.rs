use crate::identifiers::{CollectionId, PostId, UserId};
use crate::image_post::PostStatus;
use crate::tag::TagData;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// イベントのシリアライズ・デシリアライズエラー
#[derive(Debug, Clone, Error)]
pub enum EventCodecError {
    #[error("Invalid event version: {0}")]
    InvalidVersion(String),

    #[error("Incompatible event version: {event_type} {version} (current {current})")]
    IncompatibleVersion {
        event_type: String,
        version: String,
        current: String,
    },

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Event serialization error: {0}")]
    Serialization(String),

    #[error("Event deserialization error: {0}")]
    Deserialization(String),
}

/// イベントのバージョン情報を表す構造体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventVersion {
    pub major: u32,
    pub minor: u32,
}

impl EventVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// バージョン文字列から EventVersion を作成
    pub fn from_string(version: &str) -> Result<Self, EventCodecError> {
        let invalid = || EventCodecError::InvalidVersion(version.to_string());
        let (major, minor) = version.split_once('.').ok_or_else(invalid)?;

        Ok(Self {
            major: major.parse::<u32>().map_err(|_| invalid())?,
            minor: minor.parse::<u32>().map_err(|_| invalid())?,
        })
    }

    /// このバージョンで other のイベントを読めるか
    pub fn is_compatible_with(&self, other: &EventVersion) -> bool {
        self.major == other.major && self.minor >= other.minor
    }
}

impl fmt::Display for EventVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// 保存済みイベントのヘッダ部分（読み込み前のバージョン判定用）
#[derive(Debug, Deserialize)]
struct RawEventHeader {
    event_type: String,
    version: Option<String>,
}

/// ドメインイベント共通のインターフェース
pub trait DomainEvent:
    fmt::Debug + Clone + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// シリアライズ時の識別子（例: "tag_added_v1"）
    fn event_type(&self) -> &'static str;

    fn event_id(&self) -> &str;

    fn timestamp(&self) -> &DateTime<Utc>;

    fn version(&self) -> &str;

    /// 履歴表示用のイベント名
    fn event_name(&self) -> &'static str;

    /// 履歴表示用の説明文
    fn description(&self) -> String;

    /// イベント種別ごとの現行バージョン（未知の種別は None）
    fn current_version(event_type: &str) -> Option<&'static str>;

    fn to_json(&self) -> Result<String, EventCodecError> {
        serde_json::to_string(self).map_err(|e| EventCodecError::Serialization(e.to_string()))
    }

    /// JSONからイベントを復元（種別とバージョンを検証する）
    fn from_json(json: &str) -> Result<Self, EventCodecError> {
        let header: RawEventHeader = serde_json::from_str(json)
            .map_err(|e| EventCodecError::Deserialization(e.to_string()))?;

        let current = Self::current_version(&header.event_type)
            .ok_or_else(|| EventCodecError::UnknownEventType(header.event_type.clone()))?;
        let stored = header.version.as_deref().unwrap_or(current);

        if !EventVersion::from_string(current)?.is_compatible_with(&EventVersion::from_string(stored)?)
        {
            return Err(EventCodecError::IncompatibleVersion {
                event_type: header.event_type,
                version: stored.to_string(),
                current: current.to_string(),
            });
        }

        serde_json::from_str(json).map_err(|e| EventCodecError::Deserialization(e.to_string()))
    }
}

fn default_v1_version() -> String {
    "1.0".to_string()
}

fn new_event_id() -> String {
    ulid::Ulid::new().to_string()
}

/// 画像投稿イベント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ImagePostEvent {
    PostCreatedV1 {
        event_id: String,
        post_id: PostId,
        title: String,
        tags: Vec<TagData>,
        created_by: UserId,
        timestamp: DateTime<Utc>,
        #[serde(default = "default_v1_version")]
        version: String,
    },
    PostRenamedV1 {
        event_id: String,
        post_id: PostId,
        title: String,
        renamed_by: UserId,
        timestamp: DateTime<Utc>,
        #[serde(default = "default_v1_version")]
        version: String,
    },
    PostStatusChangedV1 {
        event_id: String,
        post_id: PostId,
        from: PostStatus,
        to: PostStatus,
        reason: Option<String>,
        changed_by: UserId,
        timestamp: DateTime<Utc>,
        #[serde(default = "default_v1_version")]
        version: String,
    },
    TagAddedV1 {
        event_id: String,
        post_id: PostId,
        tag: TagData,
        added_by: UserId,
        timestamp: DateTime<Utc>,
        #[serde(default = "default_v1_version")]
        version: String,
    },
    TagRemovedV1 {
        event_id: String,
        post_id: PostId,
        tag: TagData,
        removed_by: UserId,
        timestamp: DateTime<Utc>,
        #[serde(default = "default_v1_version")]
        version: String,
    },
    TagMigratedV1 {
        event_id: String,
        post_id: PostId,
        source_tag: TagData,
        target_tag: TagData,
        migrated_by: UserId,
        timestamp: DateTime<Utc>,
        #[serde(default = "default_v1_version")]
        version: String,
    },
    PostDeletedV1 {
        event_id: String,
        post_id: PostId,
        deleted_by: UserId,
        timestamp: DateTime<Utc>,
        #[serde(default = "default_v1_version")]
        version: String,
    },
}

impl ImagePostEvent {
    pub fn post_id(&self) -> PostId {
        match self {
            ImagePostEvent::PostCreatedV1 { post_id, .. }
            | ImagePostEvent::PostRenamedV1 { post_id, .. }
            | ImagePostEvent::PostStatusChangedV1 { post_id, .. }
            | ImagePostEvent::TagAddedV1 { post_id, .. }
            | ImagePostEvent::TagRemovedV1 { post_id, .. }
            | ImagePostEvent::TagMigratedV1 { post_id, .. }
            | ImagePostEvent::PostDeletedV1 { post_id, .. } => *post_id,
        }
    }

    pub fn new_post_created(
        post_id: PostId,
        title: String,
        tags: Vec<TagData>,
        created_by: UserId,
    ) -> Self {
        ImagePostEvent::PostCreatedV1 {
            event_id: new_event_id(),
            post_id,
            title,
            tags,
            created_by,
            timestamp: Utc::now(),
            version: default_v1_version(),
        }
    }

    pub fn new_post_renamed(post_id: PostId, title: String, renamed_by: UserId) -> Self {
        ImagePostEvent::PostRenamedV1 {
            event_id: new_event_id(),
            post_id,
            title,
            renamed_by,
            timestamp: Utc::now(),
            version: default_v1_version(),
        }
    }

    pub fn new_status_changed(
        post_id: PostId,
        from: PostStatus,
        to: PostStatus,
        reason: Option<String>,
        changed_by: UserId,
    ) -> Self {
        ImagePostEvent::PostStatusChangedV1 {
            event_id: new_event_id(),
            post_id,
            from,
            to,
            reason,
            changed_by,
            timestamp: Utc::now(),
            version: default_v1_version(),
        }
    }

    pub fn new_tag_added(post_id: PostId, tag: TagData, added_by: UserId) -> Self {
        ImagePostEvent::TagAddedV1 {
            event_id: new_event_id(),
            post_id,
            tag,
            added_by,
            timestamp: Utc::now(),
            version: default_v1_version(),
        }
    }

    pub fn new_tag_removed(post_id: PostId, tag: TagData, removed_by: UserId) -> Self {
        ImagePostEvent::TagRemovedV1 {
            event_id: new_event_id(),
            post_id,
            tag,
            removed_by,
            timestamp: Utc::now(),
            version: default_v1_version(),
        }
    }

    pub fn new_tag_migrated(
        post_id: PostId,
        source_tag: TagData,
        target_tag: TagData,
        migrated_by: UserId,
    ) -> Self {
        ImagePostEvent::TagMigratedV1 {
            event_id: new_event_id(),
            post_id,
            source_tag,
            target_tag,
            migrated_by,
            timestamp: Utc::now(),
            version: default_v1_version(),
        }
    }

    pub fn new_post_deleted(post_id: PostId, deleted_by: UserId) -> Self {
        ImagePostEvent::PostDeletedV1 {
            event_id: new_event_id(),
            post_id,
            deleted_by,
            timestamp: Utc::now(),
            version: default_v1_version(),
        }
    }
}

impl DomainEvent for ImagePostEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ImagePostEvent::PostCreatedV1 { .. } => "post_created_v1",
            ImagePostEvent::PostRenamedV1 { .. } => "post_renamed_v1",
            ImagePostEvent::PostStatusChangedV1 { .. } => "post_status_changed_v1",
            ImagePostEvent::TagAddedV1 { .. } => "tag_added_v1",
            ImagePostEvent::TagRemovedV1 { .. } => "tag_removed_v1",
            ImagePostEvent::TagMigratedV1 { .. } => "tag_migrated_v1",
            ImagePostEvent::PostDeletedV1 { .. } => "post_deleted_v1",
        }
    }

    fn event_id(&self) -> &str {
        match self {
            ImagePostEvent::PostCreatedV1 { event_id, .. }
            | ImagePostEvent::PostRenamedV1 { event_id, .. }
            | ImagePostEvent::PostStatusChangedV1 { event_id, .. }
            | ImagePostEvent::TagAddedV1 { event_id, .. }
            | ImagePostEvent::TagRemovedV1 { event_id, .. }
            | ImagePostEvent::TagMigratedV1 { event_id, .. }
            | ImagePostEvent::PostDeletedV1 { event_id, .. } => event_id,
        }
    }

    fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            ImagePostEvent::PostCreatedV1 { timestamp, .. }
            | ImagePostEvent::PostRenamedV1 { timestamp, .. }
            | ImagePostEvent::PostStatusChangedV1 { timestamp, .. }
            | ImagePostEvent::TagAddedV1 { timestamp, .. }
            | ImagePostEvent::TagRemovedV1 { timestamp, .. }
            | ImagePostEvent::TagMigratedV1 { timestamp, .. }
            | ImagePostEvent::PostDeletedV1 { timestamp, .. } => timestamp,
        }
    }

    fn version(&self) -> &str {
        match self {
            ImagePostEvent::PostCreatedV1 { version, .. }
            | ImagePostEvent::PostRenamedV1 { version, .. }
            | ImagePostEvent::PostStatusChangedV1 { version, .. }
            | ImagePostEvent::TagAddedV1 { version, .. }
            | ImagePostEvent::TagRemovedV1 { version, .. }
            | ImagePostEvent::TagMigratedV1 { version, .. }
            | ImagePostEvent::PostDeletedV1 { version, .. } => version,
        }
    }

    fn event_name(&self) -> &'static str {
        match self {
            ImagePostEvent::PostCreatedV1 { .. } => "Post created",
            ImagePostEvent::PostRenamedV1 { .. } => "Post renamed",
            ImagePostEvent::PostStatusChangedV1 { .. } => "Post status changed",
            ImagePostEvent::TagAddedV1 { .. } => "Tag added",
            ImagePostEvent::TagRemovedV1 { .. } => "Tag removed",
            ImagePostEvent::TagMigratedV1 { .. } => "Tag migrated",
            ImagePostEvent::PostDeletedV1 { .. } => "Post deleted",
        }
    }

    fn description(&self) -> String {
        match self {
            ImagePostEvent::PostCreatedV1 {
                title,
                tags,
                created_by,
                ..
            } => format!(
                "{created_by} created post \"{title}\" with {} tag(s)",
                tags.len()
            ),
            ImagePostEvent::PostRenamedV1 {
                title, renamed_by, ..
            } => format!("{renamed_by} renamed the post to \"{title}\""),
            ImagePostEvent::PostStatusChangedV1 {
                from,
                to,
                reason,
                changed_by,
                ..
            } => match reason {
                Some(reason) => format!("{changed_by} changed status {from} -> {to} ({reason})"),
                None => format!("{changed_by} changed status {from} -> {to}"),
            },
            ImagePostEvent::TagAddedV1 { tag, added_by, .. } => {
                format!("{added_by} added tag {tag}")
            }
            ImagePostEvent::TagRemovedV1 {
                tag, removed_by, ..
            } => format!("{removed_by} removed tag {tag}"),
            ImagePostEvent::TagMigratedV1 {
                source_tag,
                target_tag,
                migrated_by,
                ..
            } => format!("{migrated_by} migrated tag {source_tag} to {target_tag}"),
            ImagePostEvent::PostDeletedV1 { deleted_by, .. } => {
                format!("{deleted_by} deleted the post")
            }
        }
    }

    fn current_version(event_type: &str) -> Option<&'static str> {
        match event_type {
            "post_created_v1" | "post_renamed_v1" | "post_status_changed_v1" | "tag_added_v1"
            | "tag_removed_v1" | "tag_migrated_v1" | "post_deleted_v1" => Some("1.0"),
            _ => None,
        }
    }
}

/// コレクションイベント
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum CollectionEvent {
    CollectionCreatedV1 {
        event_id: String,
        collection_id: CollectionId,
        title: String,
        created_by: UserId,
        timestamp: DateTime<Utc>,
        #[serde(default = "default_v1_version")]
        version: String,
    },
    CollectionRenamedV1 {
        event_id: String,
        collection_id: CollectionId,
        title: String,
        renamed_by: UserId,
        timestamp: DateTime<Utc>,
        #[serde(default = "default_v1_version")]
        version: String,
    },
    ImagePostAddedToCollectionV1 {
        event_id: String,
        collection_id: CollectionId,
        post_id: PostId,
        added_by: UserId,
        timestamp: DateTime<Utc>,
        #[serde(default = "default_v1_version")]
        version: String,
    },
    ImagePostRemovedFromCollectionV1 {
        event_id: String,
        collection_id: CollectionId,
        post_id: PostId,
        removed_by: UserId,
        timestamp: DateTime<Utc>,
        #[serde(default = "default_v1_version")]
        version: String,
    },
    CollectionDeletedV1 {
        event_id: String,
        collection_id: CollectionId,
        deleted_by: UserId,
        timestamp: DateTime<Utc>,
        #[serde(default = "default_v1_version")]
        version: String,
    },
}

impl CollectionEvent {
    pub fn collection_id(&self) -> CollectionId {
        match self {
            CollectionEvent::CollectionCreatedV1 { collection_id, .. }
            | CollectionEvent::CollectionRenamedV1 { collection_id, .. }
            | CollectionEvent::ImagePostAddedToCollectionV1 { collection_id, .. }
            | CollectionEvent::ImagePostRemovedFromCollectionV1 { collection_id, .. }
            | CollectionEvent::CollectionDeletedV1 { collection_id, .. } => *collection_id,
        }
    }

    pub fn new_collection_created(
        collection_id: CollectionId,
        title: String,
        created_by: UserId,
    ) -> Self {
        CollectionEvent::CollectionCreatedV1 {
            event_id: new_event_id(),
            collection_id,
            title,
            created_by,
            timestamp: Utc::now(),
            version: default_v1_version(),
        }
    }

    pub fn new_collection_renamed(
        collection_id: CollectionId,
        title: String,
        renamed_by: UserId,
    ) -> Self {
        CollectionEvent::CollectionRenamedV1 {
            event_id: new_event_id(),
            collection_id,
            title,
            renamed_by,
            timestamp: Utc::now(),
            version: default_v1_version(),
        }
    }

    pub fn new_image_post_added(
        collection_id: CollectionId,
        post_id: PostId,
        added_by: UserId,
    ) -> Self {
        CollectionEvent::ImagePostAddedToCollectionV1 {
            event_id: new_event_id(),
            collection_id,
            post_id,
            added_by,
            timestamp: Utc::now(),
            version: default_v1_version(),
        }
    }

    pub fn new_image_post_removed(
        collection_id: CollectionId,
        post_id: PostId,
        removed_by: UserId,
    ) -> Self {
        CollectionEvent::ImagePostRemovedFromCollectionV1 {
            event_id: new_event_id(),
            collection_id,
            post_id,
            removed_by,
            timestamp: Utc::now(),
            version: default_v1_version(),
        }
    }

    pub fn new_collection_deleted(collection_id: CollectionId, deleted_by: UserId) -> Self {
        CollectionEvent::CollectionDeletedV1 {
            event_id: new_event_id(),
            collection_id,
            deleted_by,
            timestamp: Utc::now(),
            version: default_v1_version(),
        }
    }
}

impl DomainEvent for CollectionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CollectionEvent::CollectionCreatedV1 { .. } => "collection_created_v1",
            CollectionEvent::CollectionRenamedV1 { .. } => "collection_renamed_v1",
            CollectionEvent::ImagePostAddedToCollectionV1 { .. } => {
                "image_post_added_to_collection_v1"
            }
            CollectionEvent::ImagePostRemovedFromCollectionV1 { .. } => {
                "image_post_removed_from_collection_v1"
            }
            CollectionEvent::CollectionDeletedV1 { .. } => "collection_deleted_v1",
        }
    }

    fn event_id(&self) -> &str {
        match self {
            CollectionEvent::CollectionCreatedV1 { event_id, .. }
            | CollectionEvent::CollectionRenamedV1 { event_id, .. }
            | CollectionEvent::ImagePostAddedToCollectionV1 { event_id, .. }
            | CollectionEvent::ImagePostRemovedFromCollectionV1 { event_id, .. }
            | CollectionEvent::CollectionDeletedV1 { event_id, .. } => event_id,
        }
    }

    fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            CollectionEvent::CollectionCreatedV1 { timestamp, .. }
            | CollectionEvent::CollectionRenamedV1 { timestamp, .. }
            | CollectionEvent::ImagePostAddedToCollectionV1 { timestamp, .. }
            | CollectionEvent::ImagePostRemovedFromCollectionV1 { timestamp, .. }
            | CollectionEvent::CollectionDeletedV1 { timestamp, .. } => timestamp,
        }
    }

    fn version(&self) -> &str {
        match self {
            CollectionEvent::CollectionCreatedV1 { version, .. }
            | CollectionEvent::CollectionRenamedV1 { version, .. }
            | CollectionEvent::ImagePostAddedToCollectionV1 { version, .. }
            | CollectionEvent::ImagePostRemovedFromCollectionV1 { version, .. }
            | CollectionEvent::CollectionDeletedV1 { version, .. } => version,
        }
    }

    fn event_name(&self) -> &'static str {
        match self {
            CollectionEvent::CollectionCreatedV1 { .. } => "Collection created",
            CollectionEvent::CollectionRenamedV1 { .. } => "Collection renamed",
            CollectionEvent::ImagePostAddedToCollectionV1 { .. } => "Image post added",
            CollectionEvent::ImagePostRemovedFromCollectionV1 { .. } => "Image post removed",
            CollectionEvent::CollectionDeletedV1 { .. } => "Collection deleted",
        }
    }

    fn description(&self) -> String {
        match self {
            CollectionEvent::CollectionCreatedV1 {
                title, created_by, ..
            } => format!("{created_by} created collection \"{title}\""),
            CollectionEvent::CollectionRenamedV1 {
                title, renamed_by, ..
            } => format!("{renamed_by} renamed the collection to \"{title}\""),
            CollectionEvent::ImagePostAddedToCollectionV1 {
                post_id, added_by, ..
            } => format!("{added_by} added post {post_id}"),
            CollectionEvent::ImagePostRemovedFromCollectionV1 {
                post_id,
                removed_by,
                ..
            } => format!("{removed_by} removed post {post_id}"),
            CollectionEvent::CollectionDeletedV1 { deleted_by, .. } => {
                format!("{deleted_by} deleted the collection")
            }
        }
    }

    fn current_version(event_type: &str) -> Option<&'static str> {
        match event_type {
            "collection_created_v1"
            | "collection_renamed_v1"
            | "image_post_added_to_collection_v1"
            | "image_post_removed_from_collection_v1"
            | "collection_deleted_v1" => Some("1.0"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::TagType;

    fn user() -> UserId {
        UserId::from_string("user123").unwrap()
    }

    #[test]
    fn test_event_version_from_string() {
        let version = EventVersion::from_string("1.5").unwrap();
        assert_eq!(version, EventVersion::new(1, 5));
        assert_eq!(version.to_string(), "1.5");

        assert!(EventVersion::from_string("invalid").is_err());
        assert!(EventVersion::from_string("1").is_err());
        assert!(EventVersion::from_string("1.2.3").is_err());
    }

    #[test]
    fn test_event_version_compatibility() {
        let v1_0 = EventVersion::new(1, 0);
        let v1_1 = EventVersion::new(1, 1);
        let v2_0 = EventVersion::new(2, 0);

        assert!(v1_1.is_compatible_with(&v1_0));
        assert!(!v1_0.is_compatible_with(&v1_1));
        assert!(!v2_0.is_compatible_with(&v1_0));
    }

    #[test]
    fn test_tag_added_json_shape() {
        let post_id = PostId::new();
        let event =
            ImagePostEvent::new_tag_added(post_id, TagData::new(TagType::General, "sunset"), user());

        let json = event.to_json().unwrap();
        assert!(json.contains(r#""event_type":"tag_added_v1""#));
        assert!(json.contains(r#""version":"1.0""#));

        let restored = ImagePostEvent::from_json(&json).unwrap();
        assert_eq!(restored, event);
        assert_eq!(restored.post_id(), post_id);
    }

    #[test]
    fn test_from_json_defaults_missing_version() {
        let post_id = PostId::new();
        let json = format!(
            r#"{{"event_type":"post_deleted_v1","event_id":"e1","post_id":"{post_id}","deleted_by":"user123","timestamp":"2024-01-01T00:00:00Z"}}"#
        );

        let event = ImagePostEvent::from_json(&json).unwrap();
        assert_eq!(event.version(), "1.0");
    }

    #[test]
    fn test_from_json_rejects_unknown_type() {
        let result = ImagePostEvent::from_json(r#"{"event_type":"post_exploded_v1"}"#);
        assert!(matches!(result, Err(EventCodecError::UnknownEventType(_))));
    }

    #[test]
    fn test_from_json_rejects_newer_major() {
        let json = format!(
            r#"{{"event_type":"collection_deleted_v1","event_id":"e1","collection_id":"{}","deleted_by":"user123","timestamp":"2024-01-01T00:00:00Z","version":"2.0"}}"#,
            CollectionId::new()
        );
        let result = CollectionEvent::from_json(&json);
        assert!(matches!(
            result,
            Err(EventCodecError::IncompatibleVersion { .. })
        ));
    }

    #[test]
    fn test_every_event_has_description() {
        let post_id = PostId::new();
        let event = ImagePostEvent::new_tag_migrated(
            post_id,
            TagData::new(TagType::General, "colour"),
            TagData::new(TagType::General, "color"),
            user(),
        );
        assert_eq!(event.event_name(), "Tag migrated");
        assert_eq!(
            event.description(),
            "user123 migrated tag general:colour to general:color"
        );

        let event = CollectionEvent::new_image_post_added(CollectionId::new(), post_id, user());
        assert_eq!(event.description(), format!("user123 added post {post_id}"));
    }
}
