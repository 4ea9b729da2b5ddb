use crate::errors::{DomainError, DomainResult};
use crate::events::DomainEvent;
use crate::identifiers::UserId;
use crate::tag::TagData;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// タグ移行レコード（移行元 → 移行先の辺）
///
/// 同じ移行元を持つレコードは常に高々1件。移行先が他のレコードの
/// 移行元になることはない（1ホップに平坦化された状態）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagMigration {
    pub source_tag: TagData,
    pub target_tag: TagData,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub last_modified_by: UserId,
    pub last_modified_at: DateTime<Utc>,
}

impl TagMigration {
    pub fn new(source_tag: TagData, target_tag: TagData, created_by: UserId) -> Self {
        let now = Utc::now();
        Self {
            source_tag,
            target_tag,
            last_modified_by: created_by.clone(),
            created_by,
            created_at: now,
            last_modified_at: now,
        }
    }

    /// 移行先を付け替えたレコード（作成者・作成日時は保持）
    pub fn repointed(&self, target_tag: TagData, modified_by: &UserId) -> Self {
        Self {
            source_tag: self.source_tag.clone(),
            target_tag,
            created_by: self.created_by.clone(),
            created_at: self.created_at,
            last_modified_by: modified_by.clone(),
            last_modified_at: Utc::now(),
        }
    }
}

/// 移行ストアへの一括書き込み内容
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationPlan {
    /// 新規に作成する移行
    pub created: TagMigration,
    /// 付け替えのために削除する上流の移行
    pub delete: Vec<TagMigration>,
    /// 付け替え後の上流の移行と新規の移行
    pub insert: Vec<TagMigration>,
}

impl MigrationPlan {
    /// 移行 source → target の書き込み内容を判定
    ///
    /// `target` は既存の移行で解決済みの正規形を渡す。
    /// `existing` は source を移行元に持つ既存レコード、`upstream` は
    /// source を移行先に持つ既存レコード。
    pub fn decide(
        source: &TagData,
        target: &TagData,
        existing: Option<&TagMigration>,
        upstream: &[TagMigration],
        requested_by: &UserId,
    ) -> DomainResult<Self> {
        if existing.is_some() {
            return Err(DomainError::conflict(
                "TagMigration.AlreadyExists",
                format!("Tag {source} has already been migrated"),
            )
            .into());
        }

        if source == target {
            return Err(DomainError::conflict(
                "TagMigration.Cycle",
                format!("Migrating {source} would resolve back to itself"),
            )
            .into());
        }

        let created = TagMigration::new(source.clone(), target.clone(), requested_by.clone());
        // 移行先そのものを移行元とする上流は自己移行になるので付け替えずに削除する
        let mut insert: Vec<TagMigration> = upstream
            .iter()
            .filter(|migration| &migration.source_tag != target)
            .map(|migration| migration.repointed(target.clone(), requested_by))
            .collect();
        insert.push(created.clone());

        Ok(Self {
            created,
            delete: upstream.to_vec(),
            insert,
        })
    }

    /// 自己移行は永続化の前に拒否する
    pub fn ensure_distinct(source: &TagData, target: &TagData) -> DomainResult<()> {
        if source == target {
            return Err(DomainError::validation(
                "TagMigration.SameTag",
                format!("Cannot migrate tag {source} to itself"),
            )
            .into());
        }
        Ok(())
    }

    pub fn event(&self) -> TagMigrated {
        TagMigrated::new(
            self.created.source_tag.clone(),
            self.created.target_tag.clone(),
            self.created.created_by.clone(),
        )
    }
}

fn default_v1_version() -> String {
    "1.0".to_string()
}

/// タグ移行が作成されたことを表すイベント
///
/// 移行元タグを持つ各投稿のストリームへ伝播される。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename = "tag_migration_created_v1")]
pub struct TagMigrated {
    pub event_id: String,
    pub source_tag: TagData,
    pub target_tag: TagData,
    pub migrated_by: UserId,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_v1_version")]
    pub version: String,
}

impl TagMigrated {
    pub fn new(source_tag: TagData, target_tag: TagData, migrated_by: UserId) -> Self {
        Self {
            event_id: ulid::Ulid::new().to_string(),
            source_tag,
            target_tag,
            migrated_by,
            timestamp: Utc::now(),
            version: default_v1_version(),
        }
    }
}

impl DomainEvent for TagMigrated {
    fn event_type(&self) -> &'static str {
        "tag_migration_created_v1"
    }

    fn event_id(&self) -> &str {
        &self.event_id
    }

    fn timestamp(&self) -> &DateTime<Utc> {
        &self.timestamp
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn event_name(&self) -> &'static str {
        "Tag migration created"
    }

    fn description(&self) -> String {
        format!(
            "{} merged tag {} into {}",
            self.migrated_by, self.source_tag, self.target_tag
        )
    }

    fn current_version(event_type: &str) -> Option<&'static str> {
        (event_type == "tag_migration_created_v1").then_some("1.0")
    }
}
