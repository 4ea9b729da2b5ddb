use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, Utc};
use domain::{PostId, TagData, TagMigration, TagType};
use shared::AppError;
use std::collections::HashMap;

/// DynamoDB アイテムのエンティティタイプ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    Event,
    TagMigration,
    PostTag,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Event => "Event",
            EntityType::TagMigration => "TagMigration",
            EntityType::PostTag => "PostTag",
        }
    }
}

/// DynamoDB Single Table Design のキー構造
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamoDbKeys {
    pub pk: String,              // パーティションキー
    pub sk: String,              // ソートキー
    pub gsi1_pk: Option<String>, // GSI1 パーティションキー
    pub gsi1_sk: Option<String>, // GSI1 ソートキー
}

pub const MIGRATION_SORT_KEY: &str = "MIGRATION";
pub const GSI1_INDEX_NAME: &str = "GSI1";

impl DynamoDbKeys {
    /// ストリームのパーティションキー
    pub fn stream_pk(stream_id: &str) -> String {
        format!("STREAM#{stream_id}")
    }

    /// イベント用のキー（バージョンはゼロ埋めで辞書順 = 追記順）
    pub fn for_event(stream_id: &str, version: u64) -> Self {
        Self {
            pk: Self::stream_pk(stream_id),
            sk: format!("EVENT#{version:020}"),
            gsi1_pk: None,
            gsi1_sk: None,
        }
    }

    pub fn migration_pk(source: &TagData) -> String {
        format!("TAGMIGRATION#{}", tag_key(source))
    }

    pub fn migration_target_pk(target: &TagData) -> String {
        format!("TAGMIGRATION_TARGET#{}", tag_key(target))
    }

    /// タグ移行用のキー（GSI1 で移行先から引ける）
    pub fn for_tag_migration(source: &TagData, target: &TagData) -> Self {
        Self {
            pk: Self::migration_pk(source),
            sk: MIGRATION_SORT_KEY.to_string(),
            gsi1_pk: Some(Self::migration_target_pk(target)),
            gsi1_sk: Some(Self::migration_pk(source)),
        }
    }

    pub fn post_tag_pk(tag: &TagData) -> String {
        format!("POSTTAG#{}", tag_key(tag))
    }

    /// タグ → 投稿 インデックス用のキー
    pub fn for_post_tag(tag: &TagData, post_id: PostId) -> Self {
        Self {
            pk: Self::post_tag_pk(tag),
            sk: format!("POST#{post_id}"),
            gsi1_pk: None,
            gsi1_sk: None,
        }
    }
}

fn tag_key(tag: &TagData) -> String {
    format!("{}#{}", tag.tag_type, tag.value)
}

/// イベント用のDynamoDBアイテム
#[derive(Debug, Clone, PartialEq)]
pub struct EventItem {
    pub stream_id: String,
    pub version: u64,
    pub event_type: String,
    pub data: String,
    pub created_at: DateTime<Utc>,
}

impl EventItem {
    pub fn to_attribute_map(&self) -> HashMap<String, AttributeValue> {
        let keys = DynamoDbKeys::for_event(&self.stream_id, self.version);
        let mut map = base_map(&keys, EntityType::Event);

        map.insert("StreamId".to_string(), AttributeValue::S(self.stream_id.clone()));
        map.insert("Version".to_string(), AttributeValue::N(self.version.to_string()));
        map.insert("EventType".to_string(), AttributeValue::S(self.event_type.clone()));
        map.insert("Data".to_string(), AttributeValue::S(self.data.clone()));
        map.insert(
            "CreatedAt".to_string(),
            AttributeValue::S(self.created_at.to_rfc3339()),
        );

        map
    }

    pub fn from_attribute_map(map: &HashMap<String, AttributeValue>) -> Result<Self, AppError> {
        ensure_entity_type(map, EntityType::Event)?;

        Ok(Self {
            stream_id: get_s(map, "StreamId")?.to_string(),
            version: get_n(map, "Version")?,
            event_type: get_s(map, "EventType")?.to_string(),
            data: get_s(map, "Data")?.to_string(),
            created_at: get_datetime(map, "CreatedAt")?,
        })
    }
}

/// タグ移行用のDynamoDBアイテム
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationItem {
    pub migration: TagMigration,
}

impl MigrationItem {
    pub fn new(migration: TagMigration) -> Self {
        Self { migration }
    }

    pub fn to_attribute_map(&self) -> Result<HashMap<String, AttributeValue>, AppError> {
        let source = &self.migration.source_tag;
        let target = &self.migration.target_tag;
        let keys = DynamoDbKeys::for_tag_migration(source, target);
        let mut map = base_map(&keys, EntityType::TagMigration);

        let data = serde_json::to_string(&self.migration)
            .map_err(|e| AppError::Serialization(format!("tag migration: {e}")))?;

        // 条件式で移行先を比較するための属性
        map.insert(
            "TargetKey".to_string(),
            AttributeValue::S(DynamoDbKeys::migration_target_pk(target)),
        );
        map.insert("Data".to_string(), AttributeValue::S(data));
        map.insert(
            "UpdatedAt".to_string(),
            AttributeValue::S(self.migration.last_modified_at.to_rfc3339()),
        );

        Ok(map)
    }

    pub fn from_attribute_map(map: &HashMap<String, AttributeValue>) -> Result<Self, AppError> {
        ensure_entity_type(map, EntityType::TagMigration)?;

        let migration: TagMigration = serde_json::from_str(get_s(map, "Data")?)
            .map_err(|e| AppError::Deserialization(format!("tag migration: {e}")))?;

        Ok(Self { migration })
    }
}

/// タグ → 投稿 インデックスのDynamoDBアイテム
#[derive(Debug, Clone, PartialEq)]
pub struct PostTagItem {
    pub tag: TagData,
    pub post_id: PostId,
}

impl PostTagItem {
    pub fn to_attribute_map(&self) -> HashMap<String, AttributeValue> {
        let keys = DynamoDbKeys::for_post_tag(&self.tag, self.post_id);
        let mut map = base_map(&keys, EntityType::PostTag);

        map.insert(
            "TagType".to_string(),
            AttributeValue::S(self.tag.tag_type.as_str().to_string()),
        );
        map.insert("TagValue".to_string(), AttributeValue::S(self.tag.value.clone()));
        map.insert("PostId".to_string(), AttributeValue::S(self.post_id.to_string()));

        map
    }

    pub fn from_attribute_map(map: &HashMap<String, AttributeValue>) -> Result<Self, AppError> {
        ensure_entity_type(map, EntityType::PostTag)?;

        let tag_type = TagType::from_string(get_s(map, "TagType")?)
            .map_err(|e| AppError::Deserialization(e.to_string()))?;
        let post_id = PostId::parse(get_s(map, "PostId")?)
            .map_err(|e| AppError::Deserialization(e.to_string()))?;

        Ok(Self {
            tag: TagData::new(tag_type, get_s(map, "TagValue")?),
            post_id,
        })
    }
}

fn base_map(keys: &DynamoDbKeys, entity_type: EntityType) -> HashMap<String, AttributeValue> {
    let mut map = HashMap::new();

    map.insert("PK".to_string(), AttributeValue::S(keys.pk.clone()));
    map.insert("SK".to_string(), AttributeValue::S(keys.sk.clone()));
    map.insert(
        "EntityType".to_string(),
        AttributeValue::S(entity_type.as_str().to_string()),
    );

    if let Some(gsi1_pk) = &keys.gsi1_pk {
        map.insert("GSI1PK".to_string(), AttributeValue::S(gsi1_pk.clone()));
    }
    if let Some(gsi1_sk) = &keys.gsi1_sk {
        map.insert("GSI1SK".to_string(), AttributeValue::S(gsi1_sk.clone()));
    }

    map
}

fn ensure_entity_type(
    map: &HashMap<String, AttributeValue>,
    expected: EntityType,
) -> Result<(), AppError> {
    let actual = get_s(map, "EntityType")?;
    if actual != expected.as_str() {
        return Err(AppError::Deserialization(format!(
            "expected {} item but found {actual}",
            expected.as_str()
        )));
    }
    Ok(())
}

fn get_s<'a>(map: &'a HashMap<String, AttributeValue>, name: &str) -> Result<&'a String, AppError> {
    map.get(name)
        .and_then(|v| v.as_s().ok())
        .ok_or_else(|| AppError::Deserialization(format!("Missing {name}")))
}

fn get_n(map: &HashMap<String, AttributeValue>, name: &str) -> Result<u64, AppError> {
    map.get(name)
        .and_then(|v| v.as_n().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| AppError::Deserialization(format!("Missing or invalid {name}")))
}

fn get_datetime(map: &HashMap<String, AttributeValue>, name: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(get_s(map, name)?)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Deserialization(format!("Invalid {name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::UserId;

    fn tag(value: &str) -> TagData {
        TagData::new(TagType::General, value)
    }

    #[test]
    fn test_keys_for_event() {
        let keys = DynamoDbKeys::for_event("image-post-01ARZ3NDEKTSV4RRFFQ69G5FAV", 7);
        assert_eq!(keys.pk, "STREAM#image-post-01ARZ3NDEKTSV4RRFFQ69G5FAV");
        assert_eq!(keys.sk, "EVENT#00000000000000000007");
        assert!(keys.gsi1_pk.is_none());
    }

    #[test]
    fn test_event_sort_keys_order_by_version() {
        let nine = DynamoDbKeys::for_event("s", 9).sk;
        let ten = DynamoDbKeys::for_event("s", 10).sk;
        assert!(nine < ten);
    }

    #[test]
    fn test_keys_for_tag_migration() {
        let keys = DynamoDbKeys::for_tag_migration(&tag("colour"), &tag("color"));
        assert_eq!(keys.pk, "TAGMIGRATION#general#colour");
        assert_eq!(keys.sk, "MIGRATION");
        assert_eq!(
            keys.gsi1_pk.as_deref(),
            Some("TAGMIGRATION_TARGET#general#color")
        );
    }

    #[test]
    fn test_keys_for_post_tag() {
        let post_id = PostId::new();
        let keys = DynamoDbKeys::for_post_tag(&TagData::new(TagType::Artist, "hokusai"), post_id);
        assert_eq!(keys.pk, "POSTTAG#artist#hokusai");
        assert_eq!(keys.sk, format!("POST#{post_id}"));
    }

    #[test]
    fn test_event_item_attribute_map() {
        let item = EventItem {
            stream_id: "image-post-1".to_string(),
            version: 3,
            event_type: "tag_added_v1".to_string(),
            data: r#"{"event_type":"tag_added_v1"}"#.to_string(),
            created_at: Utc::now(),
        };

        let map = item.to_attribute_map();
        assert_eq!(map.get("EntityType").unwrap().as_s().unwrap(), "Event");
        assert_eq!(map.get("Version").unwrap().as_n().unwrap(), "3");

        let restored = EventItem::from_attribute_map(&map).unwrap();
        assert_eq!(restored.version, 3);
        assert_eq!(restored.data, item.data);
    }

    #[test]
    fn test_migration_item_attribute_map() {
        let migration = TagMigration::new(
            tag("colour"),
            tag("color"),
            UserId::from_string("moderator").unwrap(),
        );
        let map = MigrationItem::new(migration.clone()).to_attribute_map().unwrap();

        assert_eq!(
            map.get("TargetKey").unwrap().as_s().unwrap(),
            "TAGMIGRATION_TARGET#general#color"
        );
        let restored = MigrationItem::from_attribute_map(&map).unwrap();
        assert_eq!(restored.migration, migration);
    }

    #[test]
    fn test_entity_type_mismatch() {
        let item = PostTagItem {
            tag: tag("sunset"),
            post_id: PostId::new(),
        };
        let map = item.to_attribute_map();

        assert_eq!(PostTagItem::from_attribute_map(&map).unwrap(), item);
        assert!(matches!(
            EventItem::from_attribute_map(&map),
            Err(AppError::Deserialization(_))
        ));
    }
}
