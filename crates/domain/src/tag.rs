use crate::errors::{combine, DomainError, DomainErrors, DomainResult};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const TAG_VALUE_MIN_LENGTH: usize = 3;
pub const TAG_VALUE_MAX_LENGTH: usize = 30;

/// タグの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagType {
    General,
    Artist,
    Character,
    Series,
    Meta,
}

impl TagType {
    /// 文字列からタグ種別を作成
    pub fn from_string(tag_type: &str) -> DomainResult<Self> {
        match tag_type.to_lowercase().as_str() {
            "general" => Ok(TagType::General),
            "artist" => Ok(TagType::Artist),
            "character" => Ok(TagType::Character),
            "series" => Ok(TagType::Series),
            "meta" => Ok(TagType::Meta),
            _ => Err(DomainError::validation(
                "Tag.Type.Invalid",
                format!("Invalid tag type: {tag_type}"),
            )
            .into()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TagType::General => "general",
            TagType::Artist => "artist",
            TagType::Character => "character",
            TagType::Series => "series",
            TagType::Meta => "meta",
        }
    }
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 検証済みのタグ
///
/// `Tag::new` だけが生成経路で、不正な入力からは値が作られない。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "TagData", into = "TagData")]
pub struct Tag {
    tag_type: TagType,
    value: String,
}

impl Tag {
    pub fn new(tag_type: TagType, value: impl Into<String>) -> DomainResult<Self> {
        let value = value.into().trim().to_string();

        if value.is_empty() {
            return Err(DomainError::validation("Tag.Value.Empty", "Tag value cannot be blank").into());
        }

        let length = value.chars().count();
        if length < TAG_VALUE_MIN_LENGTH {
            return Err(DomainError::validation(
                "Tag.Value.TooShort",
                format!("Tag value must be at least {TAG_VALUE_MIN_LENGTH} characters: {value}"),
            )
            .into());
        }
        if length > TAG_VALUE_MAX_LENGTH {
            return Err(DomainError::validation(
                "Tag.Value.TooLong",
                format!("Tag value must be at most {TAG_VALUE_MAX_LENGTH} characters: {value}"),
            )
            .into());
        }

        Ok(Self { tag_type, value })
    }

    /// 複数のタグをまとめて検証（すべてのエラーを返す）
    pub fn parse_many<'a>(tags: impl IntoIterator<Item = &'a TagData>) -> DomainResult<Vec<Tag>> {
        combine(tags.into_iter().map(TagData::to_tag))
    }

    /// 記録済みイベントからの復元用（検証済みの値のみを渡すこと）
    pub(crate) fn from_trusted(data: &TagData) -> Self {
        Self {
            tag_type: data.tag_type,
            value: data.value.clone(),
        }
    }

    /// TagData と同じ組を表すか（前後の空白は無視する）
    pub fn matches(&self, data: &TagData) -> bool {
        self.tag_type == data.tag_type && self.value == data.value.trim()
    }

    pub fn tag_type(&self) -> TagType {
        self.tag_type
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn to_data(&self) -> TagData {
        TagData::new(self.tag_type, self.value.clone())
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tag_type, self.value)
    }
}

/// 未検証のタグ（種別と値の組）
///
/// 移行レコードの端点など、上流で検証済みの値を運ぶために使う。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagData {
    pub tag_type: TagType,
    pub value: String,
}

impl TagData {
    pub fn new(tag_type: TagType, value: impl Into<String>) -> Self {
        Self {
            tag_type,
            value: value.into(),
        }
    }

    pub fn to_tag(&self) -> DomainResult<Tag> {
        Tag::new(self.tag_type, self.value.clone())
    }

    /// 検証を通した正規形（前後の空白を除いた値）
    ///
    /// 移行レコードの検索や保存の前に使い、空白だけが違う組を同じタグとして扱う。
    pub fn normalized(&self) -> DomainResult<TagData> {
        self.to_tag().map(TagData::from)
    }
}

impl TryFrom<TagData> for Tag {
    type Error = DomainErrors;

    fn try_from(data: TagData) -> Result<Self, Self::Error> {
        Tag::new(data.tag_type, data.value)
    }
}

impl From<Tag> for TagData {
    fn from(tag: Tag) -> Self {
        Self {
            tag_type: tag.tag_type,
            value: tag.value,
        }
    }
}

impl From<&Tag> for TagData {
    fn from(tag: &Tag) -> Self {
        tag.to_data()
    }
}

impl fmt::Display for TagData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tag_type, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_creation_within_bounds() {
        for length in TAG_VALUE_MIN_LENGTH..=TAG_VALUE_MAX_LENGTH {
            let value = "a".repeat(length);
            let tag = Tag::new(TagType::General, value.clone()).unwrap();
            assert_eq!(tag.value(), value);
        }
    }

    #[test]
    fn test_tag_too_short() {
        let error = Tag::new(TagType::General, "ab").unwrap_err();
        assert!(error.contains_code("Tag.Value.TooShort"));
    }

    #[test]
    fn test_tag_too_long() {
        let error = Tag::new(TagType::Artist, "a".repeat(31)).unwrap_err();
        assert!(error.contains_code("Tag.Value.TooLong"));
    }

    #[test]
    fn test_tag_blank() {
        let error = Tag::new(TagType::Meta, "   ").unwrap_err();
        assert!(error.contains_code("Tag.Value.Empty"));
        assert!(!error.contains_code("Tag.Value.TooShort"));
    }

    #[test]
    fn test_tag_length_counts_characters() {
        // マルチバイト文字は1文字として数える
        assert!(Tag::new(TagType::Character, "猫耳娘").is_ok());
    }

    #[test]
    fn test_tag_equality() {
        let a = Tag::new(TagType::General, "landscape").unwrap();
        let b = Tag::new(TagType::General, "landscape").unwrap();
        let c = Tag::new(TagType::Series, "landscape").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_parse_many_collects_all_errors() {
        let tags = vec![
            TagData::new(TagType::General, "ok-tag"),
            TagData::new(TagType::General, "no"),
            TagData::new(TagType::General, "x".repeat(40)),
        ];

        let errors = Tag::parse_many(&tags).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.contains_code("Tag.Value.TooShort"));
        assert!(errors.contains_code("Tag.Value.TooLong"));
    }

    #[test]
    fn test_normalized_trims_and_validates() {
        let padded = TagData::new(TagType::General, "  colour ");
        assert_eq!(
            padded.normalized().unwrap(),
            TagData::new(TagType::General, "colour")
        );
        assert!(Tag::new(TagType::General, "colour").unwrap().matches(&padded));

        let errors = TagData::new(TagType::General, " ab ").normalized().unwrap_err();
        assert!(errors.contains_code("Tag.Value.TooShort"));
    }

    #[test]
    fn test_tag_type_from_string() {
        assert_eq!(TagType::from_string("ARTIST").unwrap(), TagType::Artist);
        assert!(TagType::from_string("unknown").is_err());
    }

    #[test]
    fn test_tag_deserialization_validates() {
        let ok: Tag = serde_json::from_str(r#"{"tag_type":"general","value":"sunset"}"#).unwrap();
        assert_eq!(ok.value(), "sunset");

        let invalid = serde_json::from_str::<Tag>(r#"{"tag_type":"general","value":"x"}"#);
        assert!(invalid.is_err());
    }
}
