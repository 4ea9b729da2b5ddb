use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// ドメインエラーの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    BusinessRule,
    Forbidden,
    Unauthorized,
    ExternalService,
    Failure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::BusinessRule => "business_rule",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::ExternalService => "external_service",
            ErrorKind::Failure => "failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 想定内のドメイン失敗を表すエラー
///
/// 等価性はコードと種別のみで判定する（説明文は比較しない）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainError {
    code: String,
    description: Option<String>,
    kind: ErrorKind,
}

impl DomainError {
    pub fn new(code: impl Into<String>, description: Option<String>, kind: ErrorKind) -> Self {
        Self {
            code: code.into(),
            description,
            kind,
        }
    }

    pub fn validation(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(code, Some(description.into()), ErrorKind::Validation)
    }

    pub fn not_found(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(code, Some(description.into()), ErrorKind::NotFound)
    }

    pub fn conflict(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(code, Some(description.into()), ErrorKind::Conflict)
    }

    pub fn business_rule(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(code, Some(description.into()), ErrorKind::BusinessRule)
    }

    pub fn failure(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(code, Some(description.into()), ErrorKind::Failure)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{} ({}): {}", self.code, self.kind, description),
            None => write!(f, "{} ({})", self.code, self.kind),
        }
    }
}

impl std::error::Error for DomainError {}

impl PartialEq for DomainError {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.kind == other.kind
    }
}

impl Eq for DomainError {}

impl Hash for DomainError {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code.hash(state);
        self.kind.hash(state);
    }
}

/// 1件以上のドメインエラーの順序付きリスト
///
/// 空のリストは構築できない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainErrors(Vec<DomainError>);

impl DomainErrors {
    /// 複数のエラーから作成（空の場合は None）
    pub fn from_vec(errors: Vec<DomainError>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self(dedup(errors)))
        }
    }

    pub fn first(&self) -> &DomainError {
        // 構築時に非空が保証されている
        &self.0[0]
    }

    pub fn errors(&self) -> &[DomainError] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.0.iter().any(|e| e.code == code)
    }

    pub fn into_vec(self) -> Vec<DomainError> {
        self.0
    }
}

impl From<DomainError> for DomainErrors {
    fn from(error: DomainError) -> Self {
        Self(vec![error])
    }
}

impl fmt::Display for DomainErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

impl std::error::Error for DomainErrors {}

pub type DomainResult<T> = Result<T, DomainErrors>;

/// 独立した検証結果をまとめる
///
/// 途中で打ち切らずにすべての失敗を収集する。
pub fn combine<T>(results: impl IntoIterator<Item = DomainResult<T>>) -> DomainResult<Vec<T>> {
    let mut values = Vec::new();
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(e) => errors.extend(e.into_vec()),
        }
    }

    match DomainErrors::from_vec(errors) {
        Some(errors) => Err(errors),
        None => Ok(values),
    }
}

/// 型の異なる2つの検証結果をまとめる
pub fn combine_pair<A, B>(a: DomainResult<A>, b: DomainResult<B>) -> DomainResult<(A, B)> {
    match (a, b) {
        (Ok(a), Ok(b)) => Ok((a, b)),
        (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
        (Err(a), Err(b)) => {
            let mut errors = a.into_vec();
            errors.extend(b.into_vec());
            Err(DomainErrors(dedup(errors)))
        }
    }
}

fn dedup(errors: Vec<DomainError>) -> Vec<DomainError> {
    let mut unique: Vec<DomainError> = Vec::with_capacity(errors.len());
    for error in errors {
        if !unique.contains(&error) {
            unique.push(error);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_ignores_description() {
        let a = DomainError::validation("Tag.Value.TooShort", "first");
        let b = DomainError::validation("Tag.Value.TooShort", "second");
        let c = DomainError::conflict("Tag.Value.TooShort", "first");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_from_vec_rejects_empty() {
        assert!(DomainErrors::from_vec(vec![]).is_none());
    }

    #[test]
    fn test_combine_collects_every_failure() {
        let results: Vec<DomainResult<u32>> = vec![
            Ok(1),
            Err(DomainError::validation("A", "a").into()),
            Ok(2),
            Err(DomainError::validation("B", "b").into()),
        ];

        let errors = combine(results).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.contains_code("A"));
        assert!(errors.contains_code("B"));
    }

    #[test]
    fn test_combine_collapses_exact_duplicates() {
        let results: Vec<DomainResult<u32>> = vec![
            Err(DomainError::validation("A", "one").into()),
            Err(DomainError::validation("A", "two").into()),
            Err(DomainError::not_found("A", "three").into()),
        ];

        let errors = combine(results).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.first().description(), Some("one"));
    }

    #[test]
    fn test_combine_success() {
        let results: Vec<DomainResult<u32>> = vec![Ok(1), Ok(2)];
        assert_eq!(combine(results).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_combine_pair() {
        let ok: DomainResult<(u32, &str)> = combine_pair(Ok(1), Ok("a"));
        assert_eq!(ok.unwrap(), (1, "a"));

        let errors = combine_pair::<u32, u32>(
            Err(DomainError::validation("A", "a").into()),
            Err(DomainError::validation("B", "b").into()),
        )
        .unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_display() {
        let error = DomainError::validation("Collection.Title.TooShort", "too short");
        assert_eq!(
            error.to_string(),
            "Collection.Title.TooShort (validation): too short"
        );
    }
}
