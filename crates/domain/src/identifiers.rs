use crate::errors::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

macro_rules! ulid_identifier {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Ulid);

        impl $name {
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            pub fn nil() -> Self {
                Self(Ulid::nil())
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }

            pub fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            pub fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// 文字列から作成
            pub fn parse(id: &str) -> DomainResult<Self> {
                Ulid::from_string(id).map(Self).map_err(|e| {
                    DomainError::validation(
                        concat!($label, ".Id.Invalid"),
                        format!("invalid {}: {id} ({e})", $label),
                    )
                    .into()
                })
            }

            pub fn timestamp_ms(&self) -> u64 {
                self.0.timestamp_ms()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::nil()
            }
        }

        impl FromStr for $name {
            type Err = crate::errors::DomainErrors;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

ulid_identifier!(
    /// 画像投稿ID
    PostId,
    "ImagePost"
);

ulid_identifier!(
    /// コレクションID
    CollectionId,
    "Collection"
);

/// ユーザーID
///
/// 認証基盤から渡される不透明な文字列。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// 文字列からユーザーIDを作成
    pub fn from_string(id: impl Into<String>) -> DomainResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DomainError::validation("User.Id.Empty", "User ID cannot be empty").into());
        }
        Ok(Self(id))
    }

    /// システム処理用のユーザー
    pub fn system() -> Self {
        Self("system".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
