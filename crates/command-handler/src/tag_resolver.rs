use domain::{Tag, TagData};
use infrastructure::TagMigrationStore;
use shared::{AppError, Config};
use std::sync::Arc;
use tracing::{debug, error};

/// タグを移行チェーンの終端（正規形）まで解決する
///
/// 読み取り専用。移行レコードを作成・変更することはない。
#[derive(Clone)]
pub struct TagResolver {
    store: Arc<dyn TagMigrationStore>,
    hop_limit: usize,
}

impl TagResolver {
    pub fn new(store: Arc<dyn TagMigrationStore>, hop_limit: usize) -> Self {
        Self {
            store,
            hop_limit: hop_limit.max(1),
        }
    }

    pub fn from_config(store: Arc<dyn TagMigrationStore>, config: &Config) -> Self {
        Self::new(store, config.migration_hop_limit)
    }

    /// 1つのタグを正規化してから解決する（移行がなければ正規化した値のまま）
    ///
    /// ホップ上限に達した場合は移行グラフが壊れているので
    /// `AppError::InvariantViolation` を返す。
    pub async fn resolve(&self, tag: &TagData) -> Result<TagData, AppError> {
        let tag = tag.normalized()?;
        self.follow(tag).await
    }

    /// 入力順を保ったまますべてのタグを解決する
    ///
    /// 検証エラーは解決の前にまとめて返す。
    pub async fn resolve_all(&self, tags: &[TagData]) -> Result<Vec<TagData>, AppError> {
        let tags = Tag::parse_many(tags)?;

        let mut resolved = Vec::with_capacity(tags.len());
        for tag in tags {
            resolved.push(self.follow(tag.into()).await?);
        }
        Ok(resolved)
    }

    async fn follow(&self, tag: TagData) -> Result<TagData, AppError> {
        let mut current = tag.clone();

        for _ in 0..self.hop_limit {
            match self.store.find_by_source(&current).await? {
                Some(migration) => current = migration.target_tag,
                None => {
                    if current != tag {
                        debug!(tag = %tag, resolved = %current, "タグを解決");
                    }
                    return Ok(current);
                }
            }
        }

        error!(tag = %tag, hop_limit = self.hop_limit, "移行チェーンがホップ上限に達した");
        Err(AppError::InvariantViolation(format!(
            "migration chain from {tag} exceeds {} hops",
            self.hop_limit
        )))
    }
}
