use crate::cascade::{CascadePropagator, CascadeReport};
use crate::tag_resolver::TagResolver;
use domain::{
    combine_pair, DomainError, MigrationPlan, TagData, TagMigrated, TagMigration, UserId,
};
use infrastructure::TagMigrationStore;
use shared::AppError;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// タグ移行の作成と伝播
#[derive(Clone)]
pub struct TagMigrationService {
    store: Arc<dyn TagMigrationStore>,
    resolver: TagResolver,
    propagator: CascadePropagator,
}

impl TagMigrationService {
    pub fn new(
        store: Arc<dyn TagMigrationStore>,
        resolver: TagResolver,
        propagator: CascadePropagator,
    ) -> Self {
        Self {
            store,
            resolver,
            propagator,
        }
    }

    pub fn resolver(&self) -> &TagResolver {
        &self.resolver
    }

    pub async fn find(&self, source: &TagData) -> Result<Option<TagMigration>, AppError> {
        self.store.find_by_source(&source.normalized()?).await
    }

    /// 移行 source → target を作成し、投稿へ伝播するイベントを返す
    ///
    /// 両端は検証して空白を除いてから扱い、target は既存の移行で正規形に
    /// 解決してから保存する。source を移行先に持つ上流の移行は、同じ原子的な
    /// 書き込みで新しい移行先へ付け替える。
    pub async fn migrate(
        &self,
        source: &TagData,
        target: &TagData,
        requested_by: &UserId,
    ) -> Result<TagMigrated, AppError> {
        let (source, target) = combine_pair(source.normalized(), target.normalized())?;
        MigrationPlan::ensure_distinct(&source, &target)?;

        let resolved_target = self.resolver.resolve(&target).await?;
        let existing = self.store.find_by_source(&source).await?;
        let upstream = self.store.find_by_target(&source).await?;

        let plan = MigrationPlan::decide(
            &source,
            &resolved_target,
            existing.as_ref(),
            &upstream,
            requested_by,
        )?;

        let written = if plan.delete.is_empty() {
            self.store.create_one(plan.created.clone()).await
        } else {
            self.store
                .replace_many(plan.delete.clone(), plan.insert.clone())
                .await
        };

        if let Err(e) = written {
            return Err(match e {
                AppError::AlreadyExists(detail) => {
                    warn!(source_tag = %source, detail = %detail, "タグ移行の書き込みが競合");
                    DomainError::conflict(
                        "TagMigration.AlreadyExists",
                        format!("Tag {source} has already been migrated"),
                    )
                    .into()
                }
                other => other,
            });
        }

        info!(
            source_tag = %source,
            target_tag = %resolved_target,
            repointed = plan.delete.len(),
            "タグ移行を作成"
        );
        Ok(plan.event())
    }

    /// 移行を伝播する（再実行すると残りの投稿だけが処理される）
    ///
    /// 記録済みのイベントをそのまま使わず、移行元の現在の移行先へ伝播する。
    pub async fn propagate(
        &self,
        migration: &TagMigrated,
        cancel: &CancellationToken,
    ) -> Result<CascadeReport, AppError> {
        let current = self.current_migration(migration).await?;
        Ok(self.propagator.propagate(&current, cancel).await)
    }

    /// 移行を作成してから伝播する
    pub async fn migrate_and_propagate(
        &self,
        source: &TagData,
        target: &TagData,
        requested_by: &UserId,
        cancel: &CancellationToken,
    ) -> Result<CascadeReport, AppError> {
        let migration = self.migrate(source, target, requested_by).await?;
        self.propagate(&migration, cancel).await
    }

    /// 記録済みの移行イベントを現在の移行グラフに合わせる
    ///
    /// 伝播が中断している間に移行先がさらに移行されていれば、移行元は
    /// 平坦化された新しい移行先を指している。
    async fn current_migration(&self, migration: &TagMigrated) -> Result<TagMigrated, AppError> {
        let source = migration.source_tag.normalized()?;
        let target = self.resolver.resolve(&source).await?;

        if target == source {
            return Err(DomainError::not_found(
                "TagMigration.NotFound",
                format!("No migration is recorded for tag {source}"),
            )
            .into());
        }
        if target != migration.target_tag {
            info!(
                source_tag = %source,
                recorded_target = %migration.target_tag,
                current_target = %target,
                "移行先が変わっているため現在の移行先へ伝播"
            );
        }

        Ok(TagMigrated {
            source_tag: source,
            target_tag: target,
            ..migration.clone()
        })
    }
}
