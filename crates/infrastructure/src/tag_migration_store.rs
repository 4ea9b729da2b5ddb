use crate::dynamodb::{build_error, is_condition_failure, sdk_error, DynamoDbClient, MAX_TRANSACT_ITEMS};
use crate::models::{DynamoDbKeys, MigrationItem, GSI1_INDEX_NAME, MIGRATION_SORT_KEY};
use crate::ports::TagMigrationStore;
use async_trait::async_trait;
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{AttributeValue, Delete, Put, TransactWriteItem};
use domain::{TagData, TagMigration};
use shared::{AppError, DynamoDbRetryExecutor};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// DynamoDB 上のタグ移行ストア
///
/// 移行元ごとに1アイテム（PK = `TAGMIGRATION#<type>#<value>`）。
/// GSI1 は移行先で引くためのインデックス。
#[derive(Clone)]
pub struct DynamoDbTagMigrationStore {
    db: DynamoDbClient,
}

impl DynamoDbTagMigrationStore {
    pub fn new(db: DynamoDbClient) -> Self {
        Self { db }
    }

    /// 削除・付け替え・新規挿入を1つのトランザクションに組み立てる
    ///
    /// 同じ移行元を削除して挿入する場合は、旧移行先を条件にした上書きにまとめる。
    pub fn build_replace_items(
        &self,
        delete: &[TagMigration],
        insert: &[TagMigration],
    ) -> Result<Vec<TransactWriteItem>, AppError> {
        let mut items = Vec::with_capacity(delete.len() + insert.len());
        let mut overwritten: HashSet<&TagData> = HashSet::new();

        for migration in insert {
            let previous = delete
                .iter()
                .find(|old| old.source_tag == migration.source_tag);
            let item = MigrationItem::new(migration.clone()).to_attribute_map()?;

            let put = match previous {
                Some(old) => {
                    overwritten.insert(&old.source_tag);
                    Put::builder()
                        .table_name(self.db.table_name())
                        .set_item(Some(item))
                        .condition_expression("TargetKey = :old_target")
                        .expression_attribute_values(
                            ":old_target",
                            AttributeValue::S(DynamoDbKeys::migration_target_pk(&old.target_tag)),
                        )
                        .build()
                        .map_err(build_error)?
                }
                None => Put::builder()
                    .table_name(self.db.table_name())
                    .set_item(Some(item))
                    .condition_expression("attribute_not_exists(PK)")
                    .build()
                    .map_err(build_error)?,
            };
            items.push(TransactWriteItem::builder().put(put).build());
        }

        for old in delete {
            if overwritten.contains(&old.source_tag) {
                continue;
            }
            let removal = Delete::builder()
                .table_name(self.db.table_name())
                .key("PK", AttributeValue::S(DynamoDbKeys::migration_pk(&old.source_tag)))
                .key("SK", AttributeValue::S(MIGRATION_SORT_KEY.to_string()))
                .condition_expression("TargetKey = :old_target")
                .expression_attribute_values(
                    ":old_target",
                    AttributeValue::S(DynamoDbKeys::migration_target_pk(&old.target_tag)),
                )
                .build()
                .map_err(build_error)?;
            items.push(TransactWriteItem::builder().delete(removal).build());
        }

        if items.len() > MAX_TRANSACT_ITEMS {
            return Err(AppError::Internal(format!(
                "tag migration batch exceeds {MAX_TRANSACT_ITEMS} items: {}",
                items.len()
            )));
        }

        Ok(items)
    }
}

#[async_trait]
impl TagMigrationStore for DynamoDbTagMigrationStore {
    async fn find_by_source(&self, tag: &TagData) -> Result<Option<TagMigration>, AppError> {
        let output = DynamoDbRetryExecutor::execute(|| async {
            self.db
                .client()
                .get_item()
                .table_name(self.db.table_name())
                .key("PK", AttributeValue::S(DynamoDbKeys::migration_pk(tag)))
                .key("SK", AttributeValue::S(MIGRATION_SORT_KEY.to_string()))
                .consistent_read(true)
                .send()
                .await
                .map_err(|e| sdk_error("get_item", e))
        })
        .await
        .into_result()?;

        output
            .item()
            .map(|item| MigrationItem::from_attribute_map(item).map(|record| record.migration))
            .transpose()
    }

    async fn find_by_target(&self, tag: &TagData) -> Result<Vec<TagMigration>, AppError> {
        let mut pages = self
            .db
            .client()
            .query()
            .table_name(self.db.table_name())
            .index_name(GSI1_INDEX_NAME)
            .key_condition_expression("GSI1PK = :pk")
            .expression_attribute_values(
                ":pk",
                AttributeValue::S(DynamoDbKeys::migration_target_pk(tag)),
            )
            .into_paginator()
            .items()
            .send();

        let mut migrations = Vec::new();
        while let Some(item) = pages.next().await {
            let item = item.map_err(|e| sdk_error("query", e))?;
            migrations.push(MigrationItem::from_attribute_map(&item)?.migration);
        }

        debug!(target_tag = %tag, count = migrations.len(), "上流の移行を取得");
        Ok(migrations)
    }

    async fn create_one(&self, migration: TagMigration) -> Result<(), AppError> {
        let item = MigrationItem::new(migration.clone()).to_attribute_map()?;

        let result = self
            .db
            .client()
            .put_item()
            .table_name(self.db.table_name())
            .set_item(Some(item))
            .condition_expression("attribute_not_exists(PK)")
            .send()
            .await;

        match result {
            Ok(_) => {
                info!(source_tag = %migration.source_tag, target_tag = %migration.target_tag, "タグ移行を作成");
                Ok(())
            }
            Err(error) => match error.as_service_error() {
                Some(PutItemError::ConditionalCheckFailedException(_)) => Err(
                    AppError::AlreadyExists(format!("tag migration from {}", migration.source_tag)),
                ),
                _ => Err(sdk_error("put_item", error)),
            },
        }
    }

    async fn replace_many(
        &self,
        delete: Vec<TagMigration>,
        insert: Vec<TagMigration>,
    ) -> Result<(), AppError> {
        let items = self.build_replace_items(&delete, &insert)?;
        if items.is_empty() {
            return Ok(());
        }

        let result = self
            .db
            .client()
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await;

        match result {
            Ok(_) => {
                info!(
                    deleted = delete.len(),
                    inserted = insert.len(),
                    "タグ移行を一括更新"
                );
                Ok(())
            }
            Err(error) => match error.as_service_error() {
                Some(TransactWriteItemsError::TransactionCanceledException(cancelled))
                    if is_condition_failure(cancelled.cancellation_reasons()) =>
                {
                    warn!("タグ移行の一括更新が競合により取り消された");
                    Err(AppError::AlreadyExists(
                        "tag migration graph was changed concurrently".to_string(),
                    ))
                }
                _ => Err(sdk_error("transact_write_items", error)),
            },
        }
    }
}
