use crate::dynamodb::{build_error, sdk_error, DynamoDbClient, MAX_TRANSACT_ITEMS};
use crate::models::{DynamoDbKeys, PostTagItem};
use crate::ports::{PostTagIndex, TagIndexChange};
use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, Delete, Put, TransactWriteItem};
use domain::{PostId, TagData};
use futures::stream::{self, BoxStream, StreamExt};
use shared::{AppError, DynamoDbRetryExecutor};
use tracing::debug;

/// DynamoDB 上のタグ → 投稿 インデックス
///
/// PK = `POSTTAG#<type>#<value>`, SK = `POST#<post id>`。
#[derive(Clone)]
pub struct DynamoDbPostTagIndex {
    db: DynamoDbClient,
    page_size: i32,
}

impl DynamoDbPostTagIndex {
    pub fn new(db: DynamoDbClient) -> Self {
        Self { db, page_size: 250 }
    }

    /// クエリ1回あたりの取得件数を指定
    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn build_change_items(&self, change: &TagIndexChange) -> Result<Vec<TransactWriteItem>, AppError> {
        let mut items = Vec::with_capacity(change.added.len() + change.removed.len());

        for tag in &change.removed {
            let keys = DynamoDbKeys::for_post_tag(tag, change.post_id);
            let removal = Delete::builder()
                .table_name(self.db.table_name())
                .key("PK", AttributeValue::S(keys.pk))
                .key("SK", AttributeValue::S(keys.sk))
                .build()
                .map_err(build_error)?;
            items.push(TransactWriteItem::builder().delete(removal).build());
        }

        for tag in &change.added {
            let item = PostTagItem {
                tag: tag.clone(),
                post_id: change.post_id,
            };
            let put = Put::builder()
                .table_name(self.db.table_name())
                .set_item(Some(item.to_attribute_map()))
                .build()
                .map_err(build_error)?;
            items.push(TransactWriteItem::builder().put(put).build());
        }

        Ok(items)
    }
}

#[async_trait]
impl PostTagIndex for DynamoDbPostTagIndex {
    async fn project(&self, change: &TagIndexChange) -> Result<(), AppError> {
        if change.is_empty() {
            return Ok(());
        }

        let items = self.build_change_items(change)?;

        // 各操作は冪等なので、上限を超える場合は分割して書き込む
        for chunk in items.chunks(MAX_TRANSACT_ITEMS) {
            DynamoDbRetryExecutor::execute(|| async {
                self.db
                    .client()
                    .transact_write_items()
                    .set_transact_items(Some(chunk.to_vec()))
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| sdk_error("transact_write_items", e))
            })
            .await
            .into_result()?;
        }

        debug!(
            post_id = %change.post_id,
            added = change.added.len(),
            removed = change.removed.len(),
            "タグインデックスを更新"
        );
        Ok(())
    }

    fn stream_post_ids_with_tag(&self, tag: &TagData) -> BoxStream<'_, Result<PostId, AppError>> {
        let pages = self
            .db
            .client()
            .query()
            .table_name(self.db.table_name())
            .key_condition_expression("PK = :pk AND begins_with(SK, :prefix)")
            .expression_attribute_values(":pk", AttributeValue::S(DynamoDbKeys::post_tag_pk(tag)))
            .expression_attribute_values(":prefix", AttributeValue::S("POST#".to_string()))
            .limit(self.page_size)
            .into_paginator()
            .items()
            .send();

        stream::unfold(pages, |mut pages| async move {
            let item = pages.next().await?;
            let post_id = item
                .map_err(|e| sdk_error("query", e))
                .and_then(|item| PostTagItem::from_attribute_map(&item))
                .map(|record| record.post_id);
            Some((post_id, pages))
        })
        .boxed()
    }
}
