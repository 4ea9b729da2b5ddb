use crate::dynamodb::{build_error, is_condition_failure, sdk_error, DynamoDbClient, MAX_TRANSACT_ITEMS};
use crate::models::{DynamoDbKeys, EventItem};
use crate::ports::EventStreamStore;
use async_trait::async_trait;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{AttributeValue, ConditionCheck, Put, TransactWriteItem};
use domain::DomainEvent;
use shared::{AppError, DynamoDbRetryExecutor};
use std::marker::PhantomData;
use tracing::{debug, info, warn};

/// DynamoDB 上のイベントストリーム
///
/// PK = `STREAM#<stream id>`, SK = `EVENT#<20桁のバージョン>`。
/// 追記は1つの TransactWriteItems で、期待バージョンの先頭イベントの存在確認と
/// 新しいバージョンの条件付き書き込みを行う。
pub struct DynamoDbEventStore<E> {
    db: DynamoDbClient,
    _event: PhantomData<fn() -> E>,
}

impl<E> DynamoDbEventStore<E> {
    pub fn new(db: DynamoDbClient) -> Self {
        Self {
            db,
            _event: PhantomData,
        }
    }
}

impl<E: DomainEvent> DynamoDbEventStore<E> {
    /// 追記トランザクションの内容を組み立てる
    fn build_append_items(
        &self,
        stream_id: &str,
        expected_version: u64,
        events: &[E],
    ) -> Result<Vec<TransactWriteItem>, AppError> {
        let mut items = Vec::with_capacity(events.len() + 1);

        if expected_version > 0 {
            let head = DynamoDbKeys::for_event(stream_id, expected_version);
            let check = ConditionCheck::builder()
                .table_name(self.db.table_name())
                .key("PK", AttributeValue::S(head.pk))
                .key("SK", AttributeValue::S(head.sk))
                .condition_expression("attribute_exists(PK)")
                .build()
                .map_err(build_error)?;
            items.push(TransactWriteItem::builder().condition_check(check).build());
        }

        for (offset, event) in events.iter().enumerate() {
            let item = EventItem {
                stream_id: stream_id.to_string(),
                version: expected_version + offset as u64 + 1,
                event_type: event.event_type().to_string(),
                data: event.to_json()?,
                created_at: *event.timestamp(),
            };

            let put = Put::builder()
                .table_name(self.db.table_name())
                .set_item(Some(item.to_attribute_map()))
                .condition_expression("attribute_not_exists(PK)")
                .build()
                .map_err(build_error)?;
            items.push(TransactWriteItem::builder().put(put).build());
        }

        if items.len() > MAX_TRANSACT_ITEMS {
            return Err(AppError::Internal(format!(
                "too many events in one append to {stream_id}: {}",
                events.len()
            )));
        }

        Ok(items)
    }
}

#[async_trait]
impl<E: DomainEvent> EventStreamStore<E> for DynamoDbEventStore<E> {
    async fn append(
        &self,
        stream_id: &str,
        expected_version: u64,
        events: &[E],
    ) -> Result<u64, AppError> {
        if events.is_empty() {
            return Ok(expected_version);
        }

        info!(
            stream_id,
            expected_version,
            event_count = events.len(),
            "イベント追記開始"
        );

        let items = self.build_append_items(stream_id, expected_version, events)?;

        DynamoDbRetryExecutor::execute(|| async {
            let result = self
                .db
                .client()
                .transact_write_items()
                .set_transact_items(Some(items.clone()))
                .send()
                .await;

            match result {
                Ok(_) => Ok(()),
                Err(error) => match error.as_service_error() {
                    Some(TransactWriteItemsError::TransactionCanceledException(cancelled))
                        if is_condition_failure(cancelled.cancellation_reasons()) =>
                    {
                        warn!(stream_id, expected_version, "バージョン不一致");
                        Err(AppError::VersionConflict {
                            stream_id: stream_id.to_string(),
                            expected: expected_version,
                        })
                    }
                    _ => Err(sdk_error("transact_write_items", error)),
                },
            }
        })
        .await
        .into_result()?;

        let version = expected_version + events.len() as u64;
        debug!(stream_id, version, "イベント追記完了");
        Ok(version)
    }

    async fn read_stream(&self, stream_id: &str) -> Result<Vec<E>, AppError> {
        let mut pages = self
            .db
            .client()
            .query()
            .table_name(self.db.table_name())
            .key_condition_expression("PK = :pk AND begins_with(SK, :prefix)")
            .expression_attribute_values(":pk", AttributeValue::S(DynamoDbKeys::stream_pk(stream_id)))
            .expression_attribute_values(":prefix", AttributeValue::S("EVENT#".to_string()))
            .consistent_read(true)
            .into_paginator()
            .items()
            .send();

        let mut events = Vec::new();
        while let Some(item) = pages.next().await {
            let item = item.map_err(|e| sdk_error("query", e))?;
            let record = EventItem::from_attribute_map(&item)?;

            let expected = events.len() as u64 + 1;
            if record.version != expected {
                return Err(AppError::InvariantViolation(format!(
                    "stream {stream_id} has a gap: expected version {expected}, found {}",
                    record.version
                )));
            }

            events.push(E::from_json(&record.data)?);
        }

        debug!(stream_id, event_count = events.len(), "イベント読み込み完了");
        Ok(events)
    }
}
