use crate::ports::EventStreamStore;
use domain::{AggregateRoot, HistoryEntry, Uncommitted};
use shared::AppError;
use std::sync::Arc;
use tracing::{debug, info};

/// イベントストリームを介した集約の読み込み・保存
pub struct EventSourcedRepository<A: AggregateRoot> {
    store: Arc<dyn EventStreamStore<A::Event>>,
}

impl<A: AggregateRoot> Clone for EventSourcedRepository<A> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<A> EventSourcedRepository<A>
where
    A: AggregateRoot + Default,
{
    pub fn new(store: Arc<dyn EventStreamStore<A::Event>>) -> Self {
        Self { store }
    }

    /// ストリームを読み込んで集約を再構築する
    ///
    /// ストリームが空なら既定の（存在しない）集約を返す。
    pub async fn load(&self, id: A::Id) -> Result<A, AppError> {
        let stream_id = A::stream_id_for(id);
        let events = self.store.read_stream(&stream_id).await?;
        debug!(stream_id = %stream_id, event_count = events.len(), "集約を再構築");
        Ok(A::replay(&events))
    }

    /// 記録順の履歴
    pub async fn history(&self, id: A::Id) -> Result<Vec<HistoryEntry>, AppError> {
        let events = self.store.read_stream(&A::stream_id_for(id)).await?;
        Ok(HistoryEntry::from_events(&events))
    }

    /// 保留イベントを追記し、コミット済みの集約を返す
    ///
    /// 変更がなければストアには触れない。
    pub async fn save(&self, uncommitted: Uncommitted<A>) -> Result<A, AppError> {
        if !uncommitted.has_changes() {
            return Ok(uncommitted.commit());
        }

        let stream_id = uncommitted.state().stream_id();
        let expected_version = uncommitted.expected_version();
        let version = self
            .store
            .append(&stream_id, expected_version, uncommitted.pending_events())
            .await?;

        info!(
            stream_id = %stream_id,
            version,
            event_count = uncommitted.pending_events().len(),
            "集約を保存"
        );
        Ok(uncommitted.commit())
    }
}
