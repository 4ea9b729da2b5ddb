use crate::events::DomainEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// イベントソーシング集約のルート
///
/// 状態はイベントの適用によってのみ変化する。`apply` はコマンド直後の
/// 適用でも履歴からの再構築でも同じ結果にならなければならない。
pub trait AggregateRoot: Sized {
    type Id: Copy + Eq + std::fmt::Display;
    type Event: DomainEvent;

    /// ストリーム名の接頭辞（例: "image-post"）
    const KIND: &'static str;

    fn id(&self) -> Self::Id;

    /// 適用済みイベント数
    fn version(&self) -> u64;

    fn apply(&mut self, event: &Self::Event);

    /// ストリームID
    fn stream_id_for(id: Self::Id) -> String {
        format!("{}-{}", Self::KIND, id)
    }

    fn stream_id(&self) -> String {
        Self::stream_id_for(self.id())
    }

    /// 履歴から状態を再構築
    fn replay<'a>(history: impl IntoIterator<Item = &'a Self::Event>) -> Self
    where
        Self: Default,
        Self::Event: 'a,
    {
        let mut aggregate = Self::default();
        for event in history {
            aggregate.apply(event);
        }
        aggregate
    }
}

/// 未コミットのイベントを保持した集約
///
/// 判定結果のイベントを適用済みの状態と、永続化待ちのイベントを一緒に運ぶ。
/// `commit` で消費されるため、保留バッファのクリアは一度だけ行われる。
#[derive(Debug, Clone)]
pub struct Uncommitted<A: AggregateRoot> {
    state: A,
    pending: Vec<A::Event>,
    expected_version: u64,
}

impl<A: AggregateRoot> Uncommitted<A> {
    pub fn new(state: A) -> Self {
        let expected_version = state.version();
        Self {
            state,
            pending: Vec::new(),
            expected_version,
        }
    }

    /// 判定済みのイベントを適用して保留に積む
    pub fn record(mut self, events: Vec<A::Event>) -> Self {
        for event in &events {
            self.state.apply(event);
        }
        self.pending.extend(events);
        self
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    pub fn pending_events(&self) -> &[A::Event] {
        &self.pending
    }

    pub fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// 追記時に期待するストリームのバージョン
    pub fn expected_version(&self) -> u64 {
        self.expected_version
    }

    /// 永続化成功後に呼び出し、保留イベントを破棄して状態を返す
    pub fn commit(self) -> A {
        self.state
    }

    pub fn into_parts(self) -> (A, Vec<A::Event>) {
        (self.state, self.pending)
    }
}

/// 履歴表示用のエントリ
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub event_id: String,
    pub event_name: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn from_event<E: DomainEvent>(event: &E) -> Self {
        Self {
            event_id: event.event_id().to_string(),
            event_name: event.event_name().to_string(),
            description: event.description(),
            timestamp: *event.timestamp(),
        }
    }

    /// 記録順の履歴
    pub fn from_events<'a, E: DomainEvent>(events: impl IntoIterator<Item = &'a E>) -> Vec<Self> {
        events.into_iter().map(Self::from_event).collect()
    }
}
