#![allow(dead_code)]

use command_handler::{Adapters, CommandServices};
use domain::{CollectionEvent, ImagePostEvent, TagData, TagType, UserId};
use infrastructure::{
    EventStreamStore, InMemoryEventStore, InMemoryPostTagIndex, InMemoryTagMigrationStore,
    PostTagIndex,
};
use shared::Config;
use std::sync::Arc;

pub fn user() -> UserId {
    UserId::from_string("user123").unwrap()
}

pub fn general(value: &str) -> TagData {
    TagData::new(TagType::General, value)
}

pub fn test_config() -> Config {
    Config {
        retry_initial_delay_ms: 1,
        cascade_batch_size: 2,
        cascade_max_concurrency: 2,
        ..Config::default()
    }
}

/// テスト用の環境（ストアを直接確認できるようにする）
pub struct TestEnv {
    pub services: CommandServices,
    pub migrations: Arc<InMemoryTagMigrationStore>,
    pub index: Arc<InMemoryPostTagIndex>,
}

pub fn setup() -> TestEnv {
    setup_with_post_events(Arc::new(InMemoryEventStore::<ImagePostEvent>::new()))
}

pub fn setup_with_post_events(post_events: Arc<dyn EventStreamStore<ImagePostEvent>>) -> TestEnv {
    setup_with(post_events, |index| index as Arc<dyn PostTagIndex>)
}

/// インデックスを差し替えた環境（`wrap` には実体のインデックスが渡される）
pub fn setup_with(
    post_events: Arc<dyn EventStreamStore<ImagePostEvent>>,
    wrap: impl FnOnce(Arc<InMemoryPostTagIndex>) -> Arc<dyn PostTagIndex>,
) -> TestEnv {
    let migrations = Arc::new(InMemoryTagMigrationStore::new());
    let index = Arc::new(InMemoryPostTagIndex::with_page_size(3));

    let adapters = Adapters {
        post_events,
        collection_events: Arc::new(InMemoryEventStore::<CollectionEvent>::new()),
        migrations: migrations.clone(),
        index: wrap(index.clone()),
    };

    TestEnv {
        services: CommandServices::new(&test_config(), adapters),
        migrations,
        index,
    }
}
