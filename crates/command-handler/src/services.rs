use crate::cascade::{CascadeConfig, CascadePropagator};
use crate::collection_service::CollectionService;
use crate::image_post_service::ImagePostService;
use crate::tag_migration_service::TagMigrationService;
use crate::tag_resolver::TagResolver;
use domain::{Collection, CollectionEvent, ImagePost, ImagePostEvent};
use infrastructure::{
    DynamoDbClient, DynamoDbEventStore, DynamoDbPostTagIndex, DynamoDbTagMigrationStore,
    EventSourcedRepository, EventStreamStore, InMemoryEventStore, InMemoryPostTagIndex,
    InMemoryTagMigrationStore, PostTagIndex, TagMigrationStore,
};
use shared::{init_tracing, AppError, Config, OptimisticLockRetryExecutor};
use std::sync::Arc;
use tracing::{debug, info};

/// コマンド処理に必要なアダプター一式
pub struct Adapters {
    pub post_events: Arc<dyn EventStreamStore<ImagePostEvent>>,
    pub collection_events: Arc<dyn EventStreamStore<CollectionEvent>>,
    pub migrations: Arc<dyn TagMigrationStore>,
    pub index: Arc<dyn PostTagIndex>,
}

impl Adapters {
    /// メモリ上のアダプター（テスト・ローカル開発用）
    pub fn in_memory() -> Self {
        Self {
            post_events: Arc::new(InMemoryEventStore::<ImagePostEvent>::new()),
            collection_events: Arc::new(InMemoryEventStore::<CollectionEvent>::new()),
            migrations: Arc::new(InMemoryTagMigrationStore::new()),
            index: Arc::new(InMemoryPostTagIndex::new()),
        }
    }

    /// 単一テーブルの DynamoDB アダプター
    pub fn dynamodb(db: DynamoDbClient) -> Self {
        Self {
            post_events: Arc::new(DynamoDbEventStore::<ImagePostEvent>::new(db.clone())),
            collection_events: Arc::new(DynamoDbEventStore::<CollectionEvent>::new(db.clone())),
            migrations: Arc::new(DynamoDbTagMigrationStore::new(db.clone())),
            index: Arc::new(DynamoDbPostTagIndex::new(db)),
        }
    }
}

/// 組み立て済みのコマンドサービス
#[derive(Clone)]
pub struct CommandServices {
    pub posts: ImagePostService,
    pub collections: CollectionService,
    pub migrations: TagMigrationService,
}

impl CommandServices {
    pub fn new(config: &Config, adapters: Adapters) -> Self {
        let retry = OptimisticLockRetryExecutor::from_config(config);
        let resolver = TagResolver::from_config(Arc::clone(&adapters.migrations), config);
        let post_repository = EventSourcedRepository::<ImagePost>::new(adapters.post_events);

        let posts = ImagePostService::new(
            post_repository.clone(),
            Arc::clone(&adapters.index),
            resolver.clone(),
            retry.clone(),
        );
        let collections = CollectionService::new(
            EventSourcedRepository::<Collection>::new(adapters.collection_events),
            post_repository,
            retry,
        );
        let propagator = CascadePropagator::new(
            adapters.index,
            posts.clone(),
            CascadeConfig::from_config(config),
        );
        let migrations = TagMigrationService::new(adapters.migrations, resolver, propagator);

        Self {
            posts,
            collections,
            migrations,
        }
    }

    pub fn in_memory(config: &Config) -> Self {
        Self::new(config, Adapters::in_memory())
    }

    /// 環境変数の設定で DynamoDB に接続して組み立てる
    ///
    /// 埋め込み先がサブスクライバーを設定していなければ JSON ログを初期化する。
    pub async fn from_env() -> Result<Self, AppError> {
        if let Err(e) = init_tracing() {
            debug!(error = %e, "トレーシングは初期化済み");
        }
        let config = Config::from_env()?;
        let db = DynamoDbClient::new(&config).await;
        info!(
            table = %config.dynamodb_table,
            environment = %config.environment,
            "コマンドサービスを初期化"
        );
        Ok(Self::new(&config, Adapters::dynamodb(db)))
    }
}
