mod common;

use async_trait::async_trait;
use common::{general, setup, setup_with, setup_with_post_events, user};
use domain::{AggregateRoot, ErrorKind, ImagePost, ImagePostEvent, PostId, TagData};
use futures::stream::BoxStream;
use futures::TryStreamExt;
use infrastructure::{
    EventStreamStore, InMemoryEventStore, InMemoryPostTagIndex, PostTagIndex, TagIndexChange,
};
use shared::AppError;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// 指定したストリームへの追記だけを失敗させるイベントストア
struct FlakyEventStore {
    inner: InMemoryEventStore<ImagePostEvent>,
    failing: Mutex<HashSet<String>>,
}

impl FlakyEventStore {
    fn new() -> Self {
        Self {
            inner: InMemoryEventStore::new(),
            failing: Mutex::new(HashSet::new()),
        }
    }

    fn fail_for(&self, post_id: PostId) {
        self.failing
            .lock()
            .unwrap()
            .insert(ImagePost::stream_id_for(post_id));
    }

    fn recover(&self) {
        self.failing.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventStreamStore<ImagePostEvent> for FlakyEventStore {
    async fn append(
        &self,
        stream_id: &str,
        expected_version: u64,
        events: &[ImagePostEvent],
    ) -> Result<u64, AppError> {
        let unavailable = self.failing.lock().unwrap().contains(stream_id);
        if unavailable {
            return Err(AppError::ServiceUnavailable(format!("{stream_id} is unavailable")));
        }
        self.inner.append(stream_id, expected_version, events).await
    }

    async fn read_stream(&self, stream_id: &str) -> Result<Vec<ImagePostEvent>, AppError> {
        self.inner.read_stream(stream_id).await
    }
}

/// 有効にすると、タグの削除を含む反映だけを失敗させるインデックス
struct FlakyIndex {
    inner: Arc<InMemoryPostTagIndex>,
    failing: AtomicBool,
}

impl FlakyIndex {
    fn new(inner: Arc<InMemoryPostTagIndex>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
        }
    }

    fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl PostTagIndex for FlakyIndex {
    async fn project(&self, change: &TagIndexChange) -> Result<(), AppError> {
        if self.failing.load(Ordering::SeqCst) && !change.removed.is_empty() {
            return Err(AppError::ServiceUnavailable("index is unavailable".to_string()));
        }
        self.inner.project(change).await
    }

    fn stream_post_ids_with_tag(&self, tag: &TagData) -> BoxStream<'_, Result<PostId, AppError>> {
        self.inner.stream_post_ids_with_tag(tag)
    }
}

/// 有効にした後の最初の反映でキャンセルを要求するインデックス
struct CancellingIndex {
    inner: Arc<InMemoryPostTagIndex>,
    cancel: CancellationToken,
    armed: AtomicBool,
}

impl CancellingIndex {
    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PostTagIndex for CancellingIndex {
    async fn project(&self, change: &TagIndexChange) -> Result<(), AppError> {
        let result = self.inner.project(change).await;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.cancel.cancel();
        }
        result
    }

    fn stream_post_ids_with_tag(&self, tag: &TagData) -> BoxStream<'_, Result<PostId, AppError>> {
        self.inner.stream_post_ids_with_tag(tag)
    }
}

async fn holders(index: &InMemoryPostTagIndex, tag: &TagData) -> Vec<PostId> {
    index.stream_post_ids_with_tag(tag).try_collect().await.unwrap()
}

#[tokio::test]
async fn test_chain_is_flattened_and_resolved() {
    let env = setup();
    let migrations = &env.services.migrations;

    migrations.migrate(&general("aaa"), &general("bbb"), &user()).await.unwrap();
    migrations.migrate(&general("bbb"), &general("ccc"), &user()).await.unwrap();

    let resolver = migrations.resolver();
    assert_eq!(resolver.resolve(&general("aaa")).await.unwrap(), general("ccc"));
    assert_eq!(resolver.resolve(&general("bbb")).await.unwrap(), general("ccc"));
    assert_eq!(resolver.resolve(&general("ccc")).await.unwrap(), general("ccc"));

    let stored = env.migrations.all().await;
    assert_eq!(stored.len(), 2);
    assert!(stored
        .iter()
        .all(|migration| migration.target_tag == general("ccc")));
}

#[tokio::test]
async fn test_target_is_canonicalised_before_storing() {
    let env = setup();
    let migrations = &env.services.migrations;

    migrations.migrate(&general("yyy"), &general("zzz"), &user()).await.unwrap();
    let event = migrations
        .migrate(&general("xxx"), &general("yyy"), &user())
        .await
        .unwrap();

    assert_eq!(event.target_tag, general("zzz"));
    let stored = migrations.find(&general("xxx")).await.unwrap().unwrap();
    assert_eq!(stored.target_tag, general("zzz"));
}

#[tokio::test]
async fn test_self_migration_rejected_before_any_write() {
    let env = setup();

    let error = env
        .services
        .migrations
        .migrate(&general("same"), &general("same"), &user())
        .await
        .unwrap_err();

    assert!(error.has_domain_code("TagMigration.SameTag"));
    assert!(env.migrations.all().await.is_empty());
}

#[tokio::test]
async fn test_source_cannot_be_migrated_twice() {
    let env = setup();
    let migrations = &env.services.migrations;

    migrations.migrate(&general("colour"), &general("color"), &user()).await.unwrap();
    let error = migrations
        .migrate(&general("colour"), &general("hue"), &user())
        .await
        .unwrap_err();

    assert!(error.has_domain_code("TagMigration.AlreadyExists"));
    assert_eq!(error.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_migration_back_into_source_is_cycle() {
    let env = setup();
    let migrations = &env.services.migrations;

    migrations.migrate(&general("yyy"), &general("xxx"), &user()).await.unwrap();
    let error = migrations
        .migrate(&general("xxx"), &general("yyy"), &user())
        .await
        .unwrap_err();

    assert!(error.has_domain_code("TagMigration.Cycle"));
    assert_eq!(env.migrations.all().await.len(), 1);
}

#[tokio::test]
async fn test_new_posts_use_canonical_tags() {
    let env = setup();
    env.services
        .migrations
        .migrate(&general("colour"), &general("color"), &user())
        .await
        .unwrap();

    let post = env
        .services
        .posts
        .create("Palette", &[general("colour")], &user())
        .await
        .unwrap();
    assert!(post.has_tag(&general("color")));
    assert!(!post.has_tag(&general("colour")));

    let post = env
        .services
        .posts
        .add_tags(post.id(), &[general("colour")], &user())
        .await
        .unwrap();
    assert_eq!(post.tags().len(), 1);
}

#[tokio::test]
async fn test_cascade_rewrites_every_holder() {
    let env = setup();
    let posts = &env.services.posts;

    let mut ids = Vec::new();
    for index in 0..5 {
        let post = posts
            .create(&format!("Post {index}"), &[general("colour")], &user())
            .await
            .unwrap();
        ids.push(post.id());
    }
    let both = posts
        .create("Both", &[general("colour"), general("color")], &user())
        .await
        .unwrap();

    let report = env
        .services
        .migrations
        .migrate_and_propagate(
            &general("colour"),
            &general("color"),
            &user(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.rewritten, 6);

    for post_id in ids.iter().copied().chain([both.id()]) {
        let post = posts.get(post_id).await.unwrap();
        assert!(post.has_tag(&general("color")));
        assert!(!post.has_tag(&general("colour")));
    }
    assert_eq!(posts.get(both.id()).await.unwrap().tags().len(), 1);

    let remaining: Vec<PostId> = env
        .index
        .stream_post_ids_with_tag(&general("colour"))
        .try_collect()
        .await
        .unwrap();
    assert!(remaining.is_empty());

    let holders: Vec<PostId> = env
        .index
        .stream_post_ids_with_tag(&general("color"))
        .try_collect()
        .await
        .unwrap();
    assert_eq!(holders.len(), 6);
}

#[tokio::test]
async fn test_migration_without_posts_updates_graph() {
    let env = setup();

    let report = env
        .services
        .migrations
        .migrate_and_propagate(
            &general("unused"),
            &general("spare"),
            &user(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.rewritten, 0);
    assert_eq!(env.migrations.all().await.len(), 1);
}

#[tokio::test]
async fn test_cascade_resumes_with_remaining_posts() {
    let store = Arc::new(FlakyEventStore::new());
    let env = setup_with_post_events(store.clone());
    let posts = &env.services.posts;

    let mut ids = Vec::new();
    for index in 0..5 {
        let post = posts
            .create(&format!("Post {index}"), &[general("colour")], &user())
            .await
            .unwrap();
        ids.push(post.id());
    }
    store.fail_for(ids[1]);
    store.fail_for(ids[3]);

    let migrations = &env.services.migrations;
    let event = migrations
        .migrate(&general("colour"), &general("color"), &user())
        .await
        .unwrap();

    let report = migrations
        .propagate(&event, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.rewritten, 3);

    let mut failed = report.failed_post_ids();
    failed.sort();
    let mut expected = vec![ids[1], ids[3]];
    expected.sort();
    assert_eq!(failed, expected);
    assert!(report
        .failed_batches
        .iter()
        .flat_map(|batch| batch.failures.iter())
        .all(|(_, error)| matches!(error, AppError::ServiceUnavailable(_))));

    store.recover();
    let report = migrations
        .propagate(&event, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_eq!(report.rewritten, 2);
    assert_eq!(report.repaired, 0);

    for post_id in ids {
        assert!(posts.get(post_id).await.unwrap().has_tag(&general("color")));
    }
}

#[tokio::test]
async fn test_cancelled_cascade_keeps_posts_for_rerun() {
    let env = setup();
    let posts = &env.services.posts;

    let post = posts
        .create("Palette", &[general("colour")], &user())
        .await
        .unwrap();
    let migrations = &env.services.migrations;
    let event = migrations
        .migrate(&general("colour"), &general("color"), &user())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = migrations.propagate(&event, &cancel).await.unwrap();
    assert!(report.cancelled);
    assert!(!report.is_complete());
    assert!(posts.get(post.id()).await.unwrap().has_tag(&general("colour")));

    let report = migrations
        .propagate(&event, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_eq!(report.rewritten, 1);
}

#[tokio::test]
async fn test_cancel_between_batches_leaves_consistent_index() {
    let cancel = CancellationToken::new();
    let mut cancelling = None;
    let env = setup_with(
        Arc::new(InMemoryEventStore::<ImagePostEvent>::new()),
        |inner| {
            let index = Arc::new(CancellingIndex {
                inner,
                cancel: cancel.clone(),
                armed: AtomicBool::new(false),
            });
            cancelling = Some(index.clone());
            index as Arc<dyn PostTagIndex>
        },
    );
    let cancelling = cancelling.unwrap();
    let posts = &env.services.posts;

    let mut ids = Vec::new();
    for index in 0..6 {
        let post = posts
            .create(&format!("Post {index}"), &[general("colour")], &user())
            .await
            .unwrap();
        ids.push(post.id());
    }

    let migrations = &env.services.migrations;
    let event = migrations
        .migrate(&general("colour"), &general("color"), &user())
        .await
        .unwrap();

    cancelling.arm();
    let first = migrations.propagate(&event, &cancel).await.unwrap();
    assert!(first.cancelled);
    assert!(first.rewritten >= 1);
    assert!(first.rewritten < ids.len());

    let rest = migrations
        .propagate(&event, &CancellationToken::new())
        .await
        .unwrap();
    assert!(rest.is_complete());
    assert_eq!(first.rewritten + rest.rewritten, ids.len());

    for post_id in &ids {
        assert!(posts.get(*post_id).await.unwrap().has_tag(&general("color")));
    }
    assert!(holders(&env.index, &general("colour")).await.is_empty());
    assert_eq!(holders(&env.index, &general("color")).await.len(), ids.len());
}

#[tokio::test]
async fn test_lost_projection_is_repaired_on_rerun() {
    let mut flaky = None;
    let env = setup_with(
        Arc::new(InMemoryEventStore::<ImagePostEvent>::new()),
        |inner| {
            let index = Arc::new(FlakyIndex::new(inner));
            flaky = Some(index.clone());
            index as Arc<dyn PostTagIndex>
        },
    );
    let flaky = flaky.unwrap();
    let posts = &env.services.posts;
    let migrations = &env.services.migrations;

    let post = posts
        .create("Palette", &[general("colour")], &user())
        .await
        .unwrap();
    let event = migrations
        .migrate(&general("colour"), &general("color"), &user())
        .await
        .unwrap();

    // 追記は成功するが、インデックスへの反映が失われる
    flaky.fail();
    let report = migrations
        .propagate(&event, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.rewritten, 0);
    assert_eq!(report.failed_post_ids(), vec![post.id()]);
    assert!(posts.get(post.id()).await.unwrap().has_tag(&general("color")));
    assert_eq!(holders(&env.index, &general("colour")).await, vec![post.id()]);

    flaky.recover();
    let report = migrations
        .propagate(&event, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_eq!(report.rewritten, 0);
    assert_eq!(report.repaired, 1);
    assert!(holders(&env.index, &general("colour")).await.is_empty());
    assert_eq!(holders(&env.index, &general("color")).await, vec![post.id()]);

    // 修復後は次の移行でも投稿が見つかる
    let report = migrations
        .migrate_and_propagate(
            &general("color"),
            &general("hue"),
            &user(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(report.rewritten, 1);
    let post = posts.get(post.id()).await.unwrap();
    assert!(post.has_tag(&general("hue")));
    assert_eq!(post.tags().len(), 1);
}

#[tokio::test]
async fn test_interrupted_cascade_resumes_onto_current_target() {
    let store = Arc::new(FlakyEventStore::new());
    let env = setup_with_post_events(store.clone());
    let posts = &env.services.posts;
    let migrations = &env.services.migrations;

    let mut ids = Vec::new();
    for index in 0..4 {
        let post = posts
            .create(&format!("Post {index}"), &[general("www")], &user())
            .await
            .unwrap();
        ids.push(post.id());
    }
    store.fail_for(ids[0]);

    let event = migrations
        .migrate(&general("www"), &general("xxx"), &user())
        .await
        .unwrap();
    let report = migrations
        .propagate(&event, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.rewritten, 3);
    assert!(!report.is_complete());

    // 中断中に移行先がさらに移行される
    let report = migrations
        .migrate_and_propagate(
            &general("xxx"),
            &general("yyy"),
            &user(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(report.rewritten, 3);

    store.recover();
    let report = migrations
        .propagate(&event, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_eq!(report.target, general("yyy"));
    assert_eq!(report.rewritten, 1);

    for post_id in ids {
        let post = posts.get(post_id).await.unwrap();
        assert!(post.has_tag(&general("yyy")));
        assert_eq!(post.tags().len(), 1);
    }
}

#[tokio::test]
async fn test_padded_tags_are_normalised() {
    let env = setup();
    let posts = &env.services.posts;
    let migrations = &env.services.migrations;

    migrations
        .migrate(&general("colour"), &general("color"), &user())
        .await
        .unwrap();
    let post = posts
        .create("Palette", &[general(" colour ")], &user())
        .await
        .unwrap();
    assert!(post.has_tag(&general("color")));
    assert!(!post.has_tag(&general("colour")));

    let error = migrations
        .migrate(&general(" same"), &general("same  "), &user())
        .await
        .unwrap_err();
    assert!(error.has_domain_code("TagMigration.SameTag"));

    let evening = posts
        .create("Evening", &[general("sunset")], &user())
        .await
        .unwrap();
    let report = migrations
        .migrate_and_propagate(
            &general(" sunset"),
            &general("  dusk  "),
            &user(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(report.rewritten, 1);

    let stored = migrations.find(&general("sunset")).await.unwrap().unwrap();
    assert_eq!(stored.source_tag, general("sunset"));
    assert_eq!(stored.target_tag, general("dusk"));

    let evening = posts.get(evening.id()).await.unwrap();
    let values: Vec<&str> = evening.tags().iter().map(|tag| tag.value()).collect();
    assert_eq!(values, vec!["dusk"]);
}
