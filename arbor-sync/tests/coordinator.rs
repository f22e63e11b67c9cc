//! End-to-end coordinator behaviour against the local remote backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use arbor_core::config::{Config, RemoteBackend, RemoteConfig};
use arbor_core::registry;
use arbor_core::tree::Tree;
use arbor_core::types::{Account, BranchName, OwnerId, ProjectKey, ProjectType, RepoRef};
use arbor_sync::remote::local::LocalConnector;
use arbor_sync::remote::{EntryType, RemoteConnector, RemoteError, RemoteStore};
use arbor_sync::{
    CacheStore, Coordinator, DiskCacheStore, LocalSandbox, NotLinkedReason, RemoteMirror,
    Sandbox, SyncError, SyncSession,
};
use arbor_templates::Renderer;
use arbor_walker::ExclusionSet;

const OWNER: &str = "ada";

struct Env {
    home: TempDir,
}

impl Env {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            home: TempDir::new().unwrap(),
        }
    }

    fn remote_root(&self) -> std::path::PathBuf {
        self.home.path().join("remote")
    }

    fn config(&self) -> Config {
        Config {
            remote: RemoteConfig {
                backend: RemoteBackend::Local,
                local_root: Some(self.remote_root()),
                ..RemoteConfig::default()
            },
            ..Config::default()
        }
    }

    fn coordinator_with(&self, cache: Arc<dyn CacheStore>) -> Coordinator {
        Coordinator::new(
            self.home.path(),
            self.config(),
            cache,
            Arc::new(LocalConnector::new(self.remote_root())),
            Renderer::new().unwrap(),
        )
    }

    fn coordinator(&self) -> Coordinator {
        self.coordinator_with(Arc::new(DiskCacheStore::new(self.home.path())))
    }

    fn link_account(&self) {
        let mut account = Account::new(OWNER);
        account.remote_token = Some(OWNER.to_string());
        registry::save_account_at(self.home.path(), &account).unwrap();
    }

    fn store(&self) -> Arc<dyn RemoteStore> {
        LocalConnector::new(self.remote_root()).connect(OWNER).unwrap()
    }
}

fn owner() -> OwnerId {
    OwnerId::from(OWNER)
}

async fn remote_files(store: &dyn RemoteStore, repo: &RepoRef) -> Vec<(String, String)> {
    let head = store.get_ref(repo, &BranchName::default()).await.unwrap();
    let mut files = Vec::new();
    for entry in store.get_tree(repo, &head, true).await.unwrap() {
        if entry.entry_type == EntryType::Blob {
            let bytes = store.get_blob(repo, &entry.sha).await.unwrap();
            files.push((entry.path, String::from_utf8(bytes).unwrap()));
        }
    }
    files
}

// ---------------------------------------------------------------------------
// Load / Save
// ---------------------------------------------------------------------------

#[tokio::test]
async fn save_then_load_returns_the_same_tree() {
    let env = Env::new();
    let coord = env.coordinator();
    let project = coord
        .create(&owner(), "Site", ProjectType::Blank, Some(Tree::new()))
        .await
        .unwrap();

    let tree = Tree::from_files([
        ("index.html", "<h1>hi</h1>"),
        ("src/app.js", "main()"),
        ("src/lib/util.js", ""),
    ])
    .unwrap();
    coord.save(&project.key(), tree.clone(), None).await.unwrap();

    assert_eq!(coord.load(&project.key()).await.unwrap(), tree);
}

#[tokio::test]
async fn load_without_cache_or_remote_is_empty() {
    let env = Env::new();
    let project = registry::create_project_at(
        env.home.path(),
        &owner(),
        "Bare",
        ProjectType::Blank,
        None,
        BranchName::default(),
    )
    .unwrap();

    let tree = env.coordinator().load(&project.key()).await.unwrap();
    assert!(tree.is_empty());
}

#[tokio::test]
async fn load_of_unknown_project_fails() {
    let env = Env::new();
    let key = ProjectKey::new(OWNER, 42);
    let err = env.coordinator().load(&key).await.unwrap_err();
    assert!(matches!(err, SyncError::ProjectNotFound(k) if k == key));
}

#[tokio::test]
async fn save_touches_updated_at() {
    let env = Env::new();
    let coord = env.coordinator();
    let project = coord
        .create(&owner(), "Site", ProjectType::Blank, Some(Tree::new()))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    coord.save(&project.key(), Tree::new(), None).await.unwrap();
    let after = coord.project(&project.key()).await.unwrap();
    assert!(after.updated_at > project.updated_at);
}

#[tokio::test]
async fn save_with_session_follows_the_live_tree() {
    let env = Env::new();
    let coord = env.coordinator();
    let project = coord
        .create(&owner(), "Site", ProjectType::Blank, Some(Tree::new()))
        .await
        .unwrap();

    let sandbox_dir = TempDir::new().unwrap();
    let sandbox = LocalSandbox::boot(sandbox_dir.path(), ExclusionSet::default())
        .await
        .unwrap();
    let live = Tree::from_files([("index.html", "from the shell")]).unwrap();
    sandbox.mount(&live).await.unwrap();
    let session = SyncSession::new(project.key(), Arc::new(sandbox));

    let editor = Tree::from_files([("index.html", "stale"), ("draft.txt", "editor only")]).unwrap();
    let saved = coord
        .save(&project.key(), editor, Some(session))
        .await
        .unwrap();

    assert_eq!(saved.tree, live);
    assert_eq!(saved.dropped, vec!["draft.txt"]);
    assert_eq!(coord.load(&project.key()).await.unwrap(), live);
}

// ---------------------------------------------------------------------------
// Push / Pull / Init
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unlinked_push_init_save_push_pull_scenario() {
    let env = Env::new();
    let coord = env.coordinator();
    let project = coord
        .create(&owner(), "Scenario", ProjectType::Blank, Some(Tree::new()))
        .await
        .unwrap();
    let key = project.key();

    let err = coord.push(&key).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::NotLinked {
            reason: NotLinkedReason::NoRepository,
            ..
        }
    ));

    env.link_account();
    let linked = coord.init(&key).await.unwrap();
    let repo = linked.remote_repo.clone().unwrap();
    let store = env.store();
    assert!(remote_files(store.as_ref(), &repo).await.is_empty());

    let tree = Tree::from_files([("a.txt", "hi")]).unwrap();
    coord.save(&key, tree.clone(), None).await.unwrap();
    let outcome = coord.push(&key).await.unwrap();
    assert_eq!(outcome.files, 1);
    assert_eq!(
        remote_files(store.as_ref(), &repo).await,
        vec![("a.txt".to_string(), "hi".to_string())]
    );

    let fresh_cache = TempDir::new().unwrap();
    let second = env.coordinator_with(Arc::new(DiskCacheStore::new(fresh_cache.path())));
    assert_eq!(second.pull(&key, None).await.unwrap(), tree);
}

#[tokio::test]
async fn pull_replaces_the_cached_tree() {
    let env = Env::new();
    env.link_account();
    let coord = env.coordinator();
    let project = coord
        .create(&owner(), "Site", ProjectType::Blank, Some(Tree::new()))
        .await
        .unwrap();
    let key = project.key();

    let remote = Tree::from_files([("shared.txt", "remote")]).unwrap();
    coord.save(&key, remote.clone(), None).await.unwrap();
    coord.push(&key).await.unwrap();

    let local = Tree::from_files([("shared.txt", "local edit"), ("only/local.txt", "x")]).unwrap();
    coord.save(&key, local, None).await.unwrap();

    assert_eq!(coord.pull(&key, None).await.unwrap(), remote);
    assert_eq!(coord.load(&key).await.unwrap(), remote);
}

#[tokio::test]
async fn load_of_linked_project_seeds_the_cache_from_the_remote() {
    let env = Env::new();
    env.link_account();
    let coord = env.coordinator();
    let project = coord
        .create(&owner(), "Site", ProjectType::Html, None)
        .await
        .unwrap();
    let pushed = coord.load(&project.key()).await.unwrap();

    let fresh_cache = TempDir::new().unwrap();
    let cache = Arc::new(DiskCacheStore::new(fresh_cache.path()));
    let second = env.coordinator_with(cache.clone());
    assert!(cache.load(&project.key()).await.unwrap().is_none());

    let loaded = second.load(&project.key()).await.unwrap();
    assert!(loaded.same_files(&pushed));
    assert!(cache.load(&project.key()).await.unwrap().is_some());
}

#[tokio::test]
async fn init_twice_is_already_linked() {
    let env = Env::new();
    let coord = env.coordinator();
    let project = coord
        .create(&owner(), "Site", ProjectType::Blank, Some(Tree::new()))
        .await
        .unwrap();
    env.link_account();
    coord.init(&project.key()).await.unwrap();

    let err = coord.init(&project.key()).await.unwrap_err();
    assert!(matches!(err, SyncError::AlreadyLinked { .. }));
}

#[tokio::test]
async fn init_without_credential_changes_nothing() {
    let env = Env::new();
    let coord = env.coordinator();
    let project = coord
        .create(&owner(), "Site", ProjectType::Blank, Some(Tree::new()))
        .await
        .unwrap();

    let err = coord.init(&project.key()).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::NotLinked {
            reason: NotLinkedReason::NoCredential,
            ..
        }
    ));
    assert!(!coord.project(&project.key()).await.unwrap().is_linked());
}

#[tokio::test]
async fn push_with_nothing_saved_is_reported() {
    let env = Env::new();
    env.link_account();
    let project = registry::create_project_at(
        env.home.path(),
        &owner(),
        "Linked",
        ProjectType::Blank,
        Some(RepoRef::from("ada/linked")),
        BranchName::default(),
    )
    .unwrap();

    let err = env.coordinator().push(&project.key()).await.unwrap_err();
    assert!(matches!(err, SyncError::NoCachedTree(_)));
}

struct RejectingConnector;

impl RemoteConnector for RejectingConnector {
    fn connect(&self, _credential: &str) -> Result<Arc<dyn RemoteStore>, RemoteError> {
        Err(RemoteError::Unauthorized("bad credentials".to_string()))
    }
}

#[tokio::test]
async fn rejected_credential_leaves_the_cache_alone() {
    let env = Env::new();
    env.link_account();
    let project = registry::create_project_at(
        env.home.path(),
        &owner(),
        "Linked",
        ProjectType::Blank,
        Some(RepoRef::from("ada/linked")),
        BranchName::default(),
    )
    .unwrap();
    let cache = Arc::new(DiskCacheStore::new(env.home.path()));
    let tree = Tree::from_files([("keep.txt", "mine")]).unwrap();
    cache.save(&project.key(), &tree).await.unwrap();

    let coord = Coordinator::new(
        env.home.path(),
        env.config(),
        cache.clone(),
        Arc::new(RejectingConnector),
        Renderer::new().unwrap(),
    );
    let err = coord.pull(&project.key(), None).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::RemoteRejected(RemoteError::Unauthorized(_))
    ));
    assert_eq!(cache.load(&project.key()).await.unwrap(), Some(tree));
}

#[tokio::test]
async fn history_lists_pushes_newest_first() {
    let env = Env::new();
    env.link_account();
    let coord = env.coordinator();
    let project = coord
        .create(&owner(), "Site", ProjectType::Blank, Some(Tree::new()))
        .await
        .unwrap();
    let key = project.key();
    coord.save(&key, Tree::from_files([("a", "1")]).unwrap(), None).await.unwrap();
    let pushed = coord.push(&key).await.unwrap();

    let history = coord.history(&key, 10).await.unwrap();
    // initial commit, creation push, explicit push
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].sha, pushed.commit);
    assert_eq!(coord.history(&key, 1).await.unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Create / Import / Delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_seeds_from_the_template() {
    let env = Env::new();
    let coord = env.coordinator();
    let project = coord
        .create(&owner(), "My Page", ProjectType::Html, None)
        .await
        .unwrap();
    assert!(!project.is_linked());

    let tree = coord.load(&project.key()).await.unwrap();
    assert!(tree.content_of("index.html").unwrap().contains("My Page"));
}

#[tokio::test]
async fn create_with_credential_links_and_pushes() {
    let env = Env::new();
    env.link_account();
    let coord = env.coordinator();
    let files = Tree::from_files([("main.py", "print(1)")]).unwrap();
    let project = coord
        .create(&owner(), "Tool", ProjectType::Blank, Some(files))
        .await
        .unwrap();

    let repo = project.remote_repo.clone().unwrap();
    assert!(repo.0.starts_with("ada/arbor-tool-"));
    assert_eq!(
        remote_files(env.store().as_ref(), &repo).await,
        vec![("main.py".to_string(), "print(1)".to_string())]
    );
}

#[tokio::test]
async fn create_allocates_sequential_ids() {
    let env = Env::new();
    let coord = env.coordinator();
    let owner_id = owner();
    let (a, b) = tokio::join!(
        coord.create(&owner_id, "One", ProjectType::Blank, Some(Tree::new())),
        coord.create(&owner_id, "Two", ProjectType::Blank, Some(Tree::new())),
    );
    let mut ids = vec![a.unwrap().id.0, b.unwrap().id.0];
    ids.sort();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(coord.list(&owner()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn import_binds_a_new_project_to_an_existing_repository() {
    let env = Env::new();
    env.link_account();
    let store = env.store();
    let repo = store.create_repository("existing", true).await.unwrap();
    let tree = Tree::from_files([("README.md", "# existing"), ("src/lib.rs", "")]).unwrap();
    RemoteMirror::new(store, ExclusionSet::default(), "seed")
        .push_tree(&repo, &BranchName::default(), &tree)
        .await
        .unwrap();

    let coord = env.coordinator();
    let project = coord
        .import(&owner(), repo.clone(), "Existing", None)
        .await
        .unwrap();
    assert_eq!(project.project_type, ProjectType::Imported);
    assert_eq!(project.remote_repo, Some(repo));
    assert_eq!(coord.load(&project.key()).await.unwrap(), tree);
}

#[tokio::test]
async fn import_without_credential_names_the_owner() {
    let env = Env::new();
    let err = env
        .coordinator()
        .import(&owner(), RepoRef::from("ada/x"), "X", None)
        .await
        .unwrap_err();
    match err {
        SyncError::NotLinked { subject, reason } => {
            assert_eq!(subject, "owner ada");
            assert_eq!(reason, NotLinkedReason::NoCredential);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(env.coordinator().list(&owner()).await.unwrap().is_empty());
}

#[tokio::test]
async fn import_of_missing_repository_creates_no_project() {
    let env = Env::new();
    env.link_account();
    let coord = env.coordinator();
    let err = coord
        .import(&owner(), RepoRef::from("ada/missing"), "Missing", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::RemoteRejected(RemoteError::NotFound(_))
    ));
    assert!(coord.list(&owner()).await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_forgets_record_and_cache() {
    let env = Env::new();
    let coord = env.coordinator();
    let project = coord
        .create(&owner(), "Gone", ProjectType::Html, None)
        .await
        .unwrap();
    coord.delete(&project.key()).await.unwrap();

    assert!(matches!(
        coord.project(&project.key()).await.unwrap_err(),
        SyncError::ProjectNotFound(_)
    ));
    let cache = DiskCacheStore::new(env.home.path());
    assert!(cache.load(&project.key()).await.unwrap().is_none());
}

#[tokio::test]
async fn failed_repository_creation_leaves_no_project() {
    let env = Env::new();
    env.link_account();
    // The local remote cannot create repositories under a plain file.
    std::fs::write(env.remote_root(), "not a directory").unwrap();
    let coord = env.coordinator();

    let err = coord
        .create(&owner(), "Orphan", ProjectType::Blank, Some(Tree::from_files([("a", "1")]).unwrap()))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::RemoteRejected(_)));
    assert!(coord.list(&owner()).await.unwrap().is_empty());
    let cache = DiskCacheStore::new(env.home.path());
    assert!(cache
        .load(&ProjectKey::new(OWNER, 1))
        .await
        .unwrap()
        .is_none());
}

// ---------------------------------------------------------------------------
// Live sessions
// ---------------------------------------------------------------------------

async fn session_for(key: &ProjectKey, dir: &TempDir, live: &Tree) -> (SyncSession, Arc<LocalSandbox>) {
    let sandbox = LocalSandbox::boot(dir.path().join("live"), ExclusionSet::default())
        .await
        .unwrap();
    sandbox.mount(live).await.unwrap();
    let sandbox = Arc::new(sandbox);
    (SyncSession::new(key.clone(), sandbox.clone()), sandbox)
}

#[tokio::test]
async fn unreadable_live_copy_is_a_read_failure() {
    let env = Env::new();
    let coord = env.coordinator();
    let original = Tree::from_files([("a.txt", "saved")]).unwrap();
    let project = coord
        .create(&owner(), "Gone Live", ProjectType::Blank, Some(original.clone()))
        .await
        .unwrap();
    let dir = TempDir::new().unwrap();
    let (session, sandbox) = session_for(&project.key(), &dir, &original).await;
    sandbox.teardown().await.unwrap();

    let err = coord
        .save(&project.key(), Tree::new(), Some(session))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::ReadFailure(_)), "got {err:?}");
    assert_eq!(coord.load(&project.key()).await.unwrap(), original);
}

#[tokio::test]
async fn non_text_live_file_keeps_the_editor_copy() {
    let env = Env::new();
    let coord = env.coordinator();
    let project = coord
        .create(&owner(), "Binary", ProjectType::Blank, Some(Tree::new()))
        .await
        .unwrap();
    let dir = TempDir::new().unwrap();
    let live = Tree::from_files([("index.html", "<p>")]).unwrap();
    let (session, sandbox) = session_for(&project.key(), &dir, &live).await;
    std::fs::write(sandbox.root().join("logo.svg"), [0xff, 0xfe, 0x00, 0x80]).unwrap();

    let editor = Tree::from_files([("index.html", "<p>"), ("logo.svg", "<svg/>")]).unwrap();
    let saved = coord
        .save(&project.key(), editor.clone(), Some(session))
        .await
        .unwrap();

    assert!(saved.dropped.is_empty());
    assert_eq!(saved.tree, editor);
    assert_eq!(coord.load(&project.key()).await.unwrap(), editor);
}

#[tokio::test]
async fn pull_with_session_replaces_the_live_copy() {
    let env = Env::new();
    env.link_account();
    let coord = env.coordinator();
    let remote = Tree::from_files([("a.txt", "remote")]).unwrap();
    let project = coord
        .create(&owner(), "Mirror", ProjectType::Blank, Some(remote.clone()))
        .await
        .unwrap();
    let key = project.key();
    let dir = TempDir::new().unwrap();
    let live = Tree::from_files([("a.txt", "edited"), ("scratch/local_only.txt", "x")]).unwrap();
    let (session, sandbox) = session_for(&key, &dir, &live).await;

    let pulled = coord.pull(&key, Some(session.clone())).await.unwrap();
    assert_eq!(pulled, remote);
    assert_eq!(sandbox.snapshot().await.unwrap().tree, remote);
    assert!(!sandbox.root().join("scratch").exists());

    let saved = coord.save(&key, remote.clone(), Some(session)).await.unwrap();
    assert_eq!(saved.tree, remote);
}

// ---------------------------------------------------------------------------
// Delete racing create
// ---------------------------------------------------------------------------

/// Disk cache whose removals take a while.
struct SlowRemoveCache {
    inner: DiskCacheStore,
}

#[async_trait]
impl CacheStore for SlowRemoveCache {
    async fn load(&self, key: &ProjectKey) -> Result<Option<Tree>, SyncError> {
        self.inner.load(key).await
    }

    async fn save(&self, key: &ProjectKey, tree: &Tree) -> Result<(), SyncError> {
        self.inner.save(key, tree).await
    }

    async fn remove(&self, key: &ProjectKey) -> Result<bool, SyncError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.inner.remove(key).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn create_during_delete_keeps_its_files() {
    let env = Env::new();
    let coord = env.coordinator_with(Arc::new(SlowRemoveCache {
        inner: DiskCacheStore::new(env.home.path()),
    }));
    let old = coord
        .create(&owner(), "Old", ProjectType::Blank, Some(Tree::from_files([("old.txt", "o")]).unwrap()))
        .await
        .unwrap();

    let deleting = {
        let coord = coord.clone();
        let key = old.key();
        tokio::spawn(async move { coord.delete(&key).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let files = Tree::from_files([("keep.txt", "new project")]).unwrap();
    let new = coord
        .create(&owner(), "New", ProjectType::Blank, Some(files.clone()))
        .await
        .unwrap();
    deleting.await.unwrap().unwrap();

    assert_eq!(coord.load(&new.key()).await.unwrap(), files);
    let names: Vec<String> = coord
        .list(&owner())
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.name)
        .collect();
    assert_eq!(names, vec!["New"]);
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// Disk cache that records when each save starts and ends, and takes a
/// while doing it.
struct SlowCache {
    inner: DiskCacheStore,
    events: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl CacheStore for SlowCache {
    async fn load(&self, key: &ProjectKey) -> Result<Option<Tree>, SyncError> {
        self.inner.load(key).await
    }

    async fn save(&self, key: &ProjectKey, tree: &Tree) -> Result<(), SyncError> {
        self.events.lock().unwrap().push("begin");
        tokio::time::sleep(Duration::from_millis(50)).await;
        let result = self.inner.save(key, tree).await;
        self.events.lock().unwrap().push("end");
        result
    }

    async fn remove(&self, key: &ProjectKey) -> Result<bool, SyncError> {
        self.inner.remove(key).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_save_and_pull_never_interleave() {
    let env = Env::new();
    env.link_account();
    let cache = Arc::new(SlowCache {
        inner: DiskCacheStore::new(env.home.path()),
        events: Mutex::new(Vec::new()),
    });
    let coord = env.coordinator_with(cache.clone());
    let project = coord
        .create(&owner(), "Busy", ProjectType::Blank, Some(Tree::from_files([("a", "1")]).unwrap()))
        .await
        .unwrap();
    let key = project.key();
    cache.events.lock().unwrap().clear();

    let editor = Tree::from_files([("b", "2")]).unwrap();
    let (saved, pulled) = tokio::join!(coord.save(&key, editor, None), coord.pull(&key, None));
    saved.unwrap();
    pulled.unwrap();

    let events = cache.events.lock().unwrap().clone();
    assert_eq!(events, vec!["begin", "end", "begin", "end"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_save_still_completes() {
    let env = Env::new();
    let cache = Arc::new(SlowCache {
        inner: DiskCacheStore::new(env.home.path()),
        events: Mutex::new(Vec::new()),
    });
    let coord = env.coordinator_with(cache.clone());
    let project = coord
        .create(&owner(), "Patience", ProjectType::Blank, Some(Tree::new()))
        .await
        .unwrap();
    let key = project.key();

    let tree = Tree::from_files([("late.txt", "still here")]).unwrap();
    let abandoned = tokio::time::timeout(
        Duration::from_millis(5),
        coord.save(&key, tree.clone(), None),
    )
    .await;
    assert!(abandoned.is_err());

    // Waits behind the abandoned save in the project's exclusive section.
    assert_eq!(coord.load(&key).await.unwrap(), tree);
}
