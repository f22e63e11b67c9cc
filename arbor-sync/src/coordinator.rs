//! Sync coordinator: the single entry point for project sync operations.
//!
//! Every operation on a project runs inside that project's exclusive section
//! on its own spawned task. The section is held until the task finishes, so
//! a caller that stops waiting never cuts a cache or remote write short, and
//! a second operation on the same project only starts once the first has
//! returned. Operations on different projects never contend.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Mutex as SectionLock;

use arbor_core::config::{self, Config};
use arbor_core::error::RegistryError;
use arbor_core::registry;
use arbor_core::tree::Tree;
use arbor_core::types::{
    slugify, Account, BranchName, OwnerId, Project, ProjectKey, ProjectType, RepoRef,
};
use arbor_templates::Renderer;
use arbor_walker::ExclusionSet;

use crate::cache_store::{CacheStore, DiskCacheStore};
use crate::error::{NotLinkedReason, SyncError};
use crate::mirror::{PushOutcome, RemoteMirror};
use crate::reconcile::{reconcile, Reconciled};
use crate::remote::{connector_from_config, CommitInfo, RemoteConnector, RemoteError};
use crate::session::SyncSession;

#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    home: PathBuf,
    config: Config,
    exclusions: ExclusionSet,
    cache: Arc<dyn CacheStore>,
    connector: Arc<dyn RemoteConnector>,
    renderer: Renderer,
    projects: Sections<ProjectKey>,
    /// Id allocation is per owner.
    owners: Sections<OwnerId>,
}

/// Lazily created exclusive sections, one per key.
struct Sections<K>(Mutex<HashMap<K, Arc<SectionLock<()>>>>);

impl<K: Eq + Hash + Clone> Sections<K> {
    fn new() -> Self {
        Sections(Mutex::new(HashMap::new()))
    }

    fn get(&self, key: &K) -> Arc<SectionLock<()>> {
        self.0.lock().entry(key.clone()).or_default().clone()
    }
}

impl Coordinator {
    pub fn new(
        home: impl Into<PathBuf>,
        config: Config,
        cache: Arc<dyn CacheStore>,
        connector: Arc<dyn RemoteConnector>,
        renderer: Renderer,
    ) -> Self {
        let exclusions = ExclusionSet::new(config.exclusions.iter());
        Self {
            inner: Arc::new(Inner {
                home: home.into(),
                config,
                exclusions,
                cache,
                connector,
                renderer,
                projects: Sections::new(),
                owners: Sections::new(),
            }),
        }
    }

    /// Coordinator over `<home>/.arbor`: config from `config.yaml`, the disk
    /// cache store, the configured remote backend and user templates.
    pub fn open_at(home: &Path) -> Result<Self, SyncError> {
        let config = config::load_at(home)?;
        let connector = connector_from_config(home, &config.remote)?;
        let renderer = Renderer::with_user_templates_at(home)?;
        let cache = Arc::new(DiskCacheStore::new(home));
        Ok(Self::new(home, config, cache, connector, renderer))
    }

    pub fn home(&self) -> &Path {
        &self.inner.home
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn exclusions(&self) -> &ExclusionSet {
        &self.inner.exclusions
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Cached tree, else the remote tree (which is then cached), else empty.
    pub async fn load(&self, key: &ProjectKey) -> Result<Tree, SyncError> {
        let key = key.clone();
        self.exclusive(&key.clone(), move |inner| async move { inner.load(&key).await })
            .await
    }

    /// Persist `editor` as the project's tree. With a live session the
    /// editor tree is first reconciled against the session's snapshot.
    pub async fn save(
        &self,
        key: &ProjectKey,
        editor: Tree,
        session: Option<SyncSession>,
    ) -> Result<Reconciled, SyncError> {
        let key = key.clone();
        self.exclusive(&key.clone(), move |inner| async move {
            inner.save(&key, editor, session).await
        })
        .await
    }

    /// Commit the cached tree to the linked repository.
    pub async fn push(&self, key: &ProjectKey) -> Result<PushOutcome, SyncError> {
        let key = key.clone();
        self.exclusive(&key.clone(), move |inner| async move { inner.push(&key).await })
            .await
    }

    /// Replace the cached tree with the remote tree and return it. With a
    /// live session the live copy is replaced as well.
    pub async fn pull(
        &self,
        key: &ProjectKey,
        session: Option<SyncSession>,
    ) -> Result<Tree, SyncError> {
        let key = key.clone();
        self.exclusive(&key.clone(), move |inner| async move {
            inner.pull(&key, session).await
        })
        .await
    }

    /// Create a repository for an unlinked project, link it and push the
    /// cached tree as the first commit.
    pub async fn init(&self, key: &ProjectKey) -> Result<Project, SyncError> {
        let key = key.clone();
        self.exclusive(&key.clone(), move |inner| async move { inner.init(&key).await })
            .await
    }

    /// New project bound to an existing repository, seeded with its tree.
    /// `branch` defaults to the owner's default branch.
    pub async fn import(
        &self,
        owner: &OwnerId,
        repo: RepoRef,
        name: &str,
        branch: Option<BranchName>,
    ) -> Result<Project, SyncError> {
        let owner = owner.clone();
        let name = name.to_string();
        self.owner_exclusive(&owner.clone(), move |inner| async move {
            inner.import(&owner, repo, &name, branch).await
        })
        .await
    }

    /// New project seeded from `files`, or from its type's template. When
    /// the owner has a credential and auto-creation is on, a repository is
    /// created and the initial tree pushed to it. A project that fails
    /// before its repository exists is discarded again.
    pub async fn create(
        &self,
        owner: &OwnerId,
        name: &str,
        project_type: ProjectType,
        files: Option<Tree>,
    ) -> Result<Project, SyncError> {
        let owner = owner.clone();
        let name = name.to_string();
        self.owner_exclusive(&owner.clone(), move |inner| async move {
            inner.create(&owner, &name, project_type, files).await
        })
        .await
    }

    /// Remove the project record and its cached tree. The remote repository
    /// is left alone.
    pub async fn delete(&self, key: &ProjectKey) -> Result<Project, SyncError> {
        let key = key.clone();
        self.exclusive(&key.clone(), move |inner| async move { inner.delete(&key).await })
            .await
    }

    /// Up to `limit` commits on the project's branch, newest first.
    pub async fn history(
        &self,
        key: &ProjectKey,
        limit: usize,
    ) -> Result<Vec<CommitInfo>, SyncError> {
        let key = key.clone();
        self.exclusive(&key.clone(), move |inner| async move {
            inner.history(&key, limit).await
        })
        .await
    }

    /// Read the project record. Not serialized.
    pub async fn project(&self, key: &ProjectKey) -> Result<Project, SyncError> {
        self.inner.project(key).await
    }

    /// All projects of `owner`, ordered by id. Not serialized.
    pub async fn list(&self, owner: &OwnerId) -> Result<Vec<Project>, SyncError> {
        let owner = owner.clone();
        self.inner
            .registry(move |home| registry::list_projects_at(home, &owner))
            .await
    }

    // -----------------------------------------------------------------------
    // Exclusive sections
    // -----------------------------------------------------------------------

    async fn exclusive<T, F, Fut>(&self, key: &ProjectKey, op: F) -> Result<T, SyncError>
    where
        F: FnOnce(Arc<Inner>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
        T: Send + 'static,
    {
        let section = self.inner.projects.get(key);
        self.run_locked(section, format!("project {key}"), op).await
    }

    async fn owner_exclusive<T, F, Fut>(&self, owner: &OwnerId, op: F) -> Result<T, SyncError>
    where
        F: FnOnce(Arc<Inner>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
        T: Send + 'static,
    {
        let section = self.inner.owners.get(owner);
        self.run_locked(section, format!("owner {owner}"), op).await
    }

    async fn run_locked<T, F, Fut>(
        &self,
        section: Arc<SectionLock<()>>,
        label: String,
        op: F,
    ) -> Result<T, SyncError>
    where
        F: FnOnce(Arc<Inner>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let _held = section.lock_owned().await;
            op(inner).await
        });
        task.await.map_err(|e| SyncError::Aborted {
            project: label,
            message: e.to_string(),
        })?
    }
}

// ---------------------------------------------------------------------------
// Operation bodies (caller holds the exclusive section)
// ---------------------------------------------------------------------------

impl Inner {
    async fn load(&self, key: &ProjectKey) -> Result<Tree, SyncError> {
        let project = self.project(key).await?;
        if let Some(tree) = self.cache.load(key).await? {
            tracing::debug!("load {key}: {} nodes from cache", tree.len());
            return Ok(tree);
        }
        let Some(repo) = &project.remote_repo else {
            tracing::debug!("load {key}: nothing cached and no remote, empty tree");
            return Ok(Tree::new());
        };
        let mirror = self.mirror_for(&project).await?;
        let tree = mirror.fetch_tree(repo, &project.remote_branch).await?;
        self.cache.save(key, &tree).await?;
        tracing::info!("load {key}: seeded cache from {repo}");
        Ok(tree)
    }

    async fn save(
        &self,
        key: &ProjectKey,
        editor: Tree,
        session: Option<SyncSession>,
    ) -> Result<Reconciled, SyncError> {
        let mut project = self.project(key).await?;
        let saved = match session {
            Some(session) => {
                let live = session.snapshot_for(key).await?;
                reconcile(&editor, &live, &self.exclusions)
            }
            None => Reconciled {
                tree: editor,
                dropped: Vec::new(),
            },
        };
        saved.tree.validate()?;
        self.cache.save(key, &saved.tree).await?;

        project.updated_at = Utc::now();
        self.registry(move |home| registry::save_project_at(home, &project))
            .await?;
        tracing::info!("saved {key}: {} files", saved.tree.file_count());
        Ok(saved)
    }

    async fn push(&self, key: &ProjectKey) -> Result<PushOutcome, SyncError> {
        let project = self.project(key).await?;
        let repo = linked_repo(&project)?;
        let mirror = self.mirror_for(&project).await?;
        let tree = self
            .cache
            .load(key)
            .await?
            .ok_or_else(|| SyncError::NoCachedTree(key.clone()))?;
        Ok(mirror.push_tree(repo, &project.remote_branch, &tree).await?)
    }

    async fn pull(&self, key: &ProjectKey, session: Option<SyncSession>) -> Result<Tree, SyncError> {
        let project = self.project(key).await?;
        let repo = linked_repo(&project)?;
        let mirror = self.mirror_for(&project).await?;
        let tree = mirror.fetch_tree(repo, &project.remote_branch).await?;
        self.cache.save(key, &tree).await?;
        if let Some(session) = session {
            session.replace_for(key, &tree).await?;
        }
        tracing::info!("pulled {key} from {repo}: {} files", tree.file_count());
        Ok(tree)
    }

    async fn init(&self, key: &ProjectKey) -> Result<Project, SyncError> {
        let mut project = self.project(key).await?;
        if let Some(repo) = &project.remote_repo {
            return Err(SyncError::AlreadyLinked {
                project: key.clone(),
                repo: repo.to_string(),
            });
        }
        let mirror = self.mirror_for(&project).await?;
        let repo = mirror
            .create_repository(&repo_name(&project.name), self.config.remote.private)
            .await?;

        project.remote_repo = Some(repo.clone());
        project.updated_at = Utc::now();
        let record = project.clone();
        self.registry(move |home| registry::save_project_at(home, &record))
            .await?;

        let tree = match self.cache.load(key).await? {
            Some(tree) => tree,
            None => {
                let empty = Tree::new();
                self.cache.save(key, &empty).await?;
                empty
            }
        };
        let outcome = mirror.push_tree(&repo, &project.remote_branch, &tree).await?;
        tracing::info!("initialised {key} as {repo} ({} files)", outcome.files);
        Ok(project)
    }

    async fn import(
        &self,
        owner: &OwnerId,
        repo: RepoRef,
        name: &str,
        branch: Option<BranchName>,
    ) -> Result<Project, SyncError> {
        if repo.split().is_none() {
            return Err(RemoteError::InvalidRepo(repo.0).into());
        }
        let account = self.account(owner).await?;
        let mirror = self.owner_mirror(&account)?;
        let branch = branch.unwrap_or_else(|| self.default_branch(&account));
        let tree = mirror.fetch_tree(&repo, &branch).await?;

        let project = {
            let owner = owner.clone();
            let name = name.to_string();
            let repo = repo.clone();
            self.registry(move |home| {
                registry::create_project_at(
                    home,
                    &owner,
                    &name,
                    ProjectType::Imported,
                    Some(repo),
                    branch,
                )
            })
            .await?
        };
        let _held = self.projects.get(&project.key()).lock_owned().await;
        self.cache.save(&project.key(), &tree).await?;
        tracing::info!(
            "imported {repo} as {} ({} files)",
            project.key(),
            tree.file_count()
        );
        Ok(project)
    }

    async fn create(
        &self,
        owner: &OwnerId,
        name: &str,
        project_type: ProjectType,
        files: Option<Tree>,
    ) -> Result<Project, SyncError> {
        let account = self.account(owner).await?;
        let branch = self.default_branch(&account);
        let mirror = match account.credential() {
            Some(_) if self.config.remote.auto_create => Some(self.owner_mirror(&account)?),
            _ => None,
        };

        let mut project = {
            let owner = owner.clone();
            let name = name.to_string();
            let branch = branch.clone();
            self.registry(move |home| {
                registry::create_project_at(home, &owner, &name, project_type, None, branch)
            })
            .await?
        };
        let key = project.key();
        // A freshly freed id may still be finishing its delete.
        let _held = self.projects.get(&key).lock_owned().await;

        let tree = match self.seed(&project, files).await {
            Ok(tree) => tree,
            Err(e) => {
                self.discard(&key).await;
                return Err(e);
            }
        };

        if let Some(mirror) = mirror {
            let repo = match mirror
                .create_repository(&repo_name(name), self.config.remote.private)
                .await
            {
                Ok(repo) => repo,
                Err(e) => {
                    self.discard(&key).await;
                    return Err(e.into());
                }
            };
            project.remote_repo = Some(repo.clone());
            let record = project.clone();
            self.registry(move |home| registry::save_project_at(home, &record))
                .await?;
            mirror.push_tree(&repo, &branch, &tree).await?;
        }
        tracing::info!("created {key} ({project_type}, {} files)", tree.file_count());
        Ok(project)
    }

    /// Starter tree of a new project, written to the cache store.
    async fn seed(&self, project: &Project, files: Option<Tree>) -> Result<Tree, SyncError> {
        let tree = match files {
            Some(files) => files,
            None => self.renderer.render(project)?,
        };
        tree.validate()?;
        self.cache.save(&project.key(), &tree).await?;
        Ok(tree)
    }

    /// Remove what a failed create left behind. Failures are only logged.
    async fn discard(&self, key: &ProjectKey) {
        if let Err(e) = self.cache.remove(key).await {
            tracing::warn!("could not remove the cached tree of {key}: {e}");
        }
        let record_key = key.clone();
        if let Err(e) = self
            .registry(move |home| registry::delete_project_at(home, &record_key))
            .await
        {
            tracing::warn!("could not remove the record of {key}: {e}");
        }
    }

    async fn delete(&self, key: &ProjectKey) -> Result<Project, SyncError> {
        let project = self.project(key).await?;
        // The cache goes first: once the record is gone the id can be handed
        // out again.
        self.cache.remove(key).await?;
        let record_key = key.clone();
        self.registry(move |home| registry::delete_project_at(home, &record_key))
            .await?;
        tracing::info!("deleted {key}");
        Ok(project)
    }

    async fn history(&self, key: &ProjectKey, limit: usize) -> Result<Vec<CommitInfo>, SyncError> {
        let project = self.project(key).await?;
        let repo = linked_repo(&project)?;
        let mirror = self.mirror_for(&project).await?;
        Ok(mirror.history(repo, &project.remote_branch, limit).await?)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn project(&self, key: &ProjectKey) -> Result<Project, SyncError> {
        let lookup = key.clone();
        self.registry(move |home| registry::load_project_at(home, &lookup))
            .await
            .map_err(|e| match e {
                SyncError::Registry(RegistryError::ProjectNotFound { .. }) => {
                    SyncError::ProjectNotFound(key.clone())
                }
                other => other,
            })
    }

    async fn account(&self, owner: &OwnerId) -> Result<Account, SyncError> {
        let owner = owner.clone();
        self.registry(move |home| registry::load_account_at(home, &owner))
            .await
    }

    /// Run a blocking registry call off the async workers.
    async fn registry<T, F>(&self, f: F) -> Result<T, SyncError>
    where
        F: FnOnce(&Path) -> Result<T, RegistryError> + Send + 'static,
        T: Send + 'static,
    {
        let home = self.home.clone();
        tokio::task::spawn_blocking(move || f(&home))
            .await
            .map_err(|e| SyncError::Aborted {
                project: "registry".to_string(),
                message: e.to_string(),
            })?
            .map_err(SyncError::from)
    }

    /// Mirror authenticated with the project owner's credential.
    async fn mirror_for(&self, project: &Project) -> Result<RemoteMirror, SyncError> {
        let account = self.account(&project.owner).await?;
        let credential = account.credential().ok_or_else(|| {
            SyncError::not_linked(&project.key(), NotLinkedReason::NoCredential)
        })?;
        self.connect(credential)
    }

    fn owner_mirror(&self, account: &Account) -> Result<RemoteMirror, SyncError> {
        let credential = account.credential().ok_or_else(|| SyncError::NotLinked {
            subject: format!("owner {}", account.owner),
            reason: NotLinkedReason::NoCredential,
        })?;
        self.connect(credential)
    }

    fn connect(&self, credential: &str) -> Result<RemoteMirror, SyncError> {
        let store = self.connector.connect(credential)?;
        Ok(RemoteMirror::new(
            store,
            self.exclusions.clone(),
            self.config.remote.commit_message.clone(),
        ))
    }

    /// The account's branch when it sets one, else the configured default.
    fn default_branch(&self, account: &Account) -> BranchName {
        if account.default_branch != BranchName::default() {
            account.default_branch.clone()
        } else {
            self.config.default_branch.clone()
        }
    }
}

fn linked_repo(project: &Project) -> Result<&RepoRef, SyncError> {
    project
        .remote_repo
        .as_ref()
        .ok_or_else(|| SyncError::not_linked(&project.key(), NotLinkedReason::NoRepository))
}

/// `arbor-<slug>-<4 digits>`; the suffix keeps repeated names apart.
fn repo_name(project_name: &str) -> String {
    let suffix = Utc::now().timestamp_millis().rem_euclid(10_000);
    format!("arbor-{}-{suffix:04}", slugify(project_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_name_uses_slug_and_four_digits() {
        let name = repo_name("My Site!");
        let (prefix, digits) = name.rsplit_once('-').unwrap();
        assert_eq!(prefix, "arbor-my-site");
        assert_eq!(digits.len(), 4);
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn repo_name_falls_back_for_unsluggable_names() {
        assert!(repo_name("!!!").starts_with("arbor-project-"));
    }
}
