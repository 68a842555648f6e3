use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs,
    path::{Component, Path, PathBuf},
};

use fs_more::directory::{DirectoryScanDepthLimit, DirectoryScanOptions, DirectoryScanner};
use path_slash::PathExt as _;
use serde::Deserialize;

use crate::{
    errors::RepositoryError,
    identifier::CompositeId,
    migration::{Migration, MIGRATION_DESCRIPTOR_FILE_NAME},
    target::MigrationApplication,
};


pub const REPOSITORY_MANIFEST_FILE_NAME: &str = "mitch.toml";



/// The `[repository]` section of a `mitch.toml` descriptor.
#[derive(Deserialize, Clone, Debug)]
pub struct RepositoryManifest {
    pub name: String,

    #[serde(default)]
    pub root: bool,

    pub maintainer: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RepositoryManifestFile {
    repository: Option<RepositoryManifest>,
}


/// A repository nested below the root, keyed by its declared name.
#[derive(Debug)]
pub struct Subrepository {
    root_directory: PathBuf,

    manifest: RepositoryManifest,
}

impl Subrepository {
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    pub fn manifest(&self) -> &RepositoryManifest {
        &self.manifest
    }
}



/// A rooted directory tree of migrations, together with any repositories
/// nested below it.
///
/// All migrations of the root's closure live in a single arena keyed by
/// [`CompositeId`]; dependency edges between them are id sets, not pointers.
#[derive(Debug)]
pub struct Repository {
    root_directory: PathBuf,

    manifest: RepositoryManifest,

    migrations: BTreeMap<CompositeId, Migration>,

    subrepositories: BTreeMap<String, Subrepository>,
}

impl Repository {
    /// Finds the repository governing `working_directory`: the nearest
    /// ancestor directory (including `working_directory` itself) whose
    /// `mitch.toml` contains a `[repository]` section.
    pub fn discover_from<P>(working_directory: P) -> Result<Self, RepositoryError>
    where
        P: AsRef<Path>,
    {
        let start_directory = canonicalize_directory(working_directory.as_ref())?;

        let mut current_directory = Some(start_directory.as_path());
        while let Some(directory) = current_directory {
            let manifest_path = directory.join(REPOSITORY_MANIFEST_FILE_NAME);

            if manifest_path.is_file() && read_manifest(&manifest_path)?.is_some() {
                return Self::load(directory);
            }

            current_directory = directory.parent();
        }

        Err(RepositoryError::NoRepositoryFound { start_directory })
    }

    /// Loads the repository rooted at `root_directory`, including all
    /// nested repositories and every migration of the closure, and
    /// resolves the dependency graph.
    pub fn load<P>(root_directory: P) -> Result<Self, RepositoryError>
    where
        P: AsRef<Path>,
    {
        let root_directory = canonicalize_directory(root_directory.as_ref())?;

        let manifest_path = root_directory.join(REPOSITORY_MANIFEST_FILE_NAME);
        let manifest = read_manifest(&manifest_path)?.ok_or_else(|| {
            RepositoryError::MissingRepositorySection {
                file_path: manifest_path,
            }
        })?;


        // One pass over the tree collects nested repository roots and
        // migration directories; each migration then belongs to its nearest
        // enclosing repository.
        let tree_scanner = DirectoryScanner::new(
            &root_directory,
            DirectoryScanOptions {
                follow_base_directory_symbolic_link: false,
                follow_symbolic_links: false,
                yield_base_directory: false,
                maximum_scan_depth: DirectoryScanDepthLimit::Unlimited,
            },
        );

        let mut subrepository_roots = Vec::new();
        let mut migration_directories = Vec::new();

        for entry_result in tree_scanner {
            let entry = entry_result.map_err(|error| RepositoryError::UnableToScanRepository {
                directory_path: root_directory.clone(),
                error,
            })?;

            if !entry.metadata().is_file() {
                continue;
            }

            let entry_path = entry.path().to_path_buf();

            let Some(file_name) = entry_path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            let Some(parent_directory) = entry_path.parent() else {
                continue;
            };

            if file_name == REPOSITORY_MANIFEST_FILE_NAME && parent_directory != root_directory {
                subrepository_roots.push(parent_directory.to_path_buf());
            } else if file_name == MIGRATION_DESCRIPTOR_FILE_NAME {
                migration_directories.push(parent_directory.to_path_buf());
            }
        }

        subrepository_roots.sort();
        migration_directories.sort();


        let mut subrepositories = BTreeMap::new();

        for subrepository_root in subrepository_roots {
            let subrepository_manifest_path =
                subrepository_root.join(REPOSITORY_MANIFEST_FILE_NAME);

            let subrepository_manifest = read_manifest(&subrepository_manifest_path)?
                .ok_or_else(|| RepositoryError::MissingRepositorySection {
                    file_path: subrepository_manifest_path,
                })?;

            let name = subrepository_manifest.name.clone();
            if name == manifest.name || subrepositories.contains_key(&name) {
                return Err(RepositoryError::DuplicateRepositoryName { name });
            }

            subrepositories.insert(
                name,
                Subrepository {
                    root_directory: subrepository_root,
                    manifest: subrepository_manifest,
                },
            );
        }


        let mut repository_roots: Vec<(&str, &Path)> =
            vec![(manifest.name.as_str(), root_directory.as_path())];
        repository_roots.extend(
            subrepositories
                .values()
                .map(|subrepository| (subrepository.name(), subrepository.root_directory())),
        );

        let mut migrations: BTreeMap<CompositeId, Migration> = BTreeMap::new();

        for migration_directory in &migration_directories {
            let (owning_name, owning_root) = repository_roots
                .iter()
                .copied()
                .filter(|(_, repository_root)| migration_directory.starts_with(repository_root))
                .max_by_key(|(_, repository_root)| repository_root.components().count())
                // PANIC SAFETY: The scan is rooted at `root_directory`, which is always in the list.
                .expect("scanned migration directory lies under the repository root");

            let migration =
                Migration::load_from_directory(migration_directory, owning_name, owning_root)?;

            let id = migration.id().clone();
            if migrations.contains_key(&id) {
                return Err(RepositoryError::DuplicateMigrationId { id });
            }

            migrations.insert(id, migration);
        }


        let mut repository = Self {
            root_directory,
            manifest,
            migrations,
            subrepositories,
        };

        repository.resolve_dependency_edges()?;

        Ok(repository)
    }


    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    pub fn manifest(&self) -> &RepositoryManifest {
        &self.manifest
    }

    pub fn subrepositories(&self) -> impl Iterator<Item = &Subrepository> {
        self.subrepositories.values()
    }

    /// All migrations of the root's closure, in id order.
    pub fn migrations(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.values()
    }

    pub fn migration(&self, id: &CompositeId) -> Option<&Migration> {
        self.migrations.get(id)
    }

    /// Looks up a migration by a raw identifier string, accepting either
    /// the canonical `"repository::migration"` form or a bare migration id
    /// of this repository.
    pub fn by_id(&self, raw_id: &str) -> Result<&Migration, RepositoryError> {
        let id = CompositeId::parse(raw_id, Some(self.manifest.name.as_str()))?;

        if id.repository_id != self.manifest.name
            && !self.subrepositories.contains_key(&id.repository_id)
        {
            return Err(RepositoryError::UnknownRepository {
                repository_id: id.repository_id,
                id: raw_id.to_string(),
            });
        }

        self.migrations
            .get(&id)
            .ok_or_else(|| RepositoryError::UnknownMigration {
                id: raw_id.to_string(),
            })
    }

    pub fn by_ids<I, S>(&self, raw_ids: I) -> Result<Vec<&Migration>, RepositoryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut migrations = Vec::new();

        for raw_id in raw_ids {
            migrations.push(self.by_id(raw_id.as_ref())?);
        }

        Ok(migrations)
    }

    /// Joins application records back to the migrations they describe.
    /// Applications whose migration no longer exists on disk yield `None`.
    pub fn with_migrations<'r, 'a>(
        &'r self,
        applications: &'a [MigrationApplication],
    ) -> Vec<(&'a MigrationApplication, Option<&'r Migration>)> {
        applications
            .iter()
            .map(|application| (application, self.migrations.get(&application.id())))
            .collect()
    }


    /// The transitive dependency closure of `selection`, ordered such that
    /// every migration appears after all of its dependencies. Ties among
    /// mutually independent migrations break by ascending sort key.
    pub fn dependencies_of<'r>(
        &'r self,
        selection: &[&'r Migration],
    ) -> Result<Vec<&'r Migration>, RepositoryError> {
        self.topological_order(selection, TraversalDirection::Dependencies)
    }

    /// The transitive dependant closure of `selection`, ordered such that
    /// every migration appears after all of its dependants. Ties break by
    /// descending sort key.
    pub fn dependants_of<'r>(
        &'r self,
        selection: &[&'r Migration],
    ) -> Result<Vec<&'r Migration>, RepositoryError> {
        self.topological_order(selection, TraversalDirection::Dependants)
    }

    /// Edges that must be ordered before a migration in the given direction.
    fn prerequisite_edges(
        migration: &Migration,
        direction: TraversalDirection,
    ) -> &HashSet<CompositeId> {
        match direction {
            TraversalDirection::Dependencies => &migration.resolved_dependencies,
            TraversalDirection::Dependants => &migration.resolved_dependants,
        }
    }

    fn follower_edges(
        migration: &Migration,
        direction: TraversalDirection,
    ) -> &HashSet<CompositeId> {
        match direction {
            TraversalDirection::Dependencies => &migration.resolved_dependants,
            TraversalDirection::Dependants => &migration.resolved_dependencies,
        }
    }

    fn topological_order<'r>(
        &'r self,
        selection: &[&'r Migration],
        direction: TraversalDirection,
    ) -> Result<Vec<&'r Migration>, RepositoryError> {
        // Transitive closure of the selection over prerequisite edges.
        let mut closure: HashMap<&'r CompositeId, &'r Migration> = HashMap::new();
        let mut unvisited: Vec<&'r Migration> = Vec::new();

        for &migration in selection {
            if closure.insert(migration.id(), migration).is_none() {
                unvisited.push(migration);
            }
        }

        while let Some(migration) = unvisited.pop() {
            for prerequisite_id in Self::prerequisite_edges(migration, direction) {
                let prerequisite = self
                    .migrations
                    .get(prerequisite_id)
                    // PANIC SAFETY: Edges are validated when the repository resolves them.
                    .expect("resolved edges point at loaded migrations");

                if closure.insert(prerequisite.id(), prerequisite).is_none() {
                    unvisited.push(prerequisite);
                }
            }
        }


        // Kahn-style rounds: emit the ready frontier in deterministic order,
        // then release its followers.
        let mut pending_prerequisites: HashMap<&'r CompositeId, usize> = closure
            .iter()
            .map(|(&id, &migration)| {
                (
                    id,
                    Self::prerequisite_edges(migration, direction).len(),
                )
            })
            .collect();

        let mut ready: Vec<&'r Migration> = closure
            .values()
            .copied()
            .filter(|migration| Self::prerequisite_edges(migration, direction).is_empty())
            .collect();

        let mut ordered = Vec::with_capacity(closure.len());

        while !ready.is_empty() {
            match direction {
                TraversalDirection::Dependencies => {
                    ready.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
                }
                TraversalDirection::Dependants => {
                    ready.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
                }
            }

            let frontier = std::mem::take(&mut ready);

            for migration in frontier {
                ordered.push(migration);

                for follower_id in Self::follower_edges(migration, direction) {
                    // Followers outside the closure are not part of this traversal.
                    let Some(count) = pending_prerequisites.get_mut(follower_id) else {
                        continue;
                    };

                    *count -= 1;
                    if *count == 0 {
                        ready.push(closure[follower_id]);
                    }
                }
            }
        }

        if ordered.len() != closure.len() {
            let mut remaining: Vec<&CompositeId> = pending_prerequisites
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(&id, _)| id)
                .collect();
            remaining.sort();

            // PANIC SAFETY: An incomplete order leaves at least one migration pending.
            let id = (*remaining
                .first()
                .expect("a cycle leaves at least one unordered migration"))
            .clone();

            return Err(RepositoryError::DependencyCycle { id });
        }

        Ok(ordered)
    }


    fn repository_root_of(&self, repository_name: &str) -> Option<&Path> {
        if repository_name == self.manifest.name {
            return Some(self.root_directory.as_path());
        }

        self.subrepositories
            .get(repository_name)
            .map(|subrepository| subrepository.root_directory())
    }

    fn resolve_dependency_edges(&mut self) -> Result<(), RepositoryError> {
        let mut edges: Vec<(CompositeId, CompositeId)> = Vec::new();

        for migration in self.migrations.values() {
            let declared_by = migration.id().clone();

            let owning_root = self
                .repository_root_of(&declared_by.repository_id)
                // PANIC SAFETY: Every loaded migration belongs to a repository of the closure.
                .expect("migration belongs to a known repository");

            for dependency in migration.declared_dependencies() {
                let dependency_id = if dependency.starts_with('.') {
                    let Some(relative_id) =
                        reduce_relative_dependency(migration.directory(), owning_root, dependency)
                    else {
                        return Err(RepositoryError::RelativeDependencyEscapesRepository {
                            declared_by: declared_by.clone(),
                            dependency: dependency.clone(),
                        });
                    };

                    CompositeId::new(declared_by.repository_id.clone(), relative_id)
                } else {
                    CompositeId::parse(dependency, Some(&declared_by.repository_id))?
                };

                if !self.migrations.contains_key(&dependency_id) {
                    return Err(RepositoryError::UnknownDependency {
                        declared_by: declared_by.clone(),
                        dependency: dependency.clone(),
                    });
                }

                edges.push((declared_by.clone(), dependency_id));
            }
        }

        for (from, to) in edges {
            // PANIC SAFETY: Both endpoints were checked against the migration map above.
            self.migrations
                .get_mut(&from)
                .expect("edge endpoints are loaded migrations")
                .resolved_dependencies
                .insert(to.clone());
            self.migrations
                .get_mut(&to)
                .expect("edge endpoints are loaded migrations")
                .resolved_dependants
                .insert(from);
        }

        Ok(())
    }
}


#[derive(Clone, Copy, PartialEq, Eq)]
enum TraversalDirection {
    Dependencies,
    Dependants,
}


fn canonicalize_directory(path: &Path) -> Result<PathBuf, RepositoryError> {
    let canonical_path = dunce::canonicalize(path).map_err(|error| {
        RepositoryError::UnableToCanonicalizePath {
            path: path.to_path_buf(),
            error,
        }
    })?;

    if !canonical_path.is_dir() {
        return Err(RepositoryError::NotADirectory {
            path: canonical_path,
        });
    }

    Ok(canonical_path)
}

fn read_manifest(manifest_path: &Path) -> Result<Option<RepositoryManifest>, RepositoryError> {
    let manifest_contents = fs::read_to_string(manifest_path).map_err(|error| {
        RepositoryError::UnableToReadManifest {
            file_path: manifest_path.to_path_buf(),
            error,
        }
    })?;

    let manifest_file: RepositoryManifestFile =
        toml::from_str(&manifest_contents).map_err(|error| {
            RepositoryError::UnableToParseManifest {
                file_path: manifest_path.to_path_buf(),
                error: Box::new(error),
            }
        })?;

    Ok(manifest_file.repository)
}


/// Reduces a `.`-leading dependency path to the repository-relative
/// identifier form, or `None` when the path leaves the repository root.
fn reduce_relative_dependency(
    migration_directory: &Path,
    repository_root: &Path,
    dependency: &str,
) -> Option<String> {
    let normalized = normalize_lexically(&migration_directory.join(dependency));

    let relative = pathdiff::diff_paths(&normalized, repository_root)?;
    if relative
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return None;
    }

    Some(relative.to_slash_lossy().into_owned())
}

/// Lexical path normalization: removes `.` components and folds `..`
/// into their parent, without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    normalized
}


#[cfg(test)]
mod test {
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::sha256::Sha256Hash;

    fn write_manifest(directory: &Path, name: &str, root: bool) {
        fs::create_dir_all(directory).unwrap();
        fs::write(
            directory.join(REPOSITORY_MANIFEST_FILE_NAME),
            format!("[repository]\nname = \"{}\"\nroot = {}\n", name, root),
        )
        .unwrap();
    }

    fn write_migration(directory: &Path, descriptor: &str) {
        fs::create_dir_all(directory).unwrap();
        fs::write(directory.join(MIGRATION_DESCRIPTOR_FILE_NAME), descriptor).unwrap();
        fs::write(directory.join("up.sql"), "select 1;").unwrap();
        fs::write(directory.join("down.sql"), "select 2;").unwrap();
    }

    fn ids(migrations: &[&Migration]) -> Vec<String> {
        migrations
            .iter()
            .map(|migration| migration.id().to_string())
            .collect()
    }

    #[test]
    fn discovers_repository_from_nested_directory() {
        let temporary_directory = tempfile::tempdir().unwrap();
        write_manifest(temporary_directory.path(), "main", true);

        let nested_directory = temporary_directory.path().join("some/nested/place");
        fs::create_dir_all(&nested_directory).unwrap();

        let repository = Repository::discover_from(&nested_directory).unwrap();

        assert_eq!(repository.name(), "main");
        assert!(repository.manifest().root);
    }

    #[test]
    fn discovery_fails_without_a_repository_descriptor() {
        let temporary_directory = tempfile::tempdir().unwrap();

        let error = Repository::discover_from(temporary_directory.path()).unwrap_err();

        assert!(matches!(error, RepositoryError::NoRepositoryFound { .. }));
    }

    #[test]
    fn dependency_chain_is_ordered_dependencies_first() {
        let temporary_directory = tempfile::tempdir().unwrap();
        write_manifest(temporary_directory.path(), "main", true);

        write_migration(&temporary_directory.path().join("a"), "");
        write_migration(
            &temporary_directory.path().join("b"),
            "dependencies = [\"a\"]\n",
        );
        write_migration(
            &temporary_directory.path().join("c"),
            "dependencies = [\"b\"]\n",
        );

        let repository = Repository::load(temporary_directory.path()).unwrap();

        let selection = repository.by_ids(["c"]).unwrap();
        let plan = repository.dependencies_of(&selection).unwrap();

        assert_eq!(ids(&plan), vec!["main::a", "main::b", "main::c"]);
    }

    #[test]
    fn dependants_are_ordered_dependants_first() {
        let temporary_directory = tempfile::tempdir().unwrap();
        write_manifest(temporary_directory.path(), "main", true);

        write_migration(&temporary_directory.path().join("a"), "");
        write_migration(
            &temporary_directory.path().join("b"),
            "dependencies = [\"a\"]\n",
        );
        write_migration(
            &temporary_directory.path().join("c"),
            "dependencies = [\"b\"]\n",
        );

        let repository = Repository::load(temporary_directory.path()).unwrap();

        let selection = repository.by_ids(["a"]).unwrap();
        let order = repository.dependants_of(&selection).unwrap();

        assert_eq!(ids(&order), vec!["main::c", "main::b", "main::a"]);
    }

    #[test]
    fn independent_migrations_break_ties_deterministically() {
        let temporary_directory = tempfile::tempdir().unwrap();
        write_manifest(temporary_directory.path(), "main", true);

        write_migration(
            &temporary_directory.path().join("newer"),
            "created_at = \"2024-02-01T00:00:00Z\"\n",
        );
        write_migration(
            &temporary_directory.path().join("older"),
            "created_at = \"2024-01-01T00:00:00Z\"\n",
        );
        write_migration(&temporary_directory.path().join("undated"), "");

        let repository = Repository::load(temporary_directory.path()).unwrap();

        let selection = repository.by_ids(["newer", "older", "undated"]).unwrap();

        let forward = repository.dependencies_of(&selection).unwrap();
        assert_eq!(
            ids(&forward),
            vec!["main::undated", "main::older", "main::newer"]
        );

        let backward = repository.dependants_of(&selection).unwrap();
        assert_eq!(
            ids(&backward),
            vec!["main::newer", "main::older", "main::undated"]
        );
    }

    #[test]
    fn traversal_yields_each_migration_at_most_once() {
        let temporary_directory = tempfile::tempdir().unwrap();
        write_manifest(temporary_directory.path(), "main", true);

        write_migration(&temporary_directory.path().join("base"), "");
        write_migration(
            &temporary_directory.path().join("left"),
            "dependencies = [\"base\"]\n",
        );
        write_migration(
            &temporary_directory.path().join("right"),
            "dependencies = [\"base\"]\n",
        );
        write_migration(
            &temporary_directory.path().join("top"),
            "dependencies = [\"left\", \"right\"]\n",
        );

        let repository = Repository::load(temporary_directory.path()).unwrap();

        let selection = repository.by_ids(["top", "left"]).unwrap();
        let plan = repository.dependencies_of(&selection).unwrap();

        assert_eq!(
            ids(&plan),
            vec!["main::base", "main::left", "main::right", "main::top"]
        );
    }

    #[test]
    fn unknown_dependency_is_an_error() {
        let temporary_directory = tempfile::tempdir().unwrap();
        write_manifest(temporary_directory.path(), "main", true);

        write_migration(
            &temporary_directory.path().join("a"),
            "dependencies = [\"missing\"]\n",
        );

        let error = Repository::load(temporary_directory.path()).unwrap_err();

        assert!(matches!(error, RepositoryError::UnknownDependency { .. }));
    }

    #[test]
    fn dependency_cycle_fails_at_traversal_preparation() {
        let temporary_directory = tempfile::tempdir().unwrap();
        write_manifest(temporary_directory.path(), "main", true);

        write_migration(
            &temporary_directory.path().join("a"),
            "dependencies = [\"b\"]\n",
        );
        write_migration(
            &temporary_directory.path().join("b"),
            "dependencies = [\"a\"]\n",
        );

        let repository = Repository::load(temporary_directory.path()).unwrap();

        let selection = repository.by_ids(["a"]).unwrap();
        let error = repository.dependencies_of(&selection).unwrap_err();

        assert!(matches!(error, RepositoryError::DependencyCycle { .. }));
    }

    #[test]
    fn duplicate_migration_ids_are_rejected() {
        let temporary_directory = tempfile::tempdir().unwrap();
        write_manifest(temporary_directory.path(), "main", true);

        write_migration(&temporary_directory.path().join("a"), "id = \"same\"\n");
        write_migration(&temporary_directory.path().join("b"), "id = \"same\"\n");

        let error = Repository::load(temporary_directory.path()).unwrap_err();

        assert!(matches!(
            error,
            RepositoryError::DuplicateMigrationId { .. }
        ));
    }

    #[test]
    fn duplicate_repository_names_are_rejected() {
        let temporary_directory = tempfile::tempdir().unwrap();
        write_manifest(temporary_directory.path(), "main", true);
        write_manifest(&temporary_directory.path().join("one"), "sub", false);
        write_manifest(&temporary_directory.path().join("two"), "sub", false);

        let error = Repository::load(temporary_directory.path()).unwrap_err();

        assert!(matches!(
            error,
            RepositoryError::DuplicateRepositoryName { .. }
        ));
    }

    #[test]
    fn relative_dependencies_reduce_to_repository_relative_ids() {
        let temporary_directory = tempfile::tempdir().unwrap();
        write_manifest(temporary_directory.path(), "main", true);

        write_migration(&temporary_directory.path().join("m1"), "");
        write_migration(
            &temporary_directory.path().join("m2"),
            "dependencies = [\"../m1\"]\n",
        );

        let repository = Repository::load(temporary_directory.path()).unwrap();

        let m2 = repository.by_id("m2").unwrap();
        assert!(m2
            .resolved_dependencies()
            .contains(&CompositeId::new("main", "m1")));
    }

    #[test]
    fn relative_dependencies_may_not_leave_the_repository() {
        let temporary_directory = tempfile::tempdir().unwrap();
        let root = temporary_directory.path().join("repo");
        write_manifest(&root, "main", true);

        write_migration(
            &root.join("m2"),
            "dependencies = [\"../../outside\"]\n",
        );

        let error = Repository::load(&root).unwrap_err();

        assert!(matches!(
            error,
            RepositoryError::RelativeDependencyEscapesRepository { .. }
        ));
    }

    #[test]
    fn subrepository_migrations_resolve_across_repositories() {
        let temporary_directory = tempfile::tempdir().unwrap();
        write_manifest(temporary_directory.path(), "main", true);
        write_manifest(&temporary_directory.path().join("sub"), "sub", false);

        write_migration(&temporary_directory.path().join("sub/m"), "");
        write_migration(
            &temporary_directory.path().join("n"),
            "dependencies = [\"sub::m\"]\n",
        );

        let repository = Repository::load(temporary_directory.path()).unwrap();

        assert_eq!(repository.subrepositories().count(), 1);

        let sub_migration = repository.by_id("sub::m").unwrap();
        assert_eq!(sub_migration.id(), &CompositeId::new("sub", "m"));

        let selection = repository.by_ids(["n"]).unwrap();
        let plan = repository.dependencies_of(&selection).unwrap();

        assert_eq!(ids(&plan), vec!["sub::m", "main::n"]);
    }

    #[test]
    fn lookup_of_unknown_repository_prefix_fails() {
        let temporary_directory = tempfile::tempdir().unwrap();
        write_manifest(temporary_directory.path(), "main", true);
        write_migration(&temporary_directory.path().join("a"), "");

        let repository = Repository::load(temporary_directory.path()).unwrap();

        assert!(matches!(
            repository.by_id("elsewhere::a").unwrap_err(),
            RepositoryError::UnknownRepository { .. }
        ));
        assert!(matches!(
            repository.by_id("missing").unwrap_err(),
            RepositoryError::UnknownMigration { .. }
        ));
    }

    #[test]
    fn applications_join_back_to_migrations() {
        let temporary_directory = tempfile::tempdir().unwrap();
        write_manifest(temporary_directory.path(), "main", true);
        write_migration(&temporary_directory.path().join("a"), "");

        let repository = Repository::load(temporary_directory.path()).unwrap();

        let applications = vec![
            MigrationApplication {
                repository_id: "main".to_string(),
                migration_id: "a".to_string(),
                up_script_sha256: Sha256Hash::calculate(b"select 1;"),
                reformatted_up_script_sha256: None,
                is_dependency: false,
                applied_at: DateTime::<Utc>::MIN_UTC,
                applied_by: "tester".to_string(),
            },
            MigrationApplication {
                repository_id: "main".to_string(),
                migration_id: "gone".to_string(),
                up_script_sha256: Sha256Hash::calculate(b"select 1;"),
                reformatted_up_script_sha256: None,
                is_dependency: true,
                applied_at: DateTime::<Utc>::MIN_UTC,
                applied_by: "tester".to_string(),
            },
        ];

        let joined = repository.with_migrations(&applications);

        assert_eq!(joined.len(), 2);
        assert!(joined[0].1.is_some());
        assert!(joined[1].1.is_none());
    }
}
