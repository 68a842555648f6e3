use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use chrono::{DateTime, Utc};
use path_slash::PathExt as _;
use serde::Deserialize;

use crate::{errors::MigrationLoadError, identifier::CompositeId, sha256::Sha256Hash, sql};


pub const MIGRATION_DESCRIPTOR_FILE_NAME: &str = "migration.toml";
pub const UP_SCRIPT_FILE_NAME: &str = "up.sql";
pub const DOWN_SCRIPT_FILE_NAME: &str = "down.sql";



/// Raw contents of a `migration.toml` descriptor.
///
/// Dependencies may be declared either as a top-level array
/// or under a `[relations]` table; the latter wins when both are present.
#[derive(Deserialize, Clone, Debug, Default)]
struct MigrationDescriptor {
    id: Option<String>,

    author: Option<String>,

    created_at: Option<DateTime<Utc>>,

    transactional: Option<bool>,

    idempotent: Option<bool>,

    dependencies: Option<Vec<String>>,

    relations: Option<DescriptorRelations>,
}

#[derive(Deserialize, Clone, Debug, Default)]
struct DescriptorRelations {
    dependencies: Option<Vec<String>>,
}



/// A single migration on disk: a directory holding `migration.toml`,
/// `up.sql` and `down.sql`.
///
/// Script texts, statement lists and hashes are read and computed on first
/// use, then cached for the lifetime of the instance. Dependency edges are
/// stored as [`CompositeId`] sets and resolved by the owning repository.
#[derive(Debug)]
pub struct Migration {
    id: CompositeId,

    directory: PathBuf,

    author: Option<String>,

    created_at: Option<DateTime<Utc>>,

    transactional: bool,

    idempotent: bool,

    declared_dependencies: Vec<String>,

    pub(crate) resolved_dependencies: HashSet<CompositeId>,

    pub(crate) resolved_dependants: HashSet<CompositeId>,

    up_script: OnceLock<String>,

    down_script: OnceLock<String>,

    up_statements: OnceLock<Vec<String>>,

    down_statements: OnceLock<Vec<String>>,

    reformatted_up_script: OnceLock<String>,

    up_script_sha256: OnceLock<Sha256Hash>,

    reformatted_up_script_sha256: OnceLock<Sha256Hash>,
}

impl Migration {
    /// Loads a migration from its directory.
    ///
    /// When the descriptor does not declare an `id`, the migration id
    /// defaults to the directory's path relative to the repository root
    /// (with forward slashes).
    pub(crate) fn load_from_directory(
        directory: &Path,
        repository_name: &str,
        repository_root: &Path,
    ) -> Result<Self, MigrationLoadError> {
        let descriptor_path = directory.join(MIGRATION_DESCRIPTOR_FILE_NAME);

        let descriptor_contents = fs::read_to_string(&descriptor_path).map_err(|error| {
            MigrationLoadError::UnableToReadDescriptor {
                file_path: descriptor_path.clone(),
                error,
            }
        })?;

        let descriptor: MigrationDescriptor =
            toml::from_str(&descriptor_contents).map_err(|error| {
                MigrationLoadError::UnableToParseDescriptor {
                    file_path: descriptor_path.clone(),
                    error: Box::new(error),
                }
            })?;


        for script_file_name in [UP_SCRIPT_FILE_NAME, DOWN_SCRIPT_FILE_NAME] {
            if !directory.join(script_file_name).is_file() {
                return Err(MigrationLoadError::InvalidMigrationStructure {
                    migration_directory_path: directory.to_path_buf(),
                    reason: format!("no {} file", script_file_name).into(),
                });
            }
        }


        let migration_id = match descriptor.id {
            Some(id) => id,
            None => {
                let relative_directory =
                    directory.strip_prefix(repository_root).map_err(|_| {
                        MigrationLoadError::InvalidMigrationStructure {
                            migration_directory_path: directory.to_path_buf(),
                            reason: "migration directory lies outside its repository root".into(),
                        }
                    })?;

                relative_directory.to_slash_lossy().into_owned()
            }
        };

        let declared_dependencies = descriptor
            .relations
            .and_then(|relations| relations.dependencies)
            .or(descriptor.dependencies)
            .unwrap_or_default();


        Ok(Self {
            id: CompositeId::new(repository_name, migration_id),
            directory: directory.to_path_buf(),
            author: descriptor.author,
            created_at: descriptor.created_at,
            transactional: descriptor.transactional.unwrap_or(true),
            idempotent: descriptor.idempotent.unwrap_or(false),
            declared_dependencies,
            resolved_dependencies: HashSet::new(),
            resolved_dependants: HashSet::new(),
            up_script: OnceLock::new(),
            down_script: OnceLock::new(),
            up_statements: OnceLock::new(),
            down_statements: OnceLock::new(),
            reformatted_up_script: OnceLock::new(),
            up_script_sha256: OnceLock::new(),
            reformatted_up_script_sha256: OnceLock::new(),
        })
    }


    pub fn id(&self) -> &CompositeId {
        &self.id
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn created_at(&self) -> Option<&DateTime<Utc>> {
        self.created_at.as_ref()
    }

    pub fn transactional(&self) -> bool {
        self.transactional
    }

    pub fn idempotent(&self) -> bool {
        self.idempotent
    }

    pub fn declared_dependencies(&self) -> &[String] {
        &self.declared_dependencies
    }

    pub fn resolved_dependencies(&self) -> &HashSet<CompositeId> {
        &self.resolved_dependencies
    }

    pub fn resolved_dependants(&self) -> &HashSet<CompositeId> {
        &self.resolved_dependants
    }

    /// Key for deterministic ordering among mutually independent migrations:
    /// creation date (unknown dates sort first), repository name, migration id.
    pub fn sort_key(&self) -> (DateTime<Utc>, &str, &str) {
        (
            self.created_at.unwrap_or(DateTime::<Utc>::MIN_UTC),
            self.id.repository_id.as_str(),
            self.id.migration_id.as_str(),
        )
    }


    pub fn up_script(&self) -> Result<&str, MigrationLoadError> {
        if let Some(script) = self.up_script.get() {
            return Ok(script);
        }

        let script = self.read_script(UP_SCRIPT_FILE_NAME)?;

        Ok(self.up_script.get_or_init(|| script))
    }

    pub fn down_script(&self) -> Result<&str, MigrationLoadError> {
        if let Some(script) = self.down_script.get() {
            return Ok(script);
        }

        let script = self.read_script(DOWN_SCRIPT_FILE_NAME)?;

        Ok(self.down_script.get_or_init(|| script))
    }

    pub fn up_statements(&self) -> Result<&[String], MigrationLoadError> {
        if let Some(statements) = self.up_statements.get() {
            return Ok(statements);
        }

        let statements = sql::split_statements(self.up_script()?);

        Ok(self.up_statements.get_or_init(|| statements))
    }

    pub fn down_statements(&self) -> Result<&[String], MigrationLoadError> {
        if let Some(statements) = self.down_statements.get() {
            return Ok(statements);
        }

        let statements = sql::split_statements(self.down_script()?);

        Ok(self.down_statements.get_or_init(|| statements))
    }

    /// The canonical form of the up script
    /// (see [`sql::canonicalize_script`]).
    pub fn reformatted_up_script(&self) -> Result<&str, MigrationLoadError> {
        if let Some(script) = self.reformatted_up_script.get() {
            return Ok(script);
        }

        let reformatted = self
            .up_statements()?
            .iter()
            .map(|statement| sql::canonicalize_statement(statement))
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(self.reformatted_up_script.get_or_init(|| reformatted))
    }

    /// SHA-256 of the up script as written. This is the authoritative
    /// identity of the migration's content.
    pub fn up_script_sha256(&self) -> Result<&Sha256Hash, MigrationLoadError> {
        if let Some(hash) = self.up_script_sha256.get() {
            return Ok(hash);
        }

        let hash = Sha256Hash::calculate(self.up_script()?.as_bytes());

        Ok(self.up_script_sha256.get_or_init(|| hash))
    }

    /// SHA-256 of the canonicalized up script. Stable across cosmetic
    /// reformattings of the raw source.
    pub fn reformatted_up_script_sha256(&self) -> Result<&Sha256Hash, MigrationLoadError> {
        if let Some(hash) = self.reformatted_up_script_sha256.get() {
            return Ok(hash);
        }

        let hash = Sha256Hash::calculate(self.reformatted_up_script()?.as_bytes());

        Ok(self.reformatted_up_script_sha256.get_or_init(|| hash))
    }

    fn read_script(&self, script_file_name: &str) -> Result<String, MigrationLoadError> {
        let script_path = self.directory.join(script_file_name);

        fs::read_to_string(&script_path).map_err(|error| MigrationLoadError::UnableToReadScript {
            path: script_path,
            error,
        })
    }
}


#[cfg(test)]
mod test {
    use std::fs;

    use super::*;

    fn write_migration_files(directory: &Path, descriptor: &str, up: &str, down: &str) {
        fs::create_dir_all(directory).unwrap();
        fs::write(directory.join(MIGRATION_DESCRIPTOR_FILE_NAME), descriptor).unwrap();
        fs::write(directory.join(UP_SCRIPT_FILE_NAME), up).unwrap();
        fs::write(directory.join(DOWN_SCRIPT_FILE_NAME), down).unwrap();
    }

    #[test]
    fn descriptor_defaults_are_applied() {
        let temporary_directory = tempfile::tempdir().unwrap();
        let migration_directory = temporary_directory.path().join("users/create");

        write_migration_files(&migration_directory, "", "select 1;", "select 2;");

        let migration = Migration::load_from_directory(
            &migration_directory,
            "main",
            temporary_directory.path(),
        )
        .unwrap();

        assert_eq!(migration.id(), &CompositeId::new("main", "users/create"));
        assert!(migration.transactional());
        assert!(!migration.idempotent());
        assert!(migration.author().is_none());
        assert!(migration.created_at().is_none());
        assert!(migration.declared_dependencies().is_empty());
    }

    #[test]
    fn descriptor_fields_are_parsed() {
        let temporary_directory = tempfile::tempdir().unwrap();
        let migration_directory = temporary_directory.path().join("users/create");

        write_migration_files(
            &migration_directory,
            r#"
            id = "custom-id"
            author = "someone"
            created_at = "2024-05-01T12:00:00Z"
            transactional = false
            idempotent = true
            dependencies = ["roles/create"]
            "#,
            "select 1;",
            "select 2;",
        );

        let migration = Migration::load_from_directory(
            &migration_directory,
            "main",
            temporary_directory.path(),
        )
        .unwrap();

        assert_eq!(migration.id(), &CompositeId::new("main", "custom-id"));
        assert_eq!(migration.author(), Some("someone"));
        assert!(migration.created_at().is_some());
        assert!(!migration.transactional());
        assert!(migration.idempotent());
        assert_eq!(
            migration.declared_dependencies(),
            &["roles/create".to_string()]
        );
    }

    #[test]
    fn relations_table_takes_precedence_for_dependencies() {
        let temporary_directory = tempfile::tempdir().unwrap();
        let migration_directory = temporary_directory.path().join("users/create");

        write_migration_files(
            &migration_directory,
            "dependencies = [\"ignored\"]\n\n[relations]\ndependencies = [\"roles/create\"]\n",
            "select 1;",
            "select 2;",
        );

        let migration = Migration::load_from_directory(
            &migration_directory,
            "main",
            temporary_directory.path(),
        )
        .unwrap();

        assert_eq!(
            migration.declared_dependencies(),
            &["roles/create".to_string()]
        );
    }

    #[test]
    fn missing_scripts_are_structure_errors() {
        let temporary_directory = tempfile::tempdir().unwrap();
        let migration_directory = temporary_directory.path().join("users/create");

        fs::create_dir_all(&migration_directory).unwrap();
        fs::write(
            migration_directory.join(MIGRATION_DESCRIPTOR_FILE_NAME),
            "",
        )
        .unwrap();
        fs::write(migration_directory.join(UP_SCRIPT_FILE_NAME), "select 1;").unwrap();

        let error = Migration::load_from_directory(
            &migration_directory,
            "main",
            temporary_directory.path(),
        )
        .unwrap_err();

        assert!(matches!(
            error,
            MigrationLoadError::InvalidMigrationStructure { .. }
        ));
    }

    #[test]
    fn script_hashes_distinguish_raw_from_reformatted() {
        let temporary_directory = tempfile::tempdir().unwrap();
        let migration_directory = temporary_directory.path().join("users/create");

        write_migration_files(
            &migration_directory,
            "",
            "CREATE TABLE users (id integer);",
            "DROP TABLE users;",
        );

        let migration = Migration::load_from_directory(
            &migration_directory,
            "main",
            temporary_directory.path(),
        )
        .unwrap();

        let raw_hash = migration.up_script_sha256().unwrap().clone();
        let reformatted_hash = migration.reformatted_up_script_sha256().unwrap().clone();

        assert_eq!(
            &raw_hash,
            &Sha256Hash::calculate("CREATE TABLE users (id integer);".as_bytes())
        );
        assert_eq!(
            &reformatted_hash,
            &Sha256Hash::calculate(
                sql::canonicalize_script("CREATE TABLE users (id integer);").as_bytes()
            )
        );
    }

    #[test]
    fn statement_lists_are_split_and_filtered() {
        let temporary_directory = tempfile::tempdir().unwrap();
        let migration_directory = temporary_directory.path().join("users/create");

        write_migration_files(
            &migration_directory,
            "",
            "create table users (id integer);\ncreate index users_id on users (id);",
            "-- nothing to do\n",
        );

        let migration = Migration::load_from_directory(
            &migration_directory,
            "main",
            temporary_directory.path(),
        )
        .unwrap();

        assert_eq!(migration.up_statements().unwrap().len(), 2);
        assert!(migration.down_statements().unwrap().is_empty());
    }
}
