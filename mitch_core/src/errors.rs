use std::{borrow::Cow, path::PathBuf};

use thiserror::Error;

use crate::identifier::{CompositeId, InvalidCompositeIdError};



#[derive(Debug, Error)]
pub enum MigrationLoadError {
    #[error(
        "migration descriptor \"{}\" could not be read",
        .file_path.display()
    )]
    UnableToReadDescriptor {
        file_path: PathBuf,

        #[source]
        error: std::io::Error,
    },

    #[error(
        "migration descriptor \"{}\" could not be parsed as TOML",
        .file_path.display()
    )]
    UnableToParseDescriptor {
        file_path: PathBuf,

        #[source]
        error: Box<toml::de::Error>,
    },

    #[error(
        "invalid structure for migration at \"{}\": {}",
        .migration_directory_path.display(),
        .reason
    )]
    InvalidMigrationStructure {
        migration_directory_path: PathBuf,

        reason: Cow<'static, str>,
    },

    #[error(
        "failed to read migration script \"{}\"",
        .path.display()
    )]
    UnableToReadScript {
        path: PathBuf,

        #[source]
        error: std::io::Error,
    },
}



#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(
        "no repository descriptor found in \"{}\" or any of its parents",
        .start_directory.display()
    )]
    NoRepositoryFound { start_directory: PathBuf },

    #[error("\"{}\" is not a directory", .path.display())]
    NotADirectory { path: PathBuf },

    #[error(
        "failed to canonicalize repository path \"{}\"",
        .path.display()
    )]
    UnableToCanonicalizePath {
        path: PathBuf,

        #[source]
        error: std::io::Error,
    },

    #[error(
        "repository descriptor \"{}\" could not be read",
        .file_path.display()
    )]
    UnableToReadManifest {
        file_path: PathBuf,

        #[source]
        error: std::io::Error,
    },

    #[error(
        "repository descriptor \"{}\" could not be parsed as TOML",
        .file_path.display()
    )]
    UnableToParseManifest {
        file_path: PathBuf,

        #[source]
        error: Box<toml::de::Error>,
    },

    #[error(
        "repository descriptor \"{}\" has no [repository] section",
        .file_path.display()
    )]
    MissingRepositorySection { file_path: PathBuf },

    #[error(
        "repository name \"{}\" is used by more than one repository",
        .name
    )]
    DuplicateRepositoryName { name: String },

    #[error("migration id {} is not unique within its repository", .id)]
    DuplicateMigrationId { id: CompositeId },

    #[error(
        "failed to scan repository tree at \"{}\"",
        .directory_path.display()
    )]
    UnableToScanRepository {
        directory_path: PathBuf,

        #[source]
        error: fs_more::error::DirectoryScanError,
    },

    #[error("failed to load migration")]
    MigrationLoad {
        #[from]
        #[source]
        error: MigrationLoadError,
    },

    #[error("invalid migration identifier")]
    InvalidIdentifier {
        #[from]
        #[source]
        error: InvalidCompositeIdError,
    },

    #[error(
        "unknown dependency \"{}\" declared by migration {}",
        .dependency,
        .declared_by
    )]
    UnknownDependency {
        declared_by: CompositeId,

        dependency: String,
    },

    #[error(
        "relative dependency \"{}\" of migration {} leaves its repository",
        .dependency,
        .declared_by
    )]
    RelativeDependencyEscapesRepository {
        declared_by: CompositeId,

        dependency: String,
    },

    #[error("unknown migration \"{}\"", .id)]
    UnknownMigration { id: String },

    #[error(
        "unknown repository \"{}\" referenced by \"{}\"",
        .repository_id,
        .id
    )]
    UnknownRepository {
        repository_id: String,

        id: String,
    },

    #[error("dependency cycle involving migration {}", .id)]
    DependencyCycle { id: CompositeId },
}



#[derive(Debug, Error)]
pub enum TargetError {
    #[error("unable to connect to database")]
    UnableToConnect {
        #[source]
        error: sqlx::Error,
    },

    #[error("failed to execute query in database")]
    QueryFailed {
        #[source]
        error: sqlx::Error,
    },

    #[error("failed while executing statement of migration {}", .id)]
    StatementFailed {
        id: CompositeId,

        #[source]
        error: sqlx::Error,
    },

    #[error("failed while starting, committing or rolling back transaction")]
    TransactionFailed {
        #[source]
        error: sqlx::Error,
    },

    #[error(
        "invalid row {} encountered in migration metadata table: {}",
        .id,
        .reason
    )]
    InvalidRow {
        id: CompositeId,

        reason: Cow<'static, str>,
    },

    #[error("failed to load migration from disk")]
    MigrationLoad {
        #[from]
        #[source]
        error: MigrationLoadError,
    },

    #[error("repository error encountered")]
    Repository {
        #[from]
        #[source]
        error: RepositoryError,
    },
}
