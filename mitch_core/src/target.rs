use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::{Connection, Executor, FromRow, PgConnection};
use tracing::debug;

use crate::{
    errors::{MigrationLoadError, TargetError},
    identifier::CompositeId,
    migration::Migration,
    repository::Repository,
    sha256::Sha256Hash,
};


pub const METADATA_SCHEMA_NAME: &str = "mitch";



/// A metadata row attesting that a migration has been applied
/// against the target database.
#[derive(Clone, Debug)]
pub struct MigrationApplication {
    pub repository_id: String,

    pub migration_id: String,

    /// SHA-256 of the up script as it was applied.
    pub up_script_sha256: Sha256Hash,

    /// SHA-256 of the canonicalized up script, when recorded.
    pub reformatted_up_script_sha256: Option<Sha256Hash>,

    /// Whether the migration was brought in only as a prerequisite
    /// of something else.
    pub is_dependency: bool,

    pub applied_at: DateTime<Utc>,

    pub applied_by: String,
}

impl MigrationApplication {
    pub fn id(&self) -> CompositeId {
        CompositeId::new(self.repository_id.as_str(), self.migration_id.as_str())
    }

    /// An application matches a migration when either the raw or the
    /// canonical up-script hash agrees with the stored one. The raw hash is
    /// the fast path; the canonical hash lets cosmetic reformatting count
    /// as unchanged.
    pub fn matches(&self, migration: &Migration) -> Result<bool, MigrationLoadError> {
        if &self.up_script_sha256 == migration.up_script_sha256()? {
            return Ok(true);
        }

        match self.reformatted_up_script_sha256.as_ref() {
            Some(reformatted_hash) => {
                Ok(reformatted_hash == migration.reformatted_up_script_sha256()?)
            }
            None => Ok(false),
        }
    }
}


#[derive(FromRow)]
struct IntermediateApplicationRow {
    repository_id: String,

    migration_id: String,

    up_script_sha256: String,

    reformatted_up_script_sha256: Option<String>,

    is_dependency: bool,

    applied_at: DateTime<Utc>,

    applied_by: String,
}

impl IntermediateApplicationRow {
    fn try_into_application(self) -> Result<MigrationApplication, TargetError> {
        let id = CompositeId::new(self.repository_id.as_str(), self.migration_id.as_str());

        let up_script_sha256 = Sha256Hash::try_from_hex_str(self.up_script_sha256.trim())
            .map_err(|_| TargetError::InvalidRow {
                id: id.clone(),
                reason: "invalid up_script_sha256 column: not a 256-bit hex digest".into(),
            })?;

        let reformatted_up_script_sha256 = match self.reformatted_up_script_sha256 {
            Some(reformatted_hex) => Some(
                Sha256Hash::try_from_hex_str(reformatted_hex.trim()).map_err(|_| {
                    TargetError::InvalidRow {
                        id: id.clone(),
                        reason:
                            "invalid reformatted_up_script_sha256 column: not a 256-bit hex digest"
                                .into(),
                    }
                })?,
            ),
            None => None,
        };

        Ok(MigrationApplication {
            repository_id: self.repository_id,
            migration_id: self.migration_id,
            up_script_sha256,
            reformatted_up_script_sha256,
            is_dependency: self.is_dependency,
            applied_at: self.applied_at,
            applied_by: self.applied_by,
        })
    }
}



/// A handle to the managed database and its `mitch` metadata schema.
///
/// All mutating operations are issued on a single connection and expect the
/// caller to have opened a transaction; every user command spans exactly one.
/// The application snapshot is materialized on first access and invalidated
/// by every mutating call.
pub struct Target {
    connection: PgConnection,

    applications: Option<Vec<MigrationApplication>>,
}

impl Target {
    pub async fn connect(database_url: &str) -> Result<Self, TargetError> {
        let connection = PgConnection::connect(database_url)
            .await
            .map_err(|error| TargetError::UnableToConnect { error })?;

        Self::new(connection).await
    }

    /// Wraps an established connection, ensuring the metadata schema exists.
    pub async fn new(connection: PgConnection) -> Result<Self, TargetError> {
        let mut target = Self {
            connection,
            applications: None,
        };

        target.install_metadata_schema().await?;

        Ok(target)
    }

    /// Creates the metadata schema, tables and indexes if absent,
    /// within a single transaction.
    async fn install_metadata_schema(&mut self) -> Result<(), TargetError> {
        self.begin_transaction().await?;

        let schema_statements = [
            "create schema if not exists mitch",
            "create table if not exists mitch.repositories (
                repository_id text primary key
            )",
            "create table if not exists mitch.applied_migrations (
                repository_id text not null
                    references mitch.repositories (repository_id)
                    on update cascade on delete restrict,
                migration_id text not null,
                up_script_sha256 char(64) not null,
                reformatted_up_script_sha256 char(64),
                is_dependency boolean not null default false,
                applied_at timestamptz not null default statement_timestamp(),
                applied_by name not null default current_user,
                constraint pk__applied_migrations
                    primary key (repository_id, migration_id)
            )",
            "create index if not exists ix__applied_migrations__applied_at
                on mitch.applied_migrations using btree (applied_at)",
            "create index if not exists ix__applied_migrations__up_script_sha256
                on mitch.applied_migrations using hash (up_script_sha256)",
            "create index if not exists ix__applied_migrations__reformatted_up_script_sha256
                on mitch.applied_migrations using hash (reformatted_up_script_sha256)",
            "create index if not exists ix__applied_migrations__composite_id
                on mitch.applied_migrations using btree ((repository_id || '::' || migration_id))",
        ];

        for statement in schema_statements {
            if let Err(error) = self.connection.execute(statement).await {
                self.rollback_transaction().await.ok();

                return Err(TargetError::QueryFailed { error });
            }
        }

        self.commit_transaction().await
    }


    pub async fn begin_transaction(&mut self) -> Result<(), TargetError> {
        self.connection
            .execute("begin")
            .await
            .map_err(|error| TargetError::TransactionFailed { error })?;

        Ok(())
    }

    pub async fn commit_transaction(&mut self) -> Result<(), TargetError> {
        self.connection
            .execute("commit")
            .await
            .map_err(|error| TargetError::TransactionFailed { error })?;

        Ok(())
    }

    pub async fn rollback_transaction(&mut self) -> Result<(), TargetError> {
        self.connection
            .execute("rollback")
            .await
            .map_err(|error| TargetError::TransactionFailed { error })?;

        Ok(())
    }


    /// The current application snapshot, in `applied_at` order.
    pub async fn applications(&mut self) -> Result<&[MigrationApplication], TargetError> {
        if self.applications.is_none() {
            let rows: Vec<IntermediateApplicationRow> = sqlx::query_as(
                "select
                    repository_id, migration_id,
                    up_script_sha256, reformatted_up_script_sha256,
                    is_dependency, applied_at, applied_by::text as applied_by
                from mitch.applied_migrations
                order by applied_at",
            )
            .fetch_all(&mut self.connection)
            .await
            .map_err(|error| TargetError::QueryFailed { error })?;

            let mut applications = Vec::with_capacity(rows.len());
            for row in rows {
                applications.push(row.try_into_application()?);
            }

            self.applications = Some(applications);
        }

        // PANIC SAFETY: Populated above whenever the cache was empty.
        Ok(self
            .applications
            .as_deref()
            .expect("application cache was just populated"))
    }

    fn invalidate_application_cache(&mut self) {
        self.applications = None;
    }

    /// Pairs each migration with its current application record, if any.
    pub async fn with_applications<'m>(
        &mut self,
        migrations: &[&'m Migration],
    ) -> Result<Vec<(&'m Migration, Option<MigrationApplication>)>, TargetError> {
        let applications = self.applications().await?;

        Ok(migrations
            .iter()
            .map(|&migration| {
                let application = applications
                    .iter()
                    .find(|application| {
                        application.repository_id == migration.id().repository_id
                            && application.migration_id == migration.id().migration_id
                    })
                    .cloned();

                (migration, application)
            })
            .collect())
    }


    /// Executes the migration's up statements in declared order, then
    /// upserts its application row (and its repository row), refreshing
    /// `applied_at` and `applied_by` from their column defaults.
    pub async fn up(
        &mut self,
        migration: &Migration,
        as_dependency: bool,
    ) -> Result<(), TargetError> {
        for statement in migration.up_statements()? {
            debug!(
                migration = %migration.id(),
                statement = %collapse_whitespace(statement),
                "Executing up statement."
            );

            self.connection
                .execute(statement.as_str())
                .await
                .map_err(|error| TargetError::StatementFailed {
                    id: migration.id().clone(),
                    error,
                })?;
        }

        sqlx::query(
            "insert into mitch.repositories (repository_id)
            values ($1)
            on conflict (repository_id) do nothing",
        )
        .bind(migration.id().repository_id.as_str())
        .execute(&mut self.connection)
        .await
        .map_err(|error| TargetError::QueryFailed { error })?;

        sqlx::query(
            "insert into mitch.applied_migrations
                (repository_id, migration_id, is_dependency,
                up_script_sha256, reformatted_up_script_sha256)
            values ($1, $2, $3, $4, $5)
            on conflict (repository_id, migration_id) do update set
                is_dependency = excluded.is_dependency,
                up_script_sha256 = excluded.up_script_sha256,
                reformatted_up_script_sha256 = excluded.reformatted_up_script_sha256,
                applied_at = excluded.applied_at,
                applied_by = excluded.applied_by",
        )
        .bind(migration.id().repository_id.as_str())
        .bind(migration.id().migration_id.as_str())
        .bind(as_dependency)
        .bind(migration.up_script_sha256()?.to_hex_string())
        .bind(migration.reformatted_up_script_sha256()?.to_hex_string())
        .execute(&mut self.connection)
        .await
        .map_err(|error| TargetError::QueryFailed { error })?;

        self.invalidate_application_cache();

        Ok(())
    }

    /// Executes the migration's down statements in declared order,
    /// then deletes its application row.
    pub async fn down(&mut self, migration: &Migration) -> Result<(), TargetError> {
        for statement in migration.down_statements()? {
            debug!(
                migration = %migration.id(),
                statement = %collapse_whitespace(statement),
                "Executing down statement."
            );

            self.connection
                .execute(statement.as_str())
                .await
                .map_err(|error| TargetError::StatementFailed {
                    id: migration.id().clone(),
                    error,
                })?;
        }

        sqlx::query(
            "delete from mitch.applied_migrations
            where repository_id = $1 and migration_id = $2",
        )
        .bind(migration.id().repository_id.as_str())
        .bind(migration.id().migration_id.as_str())
        .execute(&mut self.connection)
        .await
        .map_err(|error| TargetError::QueryFailed { error })?;

        self.invalidate_application_cache();

        Ok(())
    }

    /// Replaces the stored hashes and dependency flag of an existing
    /// application without running any script, touching the row only when
    /// at least one of them actually differs.
    pub async fn fix_hashes_and_status(
        &mut self,
        migration: &Migration,
        is_dependency: bool,
    ) -> Result<(), TargetError> {
        sqlx::query(
            "update mitch.applied_migrations set
                is_dependency = $3,
                up_script_sha256 = $4,
                reformatted_up_script_sha256 = $5
            where
                repository_id = $1
                and migration_id = $2
                and (
                    up_script_sha256 is distinct from $4
                    or reformatted_up_script_sha256 is distinct from $5
                    or is_dependency is distinct from $3
                )",
        )
        .bind(migration.id().repository_id.as_str())
        .bind(migration.id().migration_id.as_str())
        .bind(is_dependency)
        .bind(migration.up_script_sha256()?.to_hex_string())
        .bind(migration.reformatted_up_script_sha256()?.to_hex_string())
        .execute(&mut self.connection)
        .await
        .map_err(|error| TargetError::QueryFailed { error })?;

        self.invalidate_application_cache();

        Ok(())
    }


    /// Applied migrations that still exist on disk, in application order.
    /// Dependency-applied migrations are excluded unless requested.
    pub async fn installed_migrations<'r>(
        &mut self,
        repository: &'r Repository,
        include_dependencies: bool,
    ) -> Result<Vec<&'r Migration>, TargetError> {
        let applications = self.applications().await?;

        let mut installed = Vec::new();
        for (application, migration) in repository.with_migrations(applications) {
            if let Some(migration) = migration {
                if !application.is_dependency || include_dependencies {
                    installed.push(migration);
                }
            }
        }

        Ok(installed)
    }

    /// Applied migrations whose on-disk scripts no longer match the
    /// recorded hashes.
    pub async fn modified_migrations<'r>(
        &mut self,
        repository: &'r Repository,
    ) -> Result<Vec<&'r Migration>, TargetError> {
        let applications = self.applications().await?;

        let mut modified = Vec::new();
        for (application, migration) in repository.with_migrations(applications) {
            if let Some(migration) = migration {
                if !application.matches(migration)? {
                    modified.push(migration);
                }
            }
        }

        Ok(modified)
    }

    /// Reverts every installed migration nothing in `except_migrations`
    /// (or, with no exceptions, nothing explicitly applied) still needs,
    /// dependants first. Returns the reverted ids in revert order.
    ///
    /// The caller is expected to hold the command's transaction open.
    pub async fn prune(
        &mut self,
        repository: &Repository,
        except_migrations: &[&Migration],
    ) -> Result<Vec<CompositeId>, TargetError> {
        let installed = self.installed_migrations(repository, true).await?;

        let needed: HashSet<&CompositeId> = if !except_migrations.is_empty() {
            except_migrations
                .iter()
                .map(|migration| migration.id())
                .collect()
        } else {
            self.installed_migrations(repository, false)
                .await?
                .into_iter()
                .map(|migration| migration.id())
                .collect()
        };

        let dangling: HashSet<&CompositeId> = installed
            .iter()
            .map(|migration| migration.id())
            .filter(|id| !needed.contains(id))
            .collect();

        let dangling_migrations: Vec<&Migration> = installed
            .iter()
            .copied()
            .filter(|migration| dangling.contains(migration.id()))
            .collect();

        let ordered = repository.dependencies_of(&dangling_migrations)?;

        let mut reverted = Vec::new();
        for migration in ordered
            .iter()
            .filter(|migration| dangling.contains(migration.id()))
            .rev()
        {
            self.down(migration).await?;
            reverted.push(migration.id().clone());
        }

        Ok(reverted)
    }
}


fn collapse_whitespace(statement: &str) -> String {
    statement.split_whitespace().collect::<Vec<_>>().join(" ")
}


#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::migration::{
        DOWN_SCRIPT_FILE_NAME,
        MIGRATION_DESCRIPTOR_FILE_NAME,
        UP_SCRIPT_FILE_NAME,
    };
    use crate::sql;

    fn write_migration(directory: &Path, up: &str) -> Migration {
        fs::create_dir_all(directory).unwrap();
        fs::write(directory.join(MIGRATION_DESCRIPTOR_FILE_NAME), "").unwrap();
        fs::write(directory.join(UP_SCRIPT_FILE_NAME), up).unwrap();
        fs::write(directory.join(DOWN_SCRIPT_FILE_NAME), "select 1;").unwrap();

        Migration::load_from_directory(directory, "main", directory.parent().unwrap()).unwrap()
    }

    fn application_for(up: &str, reformatted: Option<&str>) -> MigrationApplication {
        MigrationApplication {
            repository_id: "main".to_string(),
            migration_id: "m".to_string(),
            up_script_sha256: Sha256Hash::calculate(up.as_bytes()),
            reformatted_up_script_sha256: reformatted
                .map(|script| Sha256Hash::calculate(sql::canonicalize_script(script).as_bytes())),
            is_dependency: false,
            applied_at: DateTime::<Utc>::MIN_UTC,
            applied_by: "tester".to_string(),
        }
    }

    #[test]
    fn application_matches_identical_raw_script() {
        let temporary_directory = tempfile::tempdir().unwrap();
        let migration = write_migration(
            &temporary_directory.path().join("m"),
            "create table a (x integer);",
        );

        let application = application_for("create table a (x integer);", None);

        assert!(application.matches(&migration).unwrap());
    }

    #[test]
    fn application_matches_cosmetically_reformatted_script() {
        let temporary_directory = tempfile::tempdir().unwrap();
        let migration = write_migration(
            &temporary_directory.path().join("m"),
            "create   table a\n  (x integer);",
        );

        // The raw hash was recorded for the terse spelling, the canonical
        // hash for the same statement; only the latter still matches.
        let application = application_for(
            "create table a (x integer);",
            Some("create table a (x integer);"),
        );

        assert!(application.matches(&migration).unwrap());
    }

    #[test]
    fn application_does_not_match_a_different_script() {
        let temporary_directory = tempfile::tempdir().unwrap();
        let migration = write_migration(
            &temporary_directory.path().join("m"),
            "create table b (y integer);",
        );

        let application = application_for(
            "create table a (x integer);",
            Some("create table a (x integer);"),
        );

        assert!(!application.matches(&migration).unwrap());
    }

    #[test]
    fn intermediate_row_requires_valid_hex_digests() {
        let row = IntermediateApplicationRow {
            repository_id: "main".to_string(),
            migration_id: "m".to_string(),
            up_script_sha256: "not-a-digest".to_string(),
            reformatted_up_script_sha256: None,
            is_dependency: false,
            applied_at: DateTime::<Utc>::MIN_UTC,
            applied_by: "tester".to_string(),
        };

        assert!(matches!(
            row.try_into_application().unwrap_err(),
            TargetError::InvalidRow { .. }
        ));
    }

    #[test]
    fn intermediate_row_round_trips_valid_digests() {
        let up_hash = Sha256Hash::calculate(b"create table a (x integer);");

        let row = IntermediateApplicationRow {
            repository_id: "main".to_string(),
            migration_id: "m".to_string(),
            up_script_sha256: up_hash.to_hex_string(),
            reformatted_up_script_sha256: Some(up_hash.to_hex_string()),
            is_dependency: true,
            applied_at: DateTime::<Utc>::MIN_UTC,
            applied_by: "tester".to_string(),
        };

        let application = row.try_into_application().unwrap();

        assert_eq!(application.up_script_sha256, up_hash);
        assert_eq!(application.reformatted_up_script_sha256, Some(up_hash));
        assert!(application.is_dependency);
    }
}
