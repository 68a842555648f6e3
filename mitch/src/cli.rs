use std::{
    env::{self, VarError},
    path::PathBuf,
    str::FromStr,
};

use clap::{ArgAction, Args, Parser, Subcommand};
use sqlx::postgres::PgConnectOptions;
use thiserror::Error;


#[derive(Parser)]
#[command(
    name = "mitch",
    author,
    about = "Dependency-aware PostgreSQL schema migration tool.",
    version
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: CliCommand,
}



#[derive(Subcommand)]
pub enum CliCommand {
    #[command(
        name = "up",
        about = "Applies the chosen migrations, together with everything they depend on, \
                to the target database."
    )]
    Up(UpCommandArguments),

    #[command(
        name = "down",
        about = "Reverts the chosen migrations, together with everything that depends on them. \
                Note that in general, this is a destructive action."
    )]
    Down(DownCommandArguments),

    #[command(
        name = "prune",
        about = "Reverts installed migrations that are no longer needed by anything \
                that was applied explicitly."
    )]
    Prune(PruneCommandArguments),

    #[command(
        name = "rerun-modified",
        about = "Reverts and re-applies migrations whose scripts were modified on disk \
                after they were applied."
    )]
    RerunModified(RerunModifiedCommandArguments),

    #[command(subcommand, name = "ls", about = "Lists migrations and repositories.")]
    Ls(LsCommand),

    #[command(
        subcommand,
        name = "add",
        about = "Creates a migration or repository skeleton on disk."
    )]
    Add(AddCommand),
}



#[derive(Debug, Error)]
pub enum TargetUrlError {
    #[error(
        "no connection URL for target \"{}\": set the {} environment variable",
        .target_name,
        .variable_name
    )]
    MissingDatabaseUrl {
        target_name: String,

        variable_name: String,
    },

    #[error("environment variable {} is not valid Unicode", .variable_name)]
    ValueNotUnicode { variable_name: String },

    #[error("environment variable {} is not a valid PostgreSQL URL", .variable_name)]
    InvalidDatabaseUrlFormat {
        variable_name: String,

        #[source]
        error: sqlx::Error,
    },
}


#[derive(Args)]
pub struct TargetArgs {
    #[arg(
        long = "target",
        short = 't',
        default_value = "default",
        help = "Name of the target database. The connection URL is read from the environment: \
                DATABASE_URL for the default target, MITCH_TARGET_<NAME>_DATABASE_URL otherwise."
    )]
    pub target: String,
}

impl TargetArgs {
    fn variable_name(&self) -> String {
        if self.target == "default" {
            return "DATABASE_URL".to_string();
        }

        format!(
            "MITCH_TARGET_{}_DATABASE_URL",
            self.target.to_ascii_uppercase().replace('-', "_")
        )
    }

    /// Resolves the connection URL for the selected target
    /// from the environment.
    pub fn database_url(&self) -> Result<String, TargetUrlError> {
        let variable_name = self.variable_name();

        let database_url = match env::var(&variable_name) {
            Ok(database_url) => database_url,
            Err(VarError::NotPresent) => {
                return Err(TargetUrlError::MissingDatabaseUrl {
                    target_name: self.target.clone(),
                    variable_name,
                });
            }
            Err(VarError::NotUnicode(_)) => {
                return Err(TargetUrlError::ValueNotUnicode { variable_name });
            }
        };

        PgConnectOptions::from_str(&database_url).map_err(|error| {
            TargetUrlError::InvalidDatabaseUrlFormat {
                variable_name,
                error,
            }
        })?;

        Ok(database_url)
    }
}



#[derive(Args)]
pub struct UpCommandArguments {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(
        long = "from-file",
        value_name = "PATH",
        help = "Path to a file listing one migration id per non-blank line. \
                May be given multiple times."
    )]
    pub from_files: Vec<PathBuf>,

    #[arg(
        long = "save",
        value_name = "PATH",
        help = "Appends the id of every explicitly applied migration to this file."
    )]
    pub save: Option<PathBuf>,

    #[arg(
        long = "as-dependency",
        action = ArgAction::SetTrue,
        help = "Records the chosen migrations as dependencies instead of \
                explicit applications."
    )]
    pub as_dependency: bool,

    #[arg(
        value_name = "MIGRATION",
        help = "Migration ids, either bare (\"users/create\") or qualified \
                (\"repository::users/create\")."
    )]
    pub migrations: Vec<String>,
}



#[derive(Args)]
pub struct DownCommandArguments {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(
        long = "yes",
        action = ArgAction::SetTrue,
        help = "Reverts dependants without asking for confirmation."
    )]
    pub yes: bool,

    #[arg(
        long = "prune",
        action = ArgAction::SetTrue,
        help = "Afterwards, also reverts dependencies that nothing needs anymore."
    )]
    pub prune: bool,

    #[arg(value_name = "MIGRATION")]
    pub migrations: Vec<String>,
}



#[derive(Args)]
pub struct PruneCommandArguments {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(
        long = "except",
        value_name = "MIGRATION",
        help = "Migration ids that must stay installed. May be given multiple times."
    )]
    pub except: Vec<String>,

    #[arg(
        long = "except-from-file",
        value_name = "PATH",
        help = "Path to a file listing one migration id to keep per non-blank line. \
                May be given multiple times."
    )]
    pub except_from_files: Vec<PathBuf>,
}



#[derive(Args)]
pub struct RerunModifiedCommandArguments {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(
        long = "yes",
        action = ArgAction::SetTrue,
        help = "Re-runs affected dependants without asking for confirmation."
    )]
    pub yes: bool,

    #[arg(
        value_name = "MIGRATION",
        help = "Restricts the re-run to these migration ids."
    )]
    pub migrations: Vec<String>,
}



#[derive(Subcommand)]
pub enum LsCommand {
    #[command(name = "up", about = "Lists explicitly installed migrations.")]
    Up(LsUpCommandArguments),

    #[command(
        name = "modified",
        about = "Lists installed migrations whose scripts changed on disk."
    )]
    Modified(LsModifiedCommandArguments),

    #[command(
        name = "available",
        about = "Lists every migration of the repository and its applied state."
    )]
    Available(LsAvailableCommandArguments),

    #[command(
        name = "repositories",
        about = "Lists the repository and its sub-repositories."
    )]
    Repositories,
}


#[derive(Args)]
pub struct LsUpCommandArguments {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(
        long = "include-dependencies",
        short = 'd',
        action = ArgAction::SetTrue,
        help = "Also lists migrations that were only installed as dependencies."
    )]
    pub include_dependencies: bool,
}

#[derive(Args)]
pub struct LsModifiedCommandArguments {
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Args)]
pub struct LsAvailableCommandArguments {
    #[command(flatten)]
    pub target: TargetArgs,
}



#[derive(Subcommand)]
pub enum AddCommand {
    #[command(name = "migration", about = "Creates a new migration skeleton.")]
    Migration(AddMigrationCommandArguments),

    #[command(name = "repository", about = "Creates a new repository skeleton.")]
    Repository(AddRepositoryCommandArguments),
}


#[derive(Args)]
pub struct AddMigrationCommandArguments {
    #[arg(
        value_name = "PATH",
        help = "Directory to create for the new migration. Must not exist yet."
    )]
    pub path: PathBuf,

    #[arg(
        long = "id",
        help = "Id of the new migration. Defaults to the path relative to the repository root."
    )]
    pub id: Option<String>,

    #[arg(
        long = "non-transactional",
        action = ArgAction::SetTrue,
        help = "Marks the migration as not safe to run inside a transaction."
    )]
    pub non_transactional: bool,

    #[arg(
        long = "idempotent",
        action = ArgAction::SetTrue,
        help = "Marks the migration as safe to re-apply over an older version of itself."
    )]
    pub idempotent: bool,

    #[arg(
        long = "dependencies",
        short = 'd',
        value_name = "MIGRATION",
        help = "Migration ids the new migration depends on. May be given multiple times."
    )]
    pub dependencies: Vec<String>,
}


#[derive(Args)]
pub struct AddRepositoryCommandArguments {
    #[arg(
        value_name = "PATH",
        help = "Directory to create for the new repository. Must not exist yet."
    )]
    pub path: PathBuf,

    #[arg(
        long = "name",
        help = "Name of the new repository. Defaults to the path relative to the \
                enclosing repository root (or to the working directory)."
    )]
    pub name: Option<String>,
}
