use clap::Parser;
use cli::{AddCommand, CliArgs, CliCommand, LsCommand};
use commands::{
    add::{cli_add_migration, cli_add_repository},
    down::cli_down,
    ls::{cli_ls_available, cli_ls_modified, cli_ls_repositories, cli_ls_up},
    prune::cli_prune,
    rerun_modified::cli_rerun_modified,
    up::cli_up,
};
use miette::{Context, IntoDiagnostic, Result};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;
mod commands;
mod errors;


pub fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    dotenvy::dotenv().ok();

    let tracing_subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .finish();

    tracing::subscriber::set_global_default(tracing_subscriber)
        .into_diagnostic()
        .wrap_err("failed to set up tracing subscriber")?;


    match cli_args.command {
        CliCommand::Up(up_command_args) => cli_up(up_command_args),
        CliCommand::Down(down_command_args) => cli_down(down_command_args),
        CliCommand::Prune(prune_command_args) => cli_prune(prune_command_args),
        CliCommand::RerunModified(rerun_command_args) => cli_rerun_modified(rerun_command_args),
        CliCommand::Ls(ls_command) => match ls_command {
            LsCommand::Up(ls_up_args) => cli_ls_up(ls_up_args),
            LsCommand::Modified(ls_modified_args) => cli_ls_modified(ls_modified_args),
            LsCommand::Available(ls_available_args) => cli_ls_available(ls_available_args),
            LsCommand::Repositories => cli_ls_repositories(),
        },
        CliCommand::Add(add_command) => match add_command {
            AddCommand::Migration(add_migration_args) => cli_add_migration(add_migration_args),
            AddCommand::Repository(add_repository_args) => cli_add_repository(add_repository_args),
        },
    }
}
