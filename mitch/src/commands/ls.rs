use miette::{Context, IntoDiagnostic, Result};
use mitch_core::{migration::Migration, target::Target};

use crate::cli::{
    LsAvailableCommandArguments,
    LsModifiedCommandArguments,
    LsUpCommandArguments,
};


pub fn cli_ls_up(arguments: LsUpCommandArguments) -> Result<()> {
    let async_runtime = tokio::runtime::Runtime::new()
        .into_diagnostic()
        .wrap_err("failed to initialize tokio async runtime")?;

    async_runtime
        .block_on(cli_ls_up_inner(arguments))
        .wrap_err("failed to run root async task to completion")
}

async fn cli_ls_up_inner(arguments: LsUpCommandArguments) -> Result<()> {
    let repository = super::discover_repository()?;

    let database_url = arguments.target.database_url().into_diagnostic()?;
    let mut target = Target::connect(&database_url)
        .await
        .into_diagnostic()
        .wrap_err("failed to prepare target database")?;

    let installed = target
        .installed_migrations(&repository, arguments.include_dependencies)
        .await
        .into_diagnostic()
        .wrap_err("failed to list installed migrations")?;

    for migration in installed {
        println!("{}", migration.id());
    }

    Ok(())
}


pub fn cli_ls_modified(arguments: LsModifiedCommandArguments) -> Result<()> {
    let async_runtime = tokio::runtime::Runtime::new()
        .into_diagnostic()
        .wrap_err("failed to initialize tokio async runtime")?;

    async_runtime
        .block_on(cli_ls_modified_inner(arguments))
        .wrap_err("failed to run root async task to completion")
}

async fn cli_ls_modified_inner(arguments: LsModifiedCommandArguments) -> Result<()> {
    let repository = super::discover_repository()?;

    let database_url = arguments.target.database_url().into_diagnostic()?;
    let mut target = Target::connect(&database_url)
        .await
        .into_diagnostic()
        .wrap_err("failed to prepare target database")?;

    let modified = target
        .modified_migrations(&repository)
        .await
        .into_diagnostic()
        .wrap_err("failed to list modified migrations")?;

    for migration in modified {
        println!("{}", migration.id());
    }

    Ok(())
}


pub fn cli_ls_available(arguments: LsAvailableCommandArguments) -> Result<()> {
    let async_runtime = tokio::runtime::Runtime::new()
        .into_diagnostic()
        .wrap_err("failed to initialize tokio async runtime")?;

    async_runtime
        .block_on(cli_ls_available_inner(arguments))
        .wrap_err("failed to run root async task to completion")
}

async fn cli_ls_available_inner(arguments: LsAvailableCommandArguments) -> Result<()> {
    let repository = super::discover_repository()?;

    let database_url = arguments.target.database_url().into_diagnostic()?;
    let mut target = Target::connect(&database_url)
        .await
        .into_diagnostic()
        .wrap_err("failed to prepare target database")?;

    let available: Vec<&Migration> = repository.migrations().collect();
    let pairs = target
        .with_applications(&available)
        .await
        .into_diagnostic()
        .wrap_err("failed to load current applications")?;

    for (migration, application) in pairs {
        match application {
            None => println!("{}", migration.id()),
            Some(application) if application.is_dependency => {
                println!("{} (applied as dependency)", migration.id());
            }
            Some(_) => println!("{} (applied)", migration.id()),
        }
    }

    Ok(())
}


pub fn cli_ls_repositories() -> Result<()> {
    let repository = super::discover_repository()?;

    println!("{}", repository.name());
    for subrepository in repository.subrepositories() {
        println!("{}", subrepository.name());
    }

    Ok(())
}
