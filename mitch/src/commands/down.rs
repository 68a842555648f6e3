use std::collections::HashSet;

use miette::{miette, Context, IntoDiagnostic, Result};
use mitch_core::{
    identifier::CompositeId,
    migration::Migration,
    repository::Repository,
    target::{MigrationApplication, Target},
};

use crate::{cli::DownCommandArguments, commands::confirm};


pub fn cli_down(arguments: DownCommandArguments) -> Result<()> {
    let async_runtime = tokio::runtime::Runtime::new()
        .into_diagnostic()
        .wrap_err("failed to initialize tokio async runtime")?;

    async_runtime
        .block_on(cli_down_inner(arguments))
        .wrap_err("failed to run root async task to completion")
}


async fn cli_down_inner(arguments: DownCommandArguments) -> Result<()> {
    let repository = super::discover_repository()?;

    let database_url = arguments.target.database_url().into_diagnostic()?;
    let mut target = Target::connect(&database_url)
        .await
        .into_diagnostic()
        .wrap_err("failed to prepare target database")?;


    let chosen_migrations = repository
        .by_ids(arguments.migrations.iter())
        .into_diagnostic()
        .wrap_err("failed to resolve chosen migrations")?;

    let chosen_set: HashSet<&CompositeId> = chosen_migrations
        .iter()
        .map(|migration| migration.id())
        .collect();

    let dependants = repository
        .dependants_of(&chosen_migrations)
        .into_diagnostic()
        .wrap_err("failed to order migrations")?;

    let pairs = target
        .with_applications(&dependants)
        .await
        .into_diagnostic()
        .wrap_err("failed to load current applications")?;


    // Anything applied that the operator did not name must be confirmed.
    let mut unchosen_applied: Vec<&CompositeId> = pairs
        .iter()
        .filter(|(migration, application)| {
            application.is_some() && !chosen_set.contains(migration.id())
        })
        .map(|(migration, _)| migration.id())
        .collect();
    unchosen_applied.sort();

    if !arguments.yes && !unchosen_applied.is_empty() {
        println!("The following migrations must be removed, too:");
        for id in &unchosen_applied {
            println!("- {}", id);
        }

        if !confirm("Do you want to remove them?")? {
            println!("Aborted, no migrations were reverted.");

            return Ok(());
        }
    }


    target.begin_transaction().await.into_diagnostic()?;

    match revert_all(&mut target, &repository, &pairs, arguments.prune).await {
        Ok(()) => {
            target.commit_transaction().await.into_diagnostic()?;

            Ok(())
        }
        Err(error) => {
            target.rollback_transaction().await.ok();

            Err(error)
        }
    }
}


async fn revert_all(
    target: &mut Target,
    repository: &Repository,
    pairs: &[(&Migration, Option<MigrationApplication>)],
    prune_afterwards: bool,
) -> Result<()> {
    for (migration, application) in pairs {
        if application.is_none() {
            continue;
        }

        println!("Revert migration {}", migration.id());

        target
            .down(migration)
            .await
            .into_diagnostic()
            .wrap_err_with(|| miette!("failed to revert migration {}", migration.id()))?;
    }

    if prune_afterwards {
        println!("Prune stale dependencies...");

        let reverted = target
            .prune(repository, &[])
            .await
            .into_diagnostic()
            .wrap_err("failed to prune stale dependencies")?;

        for id in &reverted {
            println!("Revert migration {}", id);
        }
    }

    Ok(())
}
