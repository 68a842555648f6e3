use std::collections::HashSet;

use miette::{miette, Context, IntoDiagnostic, Result};
use mitch_core::{
    identifier::CompositeId,
    migration::Migration,
    target::{MigrationApplication, Target},
};

use crate::{cli::RerunModifiedCommandArguments, commands::confirm};


pub fn cli_rerun_modified(arguments: RerunModifiedCommandArguments) -> Result<()> {
    let async_runtime = tokio::runtime::Runtime::new()
        .into_diagnostic()
        .wrap_err("failed to initialize tokio async runtime")?;

    async_runtime
        .block_on(cli_rerun_modified_inner(arguments))
        .wrap_err("failed to run root async task to completion")
}


async fn cli_rerun_modified_inner(arguments: RerunModifiedCommandArguments) -> Result<()> {
    let repository = super::discover_repository()?;

    let database_url = arguments.target.database_url().into_diagnostic()?;
    let mut target = Target::connect(&database_url)
        .await
        .into_diagnostic()
        .wrap_err("failed to prepare target database")?;


    let modified_on_disk = target
        .modified_migrations(&repository)
        .await
        .into_diagnostic()
        .wrap_err("failed to determine modified migrations")?;

    let selected_migrations = repository
        .by_ids(arguments.migrations.iter())
        .into_diagnostic()
        .wrap_err("failed to resolve selected migrations")?;

    let selected_set: HashSet<&CompositeId> = selected_migrations
        .iter()
        .map(|migration| migration.id())
        .collect();

    // An explicit selection restricts the re-run to those migrations.
    let modified: Vec<&Migration> = if selected_migrations.is_empty() {
        modified_on_disk
    } else {
        modified_on_disk
            .into_iter()
            .filter(|migration| selected_set.contains(migration.id()))
            .collect()
    };

    if modified.is_empty() {
        return Ok(());
    }

    let modified_set: HashSet<&CompositeId> = modified
        .iter()
        .map(|migration| migration.id())
        .collect();

    let unmodified: Vec<&&Migration> = selected_migrations
        .iter()
        .filter(|migration| !modified_set.contains(migration.id()))
        .collect();
    if !unmodified.is_empty() {
        println!("The following migrations have not been modified and don't need to be re-run:");
        for migration in &unmodified {
            println!("- {}", migration.id());
        }
    }


    // Dependants must be reverted first and re-applied afterwards.
    let dependants = repository
        .dependants_of(&modified)
        .into_diagnostic()
        .wrap_err("failed to order migrations")?;

    let with_dependants: Vec<(&Migration, MigrationApplication)> = target
        .with_applications(&dependants)
        .await
        .into_diagnostic()
        .wrap_err("failed to load current applications")?
        .into_iter()
        .filter_map(|(migration, application)| {
            application.map(|application| (migration, application))
        })
        .collect();

    let unselected: Vec<&CompositeId> = with_dependants
        .iter()
        .filter(|(migration, _)| !selected_set.contains(migration.id()))
        .map(|(migration, _)| migration.id())
        .collect();

    if !unselected.is_empty() && !arguments.yes {
        println!("Must also re-run the following migrations:");
        for id in &unselected {
            println!("- {}", id);
        }

        if !confirm("Do you want to re-run them?")? {
            println!("Aborted, no migrations were re-run.");

            return Ok(());
        }
    }


    target.begin_transaction().await.into_diagnostic()?;

    match rerun_all(&mut target, &with_dependants).await {
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


async fn rerun_all(
    target: &mut Target,
    with_dependants: &[(&Migration, MigrationApplication)],
) -> Result<()> {
    for (migration, _) in with_dependants {
        println!("Revert migration {}", migration.id());

        target
            .down(migration)
            .await
            .into_diagnostic()
            .wrap_err_with(|| miette!("failed to revert migration {}", migration.id()))?;
    }

    // Re-apply dependencies-first, preserving each prior dependency flag.
    for (migration, application) in with_dependants.iter().rev() {
        println!("Run migration {}", migration.id());

        target
            .up(migration, application.is_dependency)
            .await
            .into_diagnostic()
            .wrap_err_with(|| miette!("failed to re-apply migration {}", migration.id()))?;
    }

    Ok(())
}
