use std::collections::BTreeSet;

use miette::{Context, IntoDiagnostic, Result};
use mitch_core::target::Target;

use crate::cli::PruneCommandArguments;


pub fn cli_prune(arguments: PruneCommandArguments) -> Result<()> {
    let async_runtime = tokio::runtime::Runtime::new()
        .into_diagnostic()
        .wrap_err("failed to initialize tokio async runtime")?;

    async_runtime
        .block_on(cli_prune_inner(arguments))
        .wrap_err("failed to run root async task to completion")
}


async fn cli_prune_inner(arguments: PruneCommandArguments) -> Result<()> {
    let repository = super::discover_repository()?;

    let database_url = arguments.target.database_url().into_diagnostic()?;
    let mut target = Target::connect(&database_url)
        .await
        .into_diagnostic()
        .wrap_err("failed to prepare target database")?;


    // Migrations that should remain installed.
    let mut except_ids: BTreeSet<String> = arguments.except.iter().cloned().collect();
    for id_list_file in &arguments.except_from_files {
        except_ids.extend(super::read_id_list_file(id_list_file)?);
    }

    let except_migrations = repository
        .by_ids(except_ids.iter())
        .into_diagnostic()
        .wrap_err("failed to resolve excepted migrations")?;


    target.begin_transaction().await.into_diagnostic()?;

    let reverted = match target.prune(&repository, &except_migrations).await {
        Ok(reverted) => {
            target.commit_transaction().await.into_diagnostic()?;

            reverted
        }
        Err(error) => {
            target.rollback_transaction().await.ok();

            return Err(error)
                .into_diagnostic()
                .wrap_err("failed to prune migrations");
        }
    };

    if reverted.is_empty() {
        println!("Nothing to prune.");
    } else {
        for id in &reverted {
            println!("Revert migration {}", id);
        }
    }

    Ok(())
}
