use std::{
    collections::{BTreeSet, HashSet},
    fs::OpenOptions,
    io::Write,
};

use miette::{miette, Context, IntoDiagnostic, Result};
use mitch_core::{
    identifier::CompositeId,
    migration::Migration,
    target::Target,
};

use crate::{cli::UpCommandArguments, commands::confirm, errors::StateError};


pub fn cli_up(arguments: UpCommandArguments) -> Result<()> {
    let async_runtime = tokio::runtime::Runtime::new()
        .into_diagnostic()
        .wrap_err("failed to initialize tokio async runtime")?;

    async_runtime
        .block_on(cli_up_inner(arguments))
        .wrap_err("failed to run root async task to completion")
}


async fn cli_up_inner(arguments: UpCommandArguments) -> Result<()> {
    let repository = super::discover_repository()?;

    let database_url = arguments.target.database_url().into_diagnostic()?;
    let mut target = Target::connect(&database_url)
        .await
        .into_diagnostic()
        .wrap_err("failed to prepare target database")?;


    // The chosen set is the union of command-line ids and id list files.
    let mut chosen_ids: BTreeSet<String> = arguments.migrations.iter().cloned().collect();
    for id_list_file in &arguments.from_files {
        chosen_ids.extend(super::read_id_list_file(id_list_file)?);
    }

    let chosen_migrations = repository
        .by_ids(chosen_ids.iter())
        .into_diagnostic()
        .wrap_err("failed to resolve chosen migrations")?;

    let chosen_set: HashSet<&CompositeId> = chosen_migrations
        .iter()
        .map(|migration| migration.id())
        .collect();

    let plan = repository
        .dependencies_of(&chosen_migrations)
        .into_diagnostic()
        .wrap_err("failed to order migrations")?;


    target.begin_transaction().await.into_diagnostic()?;

    match apply_plan(&mut target, &plan, &chosen_set, &arguments).await {
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


async fn apply_plan(
    target: &mut Target,
    plan: &[&Migration],
    chosen_set: &HashSet<&CompositeId>,
    arguments: &UpCommandArguments,
) -> Result<()> {
    let deploy = target
        .with_applications(plan)
        .await
        .into_diagnostic()
        .wrap_err("failed to load current applications")?;

    let total = deploy.len();
    let counter_width = total.to_string().len();

    for (index, (migration, application)) in deploy.iter().enumerate() {
        println!(
            "[ {:>width$} / {} ] Run migration {}",
            index + 1,
            total,
            migration.id(),
            width = counter_width
        );

        // Explicit status: chosen now, or recorded as explicit before.
        let mut is_explicit = chosen_set.contains(migration.id());
        if let Some(application) = application {
            is_explicit |= !application.is_dependency;
        }
        if arguments.as_dependency && chosen_set.contains(migration.id()) {
            is_explicit = false;
        }

        let is_dependency = !is_explicit;

        match application {
            None => {
                target
                    .up(migration, is_dependency)
                    .await
                    .into_diagnostic()
                    .wrap_err_with(|| miette!("failed to apply migration {}", migration.id()))?;
            }
            Some(application) => {
                if application.matches(migration).into_diagnostic()? {
                    println!("Migration {} already applied. [ skipped ]", migration.id());

                    // Heals a recorded raw hash after a cosmetic reformat and
                    // reconciles the explicit/dependency status.
                    target
                        .fix_hashes_and_status(migration, is_dependency)
                        .await
                        .into_diagnostic()?;
                } else if migration.idempotent() {
                    let reapply = confirm(&format!(
                        "Migration {} has been applied with a different script, \
                        but is marked as idempotent. Try to reapply?",
                        migration.id()
                    ))?;

                    if !reapply {
                        return Err(StateError::ReapplyDeclined {
                            id: migration.id().clone(),
                        })
                        .into_diagnostic();
                    }

                    target
                        .up(migration, is_dependency)
                        .await
                        .into_diagnostic()
                        .wrap_err_with(|| {
                            miette!("failed to re-apply migration {}", migration.id())
                        })?;
                } else {
                    return Err(StateError::AppliedWithDifferentScript {
                        id: migration.id().clone(),
                    })
                    .into_diagnostic();
                }
            }
        }

        if let Some(save_path) = &arguments.save {
            if !is_dependency {
                // TODO Skip ids that are already listed in the file.
                let mut save_file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(save_path)
                    .into_diagnostic()
                    .wrap_err_with(|| {
                        miette!("failed to open save file \"{}\"", save_path.display())
                    })?;

                writeln!(save_file, "{}", migration.id())
                    .into_diagnostic()
                    .wrap_err("failed to append to save file")?;
            }
        }
    }

    Ok(())
}
