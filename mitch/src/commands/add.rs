use std::{
    env,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{SecondsFormat, Utc};
use miette::{miette, Context, IntoDiagnostic, Result};
use mitch_core::{
    migration::{DOWN_SCRIPT_FILE_NAME, MIGRATION_DESCRIPTOR_FILE_NAME, UP_SCRIPT_FILE_NAME},
    repository::REPOSITORY_MANIFEST_FILE_NAME,
};
use path_slash::PathExt as _;

use crate::cli::{AddMigrationCommandArguments, AddRepositoryCommandArguments};


fn write_str_to_new_file(file_path: &Path, contents: &str) -> Result<()> {
    let file = File::create_new(file_path)
        .into_diagnostic()
        .wrap_err_with(|| miette!("failed to create new file \"{}\"", file_path.display()))?;

    let mut buffered_file = BufWriter::new(file);

    buffered_file
        .write_all(contents.as_bytes())
        .into_diagnostic()
        .wrap_err("failed to write contents to file")?;

    let mut file = buffered_file
        .into_inner()
        .into_diagnostic()
        .wrap_err("failed to flush buffered file writer")?;

    file.flush()
        .into_diagnostic()
        .wrap_err("failed to flush to file")?;

    Ok(())
}


fn absolute_path_for(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    let working_directory = env::current_dir()
        .into_diagnostic()
        .wrap_err("failed to determine working directory")?;

    Ok(working_directory.join(path))
}


pub fn cli_add_migration(arguments: AddMigrationCommandArguments) -> Result<()> {
    let migration_directory = absolute_path_for(&arguments.path)?;

    if migration_directory.exists() {
        return Err(miette!(
            "Cannot create migration, because \"{}\" already exists.",
            migration_directory.display()
        ));
    }

    let repository = super::discover_repository()?;


    let migration_id = match arguments.id {
        Some(id) => id,
        None => migration_directory
            .strip_prefix(repository.root_directory())
            .map_err(|_| {
                miette!(
                    "Migration path \"{}\" does not lie inside repository \"{}\".",
                    migration_directory.display(),
                    repository.name()
                )
            })?
            .to_slash_lossy()
            .into_owned(),
    };


    // Declared dependencies must already exist somewhere in the closure;
    // they are written in their canonical composite form.
    let mut dependency_ids = Vec::with_capacity(arguments.dependencies.len());
    for dependency in &arguments.dependencies {
        let dependency_migration = repository
            .by_id(dependency)
            .map_err(|_| miette!("Migration {} does not exist.", dependency))?;

        dependency_ids.push(dependency_migration.id().to_string());
    }


    fs::create_dir_all(&migration_directory)
        .into_diagnostic()
        .wrap_err("failed to create migration directory")?;

    write_str_to_new_file(
        &migration_directory.join(UP_SCRIPT_FILE_NAME),
        &format!("-- deploy {}\n", migration_id),
    )?;
    write_str_to_new_file(
        &migration_directory.join(DOWN_SCRIPT_FILE_NAME),
        &format!("-- revert {}\n", migration_id),
    )?;


    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    let mut descriptor_contents = String::new();
    descriptor_contents.push_str(&format!("id = {:?}\n", migration_id));
    descriptor_contents.push_str("author = \"\"\n");
    descriptor_contents.push_str(&format!("created_at = {:?}\n", created_at));
    descriptor_contents.push_str(&format!(
        "transactional = {}\n",
        !arguments.non_transactional
    ));
    descriptor_contents.push_str(&format!("idempotent = {}\n", arguments.idempotent));

    if dependency_ids.is_empty() {
        descriptor_contents.push_str("dependencies = []\n");
    } else {
        descriptor_contents.push_str("dependencies = [\n");
        for dependency_id in &dependency_ids {
            descriptor_contents.push_str(&format!("    {:?},\n", dependency_id));
        }
        descriptor_contents.push_str("]\n");
    }

    write_str_to_new_file(
        &migration_directory.join(MIGRATION_DESCRIPTOR_FILE_NAME),
        &descriptor_contents,
    )?;


    println!("Created migration {}", migration_id);

    Ok(())
}


pub fn cli_add_repository(arguments: AddRepositoryCommandArguments) -> Result<()> {
    let repository_directory = absolute_path_for(&arguments.path)?;

    if repository_directory.exists() {
        return Err(miette!(
            "Cannot create repository, because \"{}\" already exists.",
            repository_directory.display()
        ));
    }


    let name = match arguments.name {
        Some(name) => name,
        None => {
            // Relative to the enclosing repository when there is one,
            // to the working directory otherwise.
            let base_directory = match super::discover_repository() {
                Ok(repository) => repository.root_directory().to_path_buf(),
                Err(_) => env::current_dir()
                    .into_diagnostic()
                    .wrap_err("failed to determine working directory")?,
            };

            repository_directory
                .strip_prefix(&base_directory)
                .unwrap_or(repository_directory.as_path())
                .to_slash_lossy()
                .into_owned()
        }
    };


    fs::create_dir_all(&repository_directory)
        .into_diagnostic()
        .wrap_err("failed to create repository directory")?;

    let mut manifest_contents = String::from("[repository]\n");
    manifest_contents.push_str(&format!("name = {:?}\n", name));
    manifest_contents.push_str("maintainer = \"\"\n");

    write_str_to_new_file(
        &repository_directory.join(REPOSITORY_MANIFEST_FILE_NAME),
        &manifest_contents,
    )?;


    println!("Created repository {}", name);

    Ok(())
}
