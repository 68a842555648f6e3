use std::{
    env, fs,
    io::{self, Write},
    path::Path,
};

use miette::{Context, IntoDiagnostic, Result};
use mitch_core::repository::Repository;

pub mod add;
pub mod down;
pub mod ls;
pub mod prune;
pub mod rerun_modified;
pub mod up;


/// Finds the repository governing the current working directory.
pub(crate) fn discover_repository() -> Result<Repository> {
    let working_directory = env::current_dir()
        .into_diagnostic()
        .wrap_err("failed to determine working directory")?;

    Repository::discover_from(&working_directory)
        .into_diagnostic()
        .wrap_err("failed to discover migration repository")
}


/// Asks the operator a yes/no question on the terminal. Anything other
/// than an answer of "y" (case-insensitive) counts as a no.
pub(crate) fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout()
        .flush()
        .into_diagnostic()
        .wrap_err("failed to flush terminal output")?;

    let mut user_response = String::new();
    io::stdin()
        .read_line(&mut user_response)
        .into_diagnostic()
        .wrap_err("failed to read user terminal input")?;

    Ok(user_response.trim_end().eq_ignore_ascii_case("y"))
}


/// Reads a migration id list file: one id per line, blank lines skipped.
pub(crate) fn read_id_list_file(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read id list file \"{}\"", path.display()))?;

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToOwned::to_owned)
        .collect())
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn id_list_files_skip_blank_lines() {
        let temporary_directory = tempfile::tempdir().unwrap();
        let list_path = temporary_directory.path().join("plan.txt");

        fs::write(&list_path, "main::a\n\n   \n  sub::b  \n").unwrap();

        let ids = read_id_list_file(&list_path).unwrap();

        assert_eq!(ids, vec!["main::a".to_string(), "sub::b".to_string()]);
    }
}
