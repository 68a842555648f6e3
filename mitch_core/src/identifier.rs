use std::fmt::Display;

use thiserror::Error;


/// Failed to parse a [`CompositeId`] from a string.
#[derive(Error, Debug)]
#[error("invalid composite migration identifier \"{}\"", .raw)]
pub struct InvalidCompositeIdError {
    pub raw: String,
}


/// A two-part migration identity: the owning repository's name
/// and the migration's id within that repository.
///
/// The canonical string form is `"{repository_id}::{migration_id}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompositeId {
    pub repository_id: String,
    pub migration_id: String,
}

impl CompositeId {
    pub fn new<R, M>(repository_id: R, migration_id: M) -> Self
    where
        R: Into<String>,
        M: Into<String>,
    {
        Self {
            repository_id: repository_id.into(),
            migration_id: migration_id.into(),
        }
    }

    /// Parses an identifier from its canonical `"repository::migration"` form,
    /// or from a bare migration id when a default repository is supplied.
    ///
    /// Splitting happens on the first `"::"`; empty parts are rejected.
    pub fn parse(
        raw: &str,
        default_repository: Option<&str>,
    ) -> Result<Self, InvalidCompositeIdError> {
        match raw.split_once("::") {
            Some((repository_id, migration_id)) => {
                if repository_id.is_empty() || migration_id.is_empty() {
                    return Err(InvalidCompositeIdError {
                        raw: raw.to_string(),
                    });
                }

                Ok(Self::new(repository_id, migration_id))
            }
            None => match default_repository {
                Some(repository_id) if !raw.is_empty() && !repository_id.is_empty() => {
                    Ok(Self::new(repository_id, raw))
                }
                _ => Err(InvalidCompositeIdError {
                    raw: raw.to_string(),
                }),
            },
        }
    }
}

impl Display for CompositeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.repository_id, self.migration_id)
    }
}
