use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DATA_DIR_ENV: &str = "REINDEXER_DATA_DIR";
pub const USER_ENV: &str = "REINDEXER_USER";

/// The acting user: `--user`, else `$REINDEXER_USER`.
///
/// A blank name counts as unset, so the caller is anonymous.
pub fn resolve_user(explicit: Option<String>) -> Option<String> {
    pick_user(explicit, std::env::var(USER_ENV).ok())
}

fn pick_user(explicit: Option<String>, env: Option<String>) -> Option<String> {
    let named = |name: &String| !name.trim().is_empty();
    explicit.filter(named).or_else(|| env.filter(named))
}

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The [`DATA_DIR_ENV`] environment variable
    /// 3. The XDG data directory (~/.local/share/reindexer/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(DATA_DIR_ENV) {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("reindexer")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repository_db(&self) -> PathBuf {
        self.root.join("repository.redb")
    }

    pub fn fulltext_dir(&self) -> Result<PathBuf> {
        let path = self.root.join("fulltext");
        std::fs::create_dir_all(&path)
            .map_err(|_| Error::DataDir(path.clone()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_with_explicit_path() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();

        assert_eq!(dir.root(), tmp.path());
        assert_eq!(dir.repository_db(), tmp.path().join("repository.redb"));
    }

    #[test]
    fn explicit_user_wins_over_environment() {
        assert_eq!(
            pick_user(Some("admin".into()), Some("jdoe".into())).as_deref(),
            Some("admin")
        );
        assert_eq!(pick_user(None, Some("jdoe".into())).as_deref(), Some("jdoe"));
    }

    #[test]
    fn blank_user_names_are_unset() {
        assert_eq!(
            pick_user(Some("  ".into()), Some("jdoe".into())).as_deref(),
            Some("jdoe")
        );
        assert_eq!(pick_user(Some(String::new()), Some(" ".into())), None);
        assert_eq!(pick_user(None, None), None);
    }

    #[test]
    fn fulltext_dir_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(&tmp.path().join("nested"))).unwrap();
        let fulltext = dir.fulltext_dir().unwrap();

        assert!(fulltext.exists());
        assert_eq!(fulltext, tmp.path().join("nested").join("fulltext"));
    }
}
