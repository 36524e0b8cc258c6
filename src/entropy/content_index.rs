use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use log::{debug, trace};
use sqlite::{Connection, State};

use osutils::files;

use super::ContentType;

/// Scratch SQLite index of the paths that must not be copied from the live
/// image into the target: the content of the packages being removed.
pub struct ContentIndex {
    path: PathBuf,
    db: Connection,
    in_transaction: bool,
}

impl ContentIndex {
    /// Create an empty index at `path`, replacing any leftover from an
    /// earlier run, and open a transaction for bulk inserts.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        files::remove_file_if_exists(path)?;
        if let Some(parent) = path.parent() {
            files::create_dirs(parent)?;
        }

        debug!("Creating content index at '{}'", path.display());
        let db = sqlite::open(path)
            .context(format!("Failed to create content index '{}'", path.display()))?;
        db.execute(
            "CREATE TABLE content (
                file VARCHAR NOT NULL,
                type VARCHAR NOT NULL
            );
            BEGIN TRANSACTION;",
        )
        .context("Failed to initialize content index")?;

        Ok(Self {
            path: path.to_owned(),
            db,
            in_transaction: true,
        })
    }

    /// Open an index built earlier.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.is_file() {
            anyhow::bail!("Content index '{}' does not exist", path.display());
        }
        let db = sqlite::open(path)
            .context(format!("Failed to open content index '{}'", path.display()))?;
        Ok(Self {
            path: path.to_owned(),
            db,
            in_transaction: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add(&self, file: &str, kind: ContentType) -> Result<(), Error> {
        trace!("Excluding '{file}' ({kind})");
        let mut statement = self
            .db
            .prepare("INSERT INTO content VALUES (?, ?)")
            .context("Failed to prepare content insert")?;
        statement.bind((1, file))?;
        statement.bind((2, kind.as_str()))?;
        statement.next()?;
        Ok(())
    }

    /// Commit pending inserts.
    pub fn commit(&mut self) -> Result<(), Error> {
        if self.in_transaction {
            self.db
                .execute("COMMIT")
                .context("Failed to commit content index")?;
            self.in_transaction = false;
        }
        Ok(())
    }

    pub fn create_indexes(&self) -> Result<(), Error> {
        self.db
            .execute(
                "CREATE INDEX IF NOT EXISTS contentindex_file ON content (file);
                CREATE INDEX IF NOT EXISTS contentindex_type ON content (type);",
            )
            .context("Failed to index content index")
    }

    pub fn contains(&self, file: &str) -> Result<bool, Error> {
        let mut statement = self
            .db
            .prepare("SELECT 1 FROM content WHERE file = ? LIMIT 1")
            .context("Failed to prepare content lookup")?;
        statement.bind((1, file))?;
        Ok(statement.next()? == State::Row)
    }

    pub fn len(&self) -> Result<usize, Error> {
        let mut statement = self
            .db
            .prepare("SELECT COUNT(*) FROM content")
            .context("Failed to prepare content count")?;
        statement.next()?;
        Ok(statement.read::<i64, _>(0)? as usize)
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len()? == 0)
    }

    /// Excluded directories, deepest first.
    pub fn directories(&self) -> Result<Vec<String>, Error> {
        let mut statement = self
            .db
            .prepare(
                "SELECT DISTINCT file FROM content WHERE type = ? \
                 ORDER BY length(file) DESC, file",
            )
            .context("Failed to prepare directory listing")?;
        statement.bind((1, ContentType::Dir.as_str()))?;

        let mut dirs = Vec::new();
        while let State::Row = statement.next()? {
            dirs.push(statement.read::<String, _>(0)?);
        }
        Ok(dirs)
    }

    /// Close and delete the index.
    pub fn destroy(self) -> Result<(), Error> {
        let path = self.path.clone();
        drop(self);
        debug!("Removing content index '{}'", path.display());
        files::remove_file_if_exists(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn test_index_lifecycle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("files.db");
        std::fs::write(&path, "stale").unwrap();

        let mut index = ContentIndex::create(&path).unwrap();
        index.add("/usr/lib/anaconda", ContentType::Dir).unwrap();
        index.add("/usr/lib/anaconda/pyanaconda", ContentType::Dir).unwrap();
        index.add("/usr/bin/anaconda", ContentType::Obj).unwrap();
        index.commit().unwrap();
        index.commit().unwrap();
        index.create_indexes().unwrap();

        assert_eq!(index.len().unwrap(), 3);
        assert!(index.contains("/usr/bin/anaconda").unwrap());
        assert!(!index.contains("/usr/bin/equo").unwrap());
        assert_eq!(
            index.directories().unwrap(),
            vec![
                "/usr/lib/anaconda/pyanaconda".to_string(),
                "/usr/lib/anaconda".to_string()
            ]
        );
        drop(index);

        let index = ContentIndex::open(&path).unwrap();
        assert!(index.contains("/usr/lib/anaconda").unwrap());
        index.destroy().unwrap();
        assert!(!path.exists());
        assert!(ContentIndex::open(&path).is_err());
    }

    #[test]
    fn test_empty_index() {
        let dir = tempdir().unwrap();
        let mut index = ContentIndex::create(dir.path().join("files.db")).unwrap();
        index.commit().unwrap();
        assert!(index.is_empty().unwrap());
        assert!(index.directories().unwrap().is_empty());
    }
}
