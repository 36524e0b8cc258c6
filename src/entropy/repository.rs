use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use log::debug;
use sqlite::{Connection, OpenFlags, State};

use osutils::{arch::SystemArchitecture, path::join_relative};
use sabayon_api::constants::{ENTROPY_CLIENT_DATABASE_DIR, ENTROPY_CLIENT_DATABASE_FILENAME};

use super::ContentType;

pub type PackageId = i64;

/// A package recorded in an installed-packages repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub id: PackageId,
    pub atom: String,
    /// `category/name`
    pub key: String,
    pub slot: String,
}

/// Read access to an Entropy client database (`equo.db`): the record of the
/// packages installed in a system root.
pub struct InstalledRepository {
    path: PathBuf,
    db: Connection,
}

impl InstalledRepository {
    /// Location of the client database inside `root` for the running
    /// architecture.
    pub fn path_in(root: impl AsRef<Path>) -> PathBuf {
        join_relative(root, ENTROPY_CLIENT_DATABASE_DIR)
            .join(SystemArchitecture::current().entropy_name())
            .join(ENTROPY_CLIENT_DATABASE_FILENAME)
    }

    /// Open the client database of the system at `root`.
    pub fn open_in(root: impl AsRef<Path>) -> Result<Self, Error> {
        Self::open(Self::path_in(root))
    }

    /// Open a client database read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.is_file() {
            anyhow::bail!("Entropy repository '{}' does not exist", path.display());
        }
        debug!("Opening Entropy repository '{}'", path.display());
        let db = Connection::open_with_flags(path, OpenFlags::new().with_read_only())
            .context(format!("Failed to open Entropy repository '{}'", path.display()))?;
        Ok(Self {
            path: path.to_owned(),
            db,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ids of the packages matching `dependency`, either a `category/name`
    /// key or a bare package name.
    pub fn match_package(&self, dependency: &str) -> Result<Vec<PackageId>, Error> {
        let mut statement = match dependency.split_once('/') {
            Some((category, name)) => {
                let mut statement = self
                    .db
                    .prepare(
                        "SELECT idpackage FROM baseinfo WHERE category = ? AND name = ? \
                         ORDER BY idpackage",
                    )
                    .context("Failed to prepare package match")?;
                statement.bind((1, category))?;
                statement.bind((2, name))?;
                statement
            }
            None => {
                let mut statement = self
                    .db
                    .prepare("SELECT idpackage FROM baseinfo WHERE name = ? ORDER BY idpackage")
                    .context("Failed to prepare package match")?;
                statement.bind((1, dependency))?;
                statement
            }
        };

        let mut ids = Vec::new();
        while let State::Row = statement.next()? {
            ids.push(statement.read::<i64, _>(0)?);
        }
        Ok(ids)
    }

    /// Packages of the `category/prefix-*` family, e.g. every
    /// `kde-base/kde-l10n-*`. Returns the package ids paired with the suffix
    /// after `prefix-`.
    pub fn match_family(&self, family: &str) -> Result<Vec<(PackageId, String)>, Error> {
        let (category, prefix) = family
            .split_once('/')
            .context(format!("Package family '{family}' has no category"))?;

        let mut statement = self
            .db
            .prepare(
                "SELECT idpackage, name FROM baseinfo WHERE category = ? AND name LIKE ? \
                 ORDER BY idpackage",
            )
            .context("Failed to prepare package family match")?;
        statement.bind((1, category))?;
        statement.bind((2, format!("{prefix}-%").as_str()))?;

        let mut matches = Vec::new();
        while let State::Row = statement.next()? {
            let id = statement.read::<i64, _>(0)?;
            let name = statement.read::<String, _>(1)?;
            if let Some(suffix) = name.strip_prefix(prefix).and_then(|s| s.strip_prefix('-')) {
                matches.push((id, suffix.to_string()));
            }
        }
        Ok(matches)
    }

    pub fn atom(&self, id: PackageId) -> Result<Option<String>, Error> {
        let mut statement = self
            .db
            .prepare("SELECT atom FROM baseinfo WHERE idpackage = ?")
            .context("Failed to prepare atom lookup")?;
        statement.bind((1, id))?;
        match statement.next()? {
            State::Row => Ok(Some(statement.read::<String, _>(0)?)),
            State::Done => Ok(None),
        }
    }

    /// Files, directories and links owned by a package.
    pub fn content(&self, id: PackageId) -> Result<Vec<(String, ContentType)>, Error> {
        let mut statement = self
            .db
            .prepare("SELECT file, type FROM content WHERE idpackage = ? ORDER BY file")
            .context("Failed to prepare content lookup")?;
        statement.bind((1, id))?;

        let mut content = Vec::new();
        while let State::Row = statement.next()? {
            let file = statement.read::<String, _>(0)?;
            let kind = statement.read::<String, _>(1)?;
            content.push((file, ContentType::from(kind.as_str())));
        }
        Ok(content)
    }

    /// Whether any installed package owns `path`.
    pub fn is_file_available(&self, path: &str) -> Result<bool, Error> {
        let mut statement = self
            .db
            .prepare("SELECT 1 FROM content WHERE file = ? LIMIT 1")
            .context("Failed to prepare content lookup")?;
        statement.bind((1, path))?;
        Ok(statement.next()? == State::Row)
    }

    /// All installed packages, ordered by atom.
    pub fn list_packages(&self) -> Result<Vec<InstalledPackage>, Error> {
        let mut statement = self
            .db
            .prepare(
                "SELECT idpackage, atom, category, name, slot FROM baseinfo ORDER BY atom",
            )
            .context("Failed to prepare package listing")?;

        let mut packages = Vec::new();
        while let State::Row = statement.next()? {
            packages.push(InstalledPackage {
                id: statement.read::<i64, _>(0)?,
                atom: statement.read::<String, _>(1)?,
                key: format!(
                    "{}/{}",
                    statement.read::<String, _>(2)?,
                    statement.read::<String, _>(3)?
                ),
                slot: statement.read::<String, _>(4)?,
            });
        }
        Ok(packages)
    }

    /// System packages are part of the base system and must never be
    /// removed.
    pub fn is_system_package(&self, id: PackageId) -> Result<bool, Error> {
        let mut statement = self
            .db
            .prepare("SELECT 1 FROM systempackages WHERE idpackage = ? LIMIT 1")
            .context("Failed to prepare system package lookup")?;
        statement.bind((1, id))?;
        Ok(statement.next()? == State::Row)
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;

    /// A package to seed a test repository with.
    pub(crate) struct TestPackage<'a> {
        pub id: PackageId,
        pub category: &'a str,
        pub name: &'a str,
        pub version: &'a str,
        pub slot: &'a str,
        pub system: bool,
        pub content: &'a [(&'a str, &'a str)],
    }

    impl<'a> TestPackage<'a> {
        pub(crate) fn new(id: PackageId, category: &'a str, name: &'a str) -> Self {
            Self {
                id,
                category,
                name,
                version: "1.0",
                slot: "0",
                system: false,
                content: &[],
            }
        }

        pub(crate) fn with_content(self, content: &'a [(&'a str, &'a str)]) -> Self {
            Self { content, ..self }
        }

        pub(crate) fn system(self) -> Self {
            Self {
                system: true,
                ..self
            }
        }
    }

    /// Creates an Entropy client database at `path` with the given packages.
    pub(crate) fn create_repository(path: &Path, packages: &[TestPackage]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let db = sqlite::open(path).unwrap();
        db.execute(
            "CREATE TABLE baseinfo (
                idpackage INTEGER PRIMARY KEY,
                atom VARCHAR,
                category VARCHAR,
                name VARCHAR,
                version VARCHAR,
                slot VARCHAR
            );
            CREATE TABLE content (idpackage INTEGER, file VARCHAR, type VARCHAR);
            CREATE TABLE systempackages (idpackage INTEGER PRIMARY KEY);",
        )
        .unwrap();

        for package in packages {
            let mut statement = db
                .prepare("INSERT INTO baseinfo VALUES (?, ?, ?, ?, ?, ?)")
                .unwrap();
            let atom = format!("{}/{}-{}", package.category, package.name, package.version);
            statement.bind((1, package.id)).unwrap();
            statement.bind((2, atom.as_str())).unwrap();
            statement.bind((3, package.category)).unwrap();
            statement.bind((4, package.name)).unwrap();
            statement.bind((5, package.version)).unwrap();
            statement.bind((6, package.slot)).unwrap();
            statement.next().unwrap();

            for (file, kind) in package.content {
                let mut statement = db.prepare("INSERT INTO content VALUES (?, ?, ?)").unwrap();
                statement.bind((1, package.id)).unwrap();
                statement.bind((2, *file)).unwrap();
                statement.bind((3, *kind)).unwrap();
                statement.next().unwrap();
            }

            if package.system {
                let mut statement = db
                    .prepare("INSERT INTO systempackages VALUES (?)")
                    .unwrap();
                statement.bind((1, package.id)).unwrap();
                statement.next().unwrap();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{test_utils::*, *};

    use tempfile::tempdir;

    fn sample_repository(root: &Path) -> InstalledRepository {
        let path = InstalledRepository::path_in(root);
        create_repository(
            &path,
            &[
                TestPackage::new(1, "sys-apps", "baselayout")
                    .system()
                    .with_content(&[("/etc", "dir"), ("/etc/hosts", "obj")]),
                TestPackage::new(2, "app-admin", "anaconda")
                    .with_content(&[("/usr/lib64/anaconda", "dir"), ("/usr/bin/anaconda", "obj")]),
                TestPackage::new(3, "kde-base", "kde-l10n-it"),
                TestPackage::new(4, "kde-base", "kde-l10n-de"),
                TestPackage::new(5, "kde-base", "kde-l10n-meta"),
                TestPackage::new(6, "kde-base", "kdelibs"),
            ],
        );
        InstalledRepository::open(path).unwrap()
    }

    #[test]
    fn test_open_missing() {
        let dir = tempdir().unwrap();
        assert!(InstalledRepository::open_in(dir.path()).is_err());
    }

    #[test]
    fn test_match_package() {
        let dir = tempdir().unwrap();
        let repo = sample_repository(dir.path());

        assert_eq!(repo.match_package("app-admin/anaconda").unwrap(), vec![2]);
        assert_eq!(repo.match_package("anaconda").unwrap(), vec![2]);
        assert!(repo.match_package("dev-util/anaconda").unwrap().is_empty());
        assert!(repo.match_package("libselinux").unwrap().is_empty());
        assert_eq!(repo.atom(2).unwrap(), Some("app-admin/anaconda-1.0".into()));
        assert_eq!(repo.atom(42).unwrap(), None);
    }

    #[test]
    fn test_match_family() {
        let dir = tempdir().unwrap();
        let repo = sample_repository(dir.path());

        assert_eq!(
            repo.match_family("kde-base/kde-l10n").unwrap(),
            vec![(3, "it".into()), (4, "de".into()), (5, "meta".into())]
        );
        assert!(repo.match_family("app-dicts/myspell").unwrap().is_empty());
        assert!(repo.match_family("no-category").is_err());
    }

    #[test]
    fn test_content() {
        let dir = tempdir().unwrap();
        let repo = sample_repository(dir.path());

        assert_eq!(
            repo.content(2).unwrap(),
            vec![
                ("/usr/bin/anaconda".to_string(), ContentType::Obj),
                ("/usr/lib64/anaconda".to_string(), ContentType::Dir),
            ]
        );
        assert!(repo.is_file_available("/etc/hosts").unwrap());
        assert!(!repo.is_file_available("/etc/passwd").unwrap());
    }

    #[test]
    fn test_list_packages_and_system() {
        let dir = tempdir().unwrap();
        let repo = sample_repository(dir.path());

        let packages = repo.list_packages().unwrap();
        let atoms: Vec<_> = packages.iter().map(|p| p.atom.as_str()).collect();
        assert_eq!(
            atoms,
            vec![
                "app-admin/anaconda-1.0",
                "kde-base/kde-l10n-de-1.0",
                "kde-base/kde-l10n-it-1.0",
                "kde-base/kde-l10n-meta-1.0",
                "kde-base/kdelibs-1.0",
                "sys-apps/baselayout-1.0",
            ]
        );
        assert_eq!(packages[0].key, "app-admin/anaconda");
        assert_eq!(packages[0].slot, "0");

        assert!(repo.is_system_package(1).unwrap());
        assert!(!repo.is_system_package(2).unwrap());
    }
}
