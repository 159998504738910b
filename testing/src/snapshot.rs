//! Dump, restore and SQL loading through the client tools inside the
//! fixture process.
//!
//! Files travel through the scratch directory mounted at
//! [`SCRATCH_MOUNT`]: inputs are copied in before a command runs and outputs
//! are copied out after it succeeds.

use crate::fixture::{PostgresFixture, SCRATCH_MOUNT};
use errors::{FixtureError, Result};
use fixture_core::Provisioner;
use std::path::{Path, PathBuf};

impl<P: Provisioner> PostgresFixture<P> {
    /// Prefixes `args` so client tools default to the fixture's user and
    /// primary database.
    fn client_command<S: AsRef<str>>(&self, args: &[S]) -> Vec<String> {
        let mut command = vec![
            "env".to_string(),
            format!("PGUSER={}", self.settings.user),
            format!("PGDATABASE={}", self.settings.database),
        ];
        command.extend(args.iter().map(|a| a.as_ref().to_string()));
        command
    }

    /// Runs a client tool such as `psql` or `pg_isready` inside the process
    /// and returns its exit status.
    ///
    /// A non-zero status is an error unless `quiet` is set.
    pub async fn psql<S: AsRef<str>>(&self, command: &[S], quiet: bool) -> Result<i64> {
        let program = command
            .first()
            .map(|p| p.as_ref().to_string())
            .ok_or_else(|| FixtureError::configuration("empty client command"))?;
        let output = self.exec(self.client_command(command)).await?;
        if !output.success() && !quiet {
            return Err(FixtureError::ExternalCommand {
                program,
                exit_code: output.exit_code,
                output: output.diagnostics()
            });
        }
        Ok(output.exit_code)
    }

    /// `psql -c ;` against the primary database.
    pub async fn ping_psql(&self) -> Result<()> {
        self.psql(&["psql", "-c", ";"], false).await.map(|_| ())
    }

    /// Writes a custom-format, uncompressed archive of the primary database
    /// to `<dir>/<file>`. `dir` is resolved against the working directory and
    /// its ancestors.
    pub async fn dump(&self, dir: impl AsRef<Path>, file: &str) -> Result<()> {
        let dir = resolve_dir(dir.as_ref())?;
        let scratch = self.scratch_dir().join(file);

        self.psql(
            &[
                "pg_dump".to_string(),
                "-Fc".to_string(),
                "-Z0".to_string(),
                format!("--file={SCRATCH_MOUNT}/{file}"),
                self.settings.database.clone(),
            ],
            false
        )
        .await?;

        let destination = dir.join(file);
        std::fs::copy(&scratch, &destination).map_err(|e| FixtureError::io(&destination, e))?;
        discard(&scratch);

        tracing::debug!(
            database = %self.settings.database,
            path = %destination.display(),
            "dumped database"
        );
        Ok(())
    }

    /// Restores `<dir>/<file>` into the primary database in a single
    /// transaction.
    pub async fn restore(&self, dir: impl AsRef<Path>, file: &str) -> Result<()> {
        let dir = resolve_dir(dir.as_ref())?;
        let source = dir.join(file);
        let scratch = self.stage(&source, file)?;

        let result = self
            .psql(
                &[
                    "pg_restore".to_string(),
                    format!("--dbname={}", self.settings.database),
                    "--verbose".to_string(),
                    "--single-transaction".to_string(),
                    format!("{SCRATCH_MOUNT}/{file}"),
                ],
                false
            )
            .await;
        discard(&scratch);
        result?;

        tracing::debug!(
            database = %self.settings.database,
            path = %source.display(),
            "restored database"
        );
        Ok(())
    }

    /// Runs a `.sql` file, or every `*.sql` file of a directory in name
    /// order, against the primary database. A missing path is ignored.
    pub async fn load_sql(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let Ok(metadata) = std::fs::metadata(path) else {
            tracing::debug!(path = %path.display(), "no sql to load");
            return Ok(());
        };

        if !metadata.is_dir() {
            return self.load_sql_file(path).await;
        }

        let pattern = path.join("*.sql");
        for file in glob_sorted(&pattern.to_string_lossy())? {
            self.load_sql_file(&file).await?;
        }
        Ok(())
    }

    /// Runs [`PostgresFixture::load_sql`] for every match of a glob pattern.
    pub async fn load_sql_pattern(&self, pattern: &str) -> Result<()> {
        for path in glob_sorted(pattern)? {
            self.load_sql(&path).await?;
        }
        Ok(())
    }

    async fn load_sql_file(&self, path: &Path) -> Result<()> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| FixtureError::configuration(format!("not a file: {}", path.display())))?;
        let scratch = self.stage(path, &name)?;

        let result = self
            .psql(
                &[
                    "psql".to_string(),
                    "-v".to_string(),
                    "ON_ERROR_STOP=1".to_string(),
                    format!("--file={SCRATCH_MOUNT}/{name}"),
                ],
                false
            )
            .await;
        discard(&scratch);
        result?;

        tracing::debug!(database = %self.settings.database, name = %name, "loaded sql");
        Ok(())
    }

    /// Copies `source` into the scratch directory as `name`.
    fn stage(&self, source: &Path, name: &str) -> Result<PathBuf> {
        let scratch = self.scratch_dir().join(name);
        std::fs::copy(source, &scratch).map_err(|e| FixtureError::io(source, e))?;
        Ok(scratch)
    }
}

fn resolve_dir(dir: &Path) -> Result<PathBuf> {
    utils::find_path(dir).ok_or_else(|| {
        FixtureError::configuration(format!("could not resolve path: {}", dir.display()))
    })
}

fn glob_sorted(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob::glob(pattern)
        .map_err(|e| FixtureError::configuration(format!("invalid pattern {pattern}: {e}")))?;
    let mut files = paths
        .map(|entry| entry.map_err(|e| FixtureError::io(e.path().to_path_buf(), e.into_error())))
        .collect::<Result<Vec<_>>>()?;
    files.sort();
    Ok(files)
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::debug!(path = %path.display(), error = %e, "failed to remove scratch file");
    }
}
