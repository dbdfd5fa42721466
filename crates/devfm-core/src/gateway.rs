//! The filesystem operation gateway: one method per verb, each trying the
//! native primitive first and falling back to an allow-listed elevated
//! command through the [`CapabilityResolver`].

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use devfm_platform::command::{ListingFormat, PrivilegedCommand};
use devfm_platform::executor::{CommandResult, CommandRunner};
use devfm_platform::filesystem::FileSystem;

use crate::classifier::{format_permissions, parse_mode, parse_permissions_to_mode};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::lister::{parse_long_listing, parse_null_listing, DirectoryLister, FileEntry};
use crate::outcome::{FileContent, FileDetails, Outcome};
use crate::paths::{basename, display, file_name, PathPolicy};
use crate::resolver::{CapabilityResolver, ElevationPlan, Operation, Plan, DIR_MODE, FILE_MODE};
use crate::upload::StagedUpload;
use crate::walk::{walk, CopyTree, RemoveTree};

/// How an operation was carried out.
enum Done<T> {
    Native(T),
    Elevated(CommandResult),
}

impl<T> Done<T> {
    fn is_elevated(&self) -> bool {
        matches!(self, Done::Elevated(_))
    }
}

/// Caller messages for one two-phase attempt.
struct Attempt<'a> {
    op: Operation<'a>,
    /// The request allows elevation (only `save` can say no)
    may_elevate: bool,
    /// Permission failure with no elevation path
    denied: String,
    /// Any other native failure
    failed: &'static str,
    /// Elevated command exited nonzero
    elevated_failed: &'static str,
}

pub struct Gateway {
    config: Arc<GatewayConfig>,
    fs: Arc<dyn FileSystem>,
    runner: Arc<dyn CommandRunner>,
    paths: PathPolicy,
    resolver: CapabilityResolver,
    lister: DirectoryLister,
}

impl Gateway {
    pub fn new(config: Arc<GatewayConfig>, fs: Arc<dyn FileSystem>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            paths: PathPolicy::new(&config),
            resolver: CapabilityResolver::new(config.clone(), fs.clone()),
            lister: DirectoryLister::new(fs.clone()),
            config,
            fs,
            runner,
        }
    }

    /// Gateway over the real filesystem, elevating through the configured
    /// helper.
    #[cfg(unix)]
    pub fn unix(config: GatewayConfig) -> Self {
        let runner = devfm_linux::executor::SudoRunner::new(
            config.elevation_helper.clone(),
            config.command_timeout(),
        );
        Self::new(
            Arc::new(config),
            Arc::new(devfm_linux::filesystem::UnixFileSystem::new()),
            Arc::new(runner),
        )
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub(crate) fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub(crate) fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub(crate) fn paths(&self) -> &PathPolicy {
        &self.paths
    }

    pub(crate) fn resolver(&self) -> &CapabilityResolver {
        &self.resolver
    }

    /// Run an elevation plan: the primary command, then every
    /// normalization step. Any nonzero exit fails the operation.
    pub(crate) async fn run_elevated(&self, plan: &ElevationPlan, context: &str) -> Result<CommandResult, GatewayError> {
        let result = self.run_checked(&plan.primary, context).await?;
        for step in &plan.normalize {
            self.run_checked(step, "Errore nel ripristino di permessi e proprietario")
                .await?;
        }
        Ok(result)
    }

    async fn run_checked(
        &self,
        command: &PrivilegedCommand,
        context: &str,
    ) -> Result<CommandResult, GatewayError> {
        let result = self.runner.run(command, true).await.map_err(|e| {
            error!("{}: {}", context, e);
            GatewayError::exec(context, e)
        })?;
        if !result.success() {
            error!("{} exited with {}: {}", command, result.status, result.output);
            return Err(GatewayError::SubprocessFailed {
                context: context.to_string(),
                output: result.output,
                status: result.status,
            });
        }
        Ok(result)
    }

    /// Filesystem work that may walk a whole tree, run off the async
    /// workers.
    async fn blocking<T, F>(&self, work: F) -> io::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn FileSystem) -> io::Result<T> + Send + 'static,
    {
        let fs = self.fs.clone();
        tokio::task::spawn_blocking(move || work(fs.as_ref()))
            .await
            .map_err(io::Error::other)?
    }

    /// The two-phase policy: elevate up front when the access check says
    /// so, otherwise run `native` and elevate if it hits a permission error.
    /// `native` is not polled at all when the pre-check elevates.
    async fn attempt<T>(
        &self,
        a: Attempt<'_>,
        native: impl Future<Output = io::Result<T>>,
    ) -> Result<Done<T>, GatewayError> {
        if let Plan::Elevate(plan) = self.resolver.plan(&a.op) {
            if !a.may_elevate {
                return Err(GatewayError::denied(a.denied));
            }
            info!("elevating {}", a.op);
            let result = self.run_elevated(&plan, a.elevated_failed).await?;
            return Ok(Done::Elevated(result));
        }

        match native.await {
            Ok(v) => Ok(Done::Native(v)),
            Err(e) => {
                if a.may_elevate {
                    if let Some(plan) = self.resolver.fallback(&a.op, &e) {
                        info!("elevating {} after native failure", a.op);
                        let result = self.run_elevated(&plan, a.elevated_failed).await?;
                        return Ok(Done::Elevated(result));
                    }
                }
                warn!("{} failed: {}", a.op, e);
                if e.kind() == io::ErrorKind::PermissionDenied {
                    Err(GatewayError::denied(a.denied))
                } else {
                    Err(GatewayError::io(a.failed, e))
                }
            }
        }
    }

    /// Best-effort mode and owner reset after a native create.
    fn normalize_native(&self, path: &Path, mode: u32) {
        if let Err(e) = self.fs.set_mode(path, mode) {
            warn!("chmod {:o} {}: {}", mode, path.display(), e);
        }
        if let Err(e) = self
            .fs
            .chown(path, &self.config.service_user, &self.config.service_group)
        {
            // only works when running as root or as the service account
            debug!("chown {}: {}", path.display(), e);
        }
    }

    fn exists(&self, path: &Path) -> bool {
        self.fs.lstat(path).is_ok()
    }

    fn require_dir(&self, dir: &Path) -> Result<(), GatewayError> {
        if self.fs.is_dir(dir) {
            Ok(())
        } else {
            Err(GatewayError::not_found(format!("Directory non trovata: {}", display(dir))))
        }
    }

    pub async fn list(&self, dir: Option<&str>) -> Result<Vec<FileEntry>, GatewayError> {
        let dir = self.paths.resolve_or_root(dir)?;
        self.require_dir(&dir)?;

        let attempt = Attempt {
            op: Operation::List { dir: &dir },
            may_elevate: true,
            denied: format!("Directory non leggibile: {}", display(&dir)),
            failed: "Errore nell'accesso alla directory",
            elevated_failed: "Directory non leggibile",
        };
        let lister = self.lister.clone();
        let target = dir.clone();
        let native = async move {
            tokio::task::spawn_blocking(move || lister.list_native(&target))
                .await
                .map_err(io::Error::other)?
        };
        match self.attempt(attempt, native).await? {
            Done::Native(entries) => Ok(entries),
            Done::Elevated(result) => Ok(match self.resolver.listing_format() {
                ListingFormat::NullDelimited => parse_null_listing(&dir, &result.raw),
                ListingFormat::LongListing => parse_long_listing(&dir, &result.output),
            }),
        }
    }

    pub async fn read(&self, file: &str) -> Result<FileContent, GatewayError> {
        let path = self.paths.resolve(file)?;
        match self.fs.stat(&path) {
            Ok(st) if st.is_dir() => return Err(GatewayError::malformed("Il percorso è una directory")),
            Ok(_) => {}
            // a parent we cannot search; the elevated read will tell
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied && self.resolver.elevation_enabled() => {}
            Err(_) => return Err(GatewayError::not_found("File non trovato")),
        }

        let attempt = Attempt {
            op: Operation::Read { path: &path },
            may_elevate: true,
            denied: "File non leggibile".to_string(),
            failed: "Errore nella lettura del file",
            elevated_failed: "File non leggibile",
        };
        let done = self.attempt(attempt, async { self.fs.read(&path) }).await?;
        let elevated = done.is_elevated();
        let bytes = match done {
            Done::Native(bytes) => bytes,
            Done::Elevated(result) => result.raw,
        };
        Ok(FileContent {
            name: file_name(&path),
            bytes,
            elevated,
        })
    }

    /// `None` when nothing exists at `path`.
    pub fn details(&self, path: &str) -> Result<Option<FileDetails>, GatewayError> {
        let path = self.paths.resolve(path)?;
        if !self.exists(&path) {
            return Ok(None);
        }
        let entry = self
            .lister
            .entry(&path)
            .map_err(|e| GatewayError::io("Errore nel recupero dei dettagli", e))?;
        Ok(Some(FileDetails {
            exists: true,
            chmod_value: parse_permissions_to_mode(&format_permissions(self.fs.as_ref(), &path)),
            entry,
        }))
    }

    pub async fn create(&self, dir: Option<&str>, name: &str) -> Result<Outcome, GatewayError> {
        let dir = self.paths.resolve_or_root(dir)?;
        let target = self.paths.child(&dir, name)?;
        if self.exists(&target) {
            return Err(GatewayError::conflict("Il file esiste già"));
        }
        self.require_dir(&dir)?;

        let attempt = Attempt {
            op: Operation::CreateFile { path: &target },
            may_elevate: true,
            denied: "Directory non scrivibile".to_string(),
            failed: "Errore nella creazione del file",
            elevated_failed: "Errore nella creazione del file",
        };
        let done = self.attempt(attempt, async { self.fs.create_new(&target) }).await?;
        if let Done::Native(()) = done {
            self.normalize_native(&target, FILE_MODE);
        }
        info!("created {}", target.display());
        Ok(Outcome::with_elevation(done.is_elevated()))
    }

    pub async fn create_dir(&self, dir: Option<&str>, name: &str) -> Result<Outcome, GatewayError> {
        let dir = self.paths.resolve_or_root(dir)?;
        let target = self.paths.child(&dir, name)?;
        if self.exists(&target) {
            return Err(GatewayError::conflict("La directory esiste già"));
        }
        self.require_dir(&dir)?;

        let attempt = Attempt {
            op: Operation::CreateDir { path: &target },
            may_elevate: true,
            denied: "Directory non scrivibile".to_string(),
            failed: "Errore nella creazione della directory",
            elevated_failed: "Errore nella creazione della directory",
        };
        let done = self.attempt(attempt, async { self.fs.create_dir(&target) }).await?;
        if let Done::Native(()) = done {
            // mkdir(2) applies the umask, so the setgid mode is set explicitly
            self.normalize_native(&target, DIR_MODE);
        }
        info!("created directory {}", target.display());
        Ok(Outcome::with_elevation(done.is_elevated()))
    }

    /// Overwrite (or, with `sudo`, create) a file. Elevation is only used
    /// when the caller asked for it.
    pub async fn save(&self, file: &str, content: &[u8], sudo: bool) -> Result<Outcome, GatewayError> {
        let path = self.paths.resolve(file)?;
        let exists = self.exists(&path);
        if !exists && !sudo {
            return Err(GatewayError::not_found("File non trovato"));
        }
        if exists && self.fs.is_dir(&path) {
            return Err(GatewayError::malformed("Il percorso è una directory"));
        }

        let attempt = Attempt {
            op: Operation::Write {
                path: &path,
                content,
                exists,
            },
            may_elevate: sudo,
            denied: "File non scrivibile".to_string(),
            failed: "Errore nel salvataggio del file",
            elevated_failed: "Errore nel salvataggio del file con sudo",
        };
        let done = self.attempt(attempt, async { self.fs.write(&path, content) }).await?;
        if !exists {
            if let Done::Native(()) = done {
                self.normalize_native(&path, FILE_MODE);
            }
        }
        info!("saved {} ({} bytes)", path.display(), content.len());
        Ok(Outcome::with_elevation(done.is_elevated()))
    }

    pub async fn delete(&self, path: &str) -> Result<Outcome, GatewayError> {
        let path = self.paths.resolve(path)?;
        let stat = self
            .fs
            .lstat(&path)
            .map_err(|_| GatewayError::not_found("Percorso non trovato"))?;
        if path.parent().is_none() {
            return Err(GatewayError::malformed("Impossibile eliminare la directory radice"));
        }
        let is_dir = stat.is_dir();

        let attempt = Attempt {
            op: Operation::Delete { path: &path, is_dir },
            may_elevate: true,
            denied: if is_dir {
                "Errore nell'eliminazione della directory".to_string()
            } else {
                "Errore nell'eliminazione del file".to_string()
            },
            failed: if is_dir {
                "Errore nell'eliminazione della directory"
            } else {
                "Errore nell'eliminazione del file"
            },
            elevated_failed: "Errore nell'eliminazione con sudo",
        };
        let target = path.clone();
        let done = self
            .attempt(attempt, self.blocking(move |fs| remove_entry(fs, &target)))
            .await?;
        info!("deleted {}", path.display());
        Ok(Outcome::with_elevation(done.is_elevated()))
    }

    pub async fn rename(&self, old_path: &str, new_name: &str) -> Result<Outcome, GatewayError> {
        let old = self.paths.resolve(old_path)?;
        if !self.exists(&old) {
            return Err(GatewayError::not_found("File o directory non trovato"));
        }
        let name = basename(new_name).ok_or_else(|| GatewayError::malformed("Nome non valido"))?;
        let new = old.parent().unwrap_or_else(|| Path::new("/")).join(name);
        if self.exists(&new) {
            return Err(GatewayError::conflict("Esiste già un file o directory con questo nome"));
        }

        let attempt = Attempt {
            op: Operation::Rename { from: &old, to: &new },
            may_elevate: true,
            denied: "Errore nella rinomina".to_string(),
            failed: "Errore nella rinomina",
            elevated_failed: "Errore nella rinomina con sudo",
        };
        let done = self.attempt(attempt, async { self.fs.rename(&old, &new) }).await?;
        info!("renamed {} -> {}", old.display(), new.display());
        Ok(Outcome {
            elevated: done.is_elevated(),
            new_path: Some(display(&new)),
            content: None,
        })
    }

    /// Shared pre-checks of copy and move: source present, destination
    /// free and not inside the source.
    fn transfer_paths(&self, source: &str, destination: &str) -> Result<(PathBuf, PathBuf), GatewayError> {
        let from = self.paths.resolve(source)?;
        let to = self.paths.resolve(destination)?;
        if !self.exists(&from) {
            return Err(GatewayError::not_found("File o directory di origine non trovata"));
        }
        if self.exists(&to) {
            return Err(GatewayError::conflict(
                "Un file o directory con lo stesso nome esiste già nella destinazione",
            ));
        }
        if to.starts_with(&from) {
            return Err(GatewayError::malformed(
                "La destinazione non può trovarsi all'interno dell'origine",
            ));
        }
        Ok((from, to))
    }

    /// Copy a file, link or whole tree. A native copy that fails halfway
    /// is removed again before the elevated `cp` runs.
    pub async fn copy(&self, source: &str, destination: &str) -> Result<Outcome, GatewayError> {
        let (from, to) = self.transfer_paths(source, destination)?;
        // a link is copied as a link, not as what it points at
        let is_dir = self.fs.lstat(&from).map(|st| st.is_dir()).unwrap_or(false);

        let failed = if is_dir {
            "Errore nella copia della directory"
        } else {
            "Errore nella copia del file"
        };
        let attempt = Attempt {
            op: Operation::Copy {
                from: &from,
                to: &to,
                is_dir,
            },
            may_elevate: true,
            denied: failed.to_string(),
            failed,
            elevated_failed: if is_dir {
                "Errore nella copia della directory con sudo"
            } else {
                "Errore nella copia del file con sudo"
            },
        };
        let (src, dst) = (from.clone(), to.clone());
        let done = self
            .attempt(attempt, self.blocking(move |fs| copy_native(fs, &src, &dst)))
            .await?;
        info!("copied {} -> {}", from.display(), to.display());
        Ok(Outcome::with_elevation(done.is_elevated()))
    }

    pub async fn move_entry(&self, source: &str, destination: &str) -> Result<Outcome, GatewayError> {
        let (from, to) = self.transfer_paths(source, destination)?;

        let attempt = Attempt {
            op: Operation::Rename { from: &from, to: &to },
            may_elevate: true,
            denied: "Errore nello spostamento".to_string(),
            failed: "Errore nello spostamento",
            elevated_failed: "Errore nello spostamento con sudo",
        };
        let (src, dst) = (from.clone(), to.clone());
        let done = self
            .attempt(attempt, self.blocking(move |fs| move_native(fs, &src, &dst)))
            .await?;
        let elevated = match done {
            Done::Native(Moved::SourceLeft(e)) => {
                self.remove_moved_source(&from, e).await?;
                true
            }
            other => other.is_elevated(),
        };
        info!("moved {} -> {}", from.display(), to.display());
        Ok(Outcome::with_elevation(elevated))
    }

    /// Finish a cross-device move whose copy is complete but whose source
    /// could not be removed natively.
    async fn remove_moved_source(&self, from: &Path, err: io::Error) -> Result<(), GatewayError> {
        if err.kind() != io::ErrorKind::PermissionDenied || !self.resolver.elevation_enabled() {
            warn!("{} was copied but not removed: {}", from.display(), err);
            return Err(GatewayError::io("Errore nella rimozione dell'origine dopo la copia", err));
        }
        let is_dir = self.fs.lstat(from).map(|st| st.is_dir()).unwrap_or(true);
        info!("removing {} elevated after cross-device copy", from.display());
        let plan = self.resolver.elevation(&Operation::Delete { path: from, is_dir });
        self.run_elevated(&plan, "Errore nello spostamento con sudo").await?;
        Ok(())
    }

    pub async fn chmod(&self, path: &str, mode: &str) -> Result<Outcome, GatewayError> {
        let mode = parse_mode(mode)?;
        let path = self.paths.resolve(path)?;
        if !self.exists(&path) {
            return Err(GatewayError::not_found("Percorso non trovato"));
        }

        let attempt = Attempt {
            op: Operation::Chmod { path: &path, mode },
            may_elevate: true,
            denied: "Errore nella modifica dei permessi".to_string(),
            failed: "Errore nella modifica dei permessi",
            elevated_failed: "Errore nella modifica dei permessi con sudo",
        };
        let done = self.attempt(attempt, async { self.fs.set_mode(&path, mode) }).await?;
        info!("chmod {:o} {}", mode, path.display());
        Ok(Outcome::with_elevation(done.is_elevated()))
    }

    /// Place a staged upload in `dir`, replacing any file of the same name.
    pub async fn upload(&self, dir: Option<&str>, staged: &StagedUpload) -> Result<Outcome, GatewayError> {
        let dir = self.paths.resolve_or_root(dir)?;
        self.require_dir(&dir)?;
        let target = self.paths.child(&dir, &staged.file_name)?;

        let attempt = Attempt {
            op: Operation::Upload {
                staged: staged.path(),
                target: &target,
            },
            may_elevate: true,
            denied: "Directory non scrivibile".to_string(),
            failed: "Errore nel caricamento del file",
            elevated_failed: "Errore nel caricamento del file con sudo",
        };
        let done = self
            .attempt(attempt, async { self.fs.copy_file(staged.path(), &target) })
            .await?;
        if let Done::Native(_) = done {
            self.normalize_native(&target, FILE_MODE);
        }
        info!("uploaded {}", target.display());
        Ok(Outcome::with_elevation(done.is_elevated()))
    }
}

/// Copy `from` to `to`, recursively for a directory. A failure removes
/// whatever was already written at `to`. When that cleanup fails too the
/// error is no longer a permission error, so nothing elevates on top of
/// the leftovers.
fn copy_native(fs: &dyn FileSystem, from: &Path, to: &Path) -> io::Result<()> {
    if fs.lstat(to).is_ok() {
        return Err(io::ErrorKind::AlreadyExists.into());
    }
    let err = match walk(fs, from, &mut CopyTree { fs, from, to }) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    match remove_entry(fs, to) {
        Ok(()) => Err(err),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(err),
        Err(cleanup) => {
            error!("partial copy left at {}: {}", to.display(), cleanup);
            Err(io::Error::other(format!("{} (partial copy left at {})", err, to.display())))
        }
    }
}

/// Remove a file, link or whole tree.
fn remove_entry(fs: &dyn FileSystem, path: &Path) -> io::Result<()> {
    if fs.lstat(path)?.is_dir() {
        walk(fs, path, &mut RemoveTree { fs })
    } else {
        fs.remove_file(path)
    }
}

/// How far a native move got.
enum Moved {
    Done,
    /// Copied across filesystems, but the source is (partly) still there
    SourceLeft(io::Error),
}

/// `rename(2)`, or copy-then-delete when source and destination live on
/// different filesystems.
fn move_native(fs: &dyn FileSystem, from: &Path, to: &Path) -> io::Result<Moved> {
    match fs.rename(from, to) {
        Ok(()) => Ok(Moved::Done),
        Err(e) if is_cross_device(&e) => {
            debug!("{} and {} are on different filesystems, copying", from.display(), to.display());
            copy_native(fs, from, to)?;
            match remove_entry(fs, from) {
                Ok(()) => Ok(Moved::Done),
                Err(e) => Ok(Moved::SourceLeft(e)),
            }
        }
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(_e: &io::Error) -> bool {
    false
}
