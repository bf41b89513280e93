//! Distribution preparation
//!
//! Resolves the packaged server archive and expands it into a reusable
//! installation directory:
//! - zip archives (unix modes preserved, escaping entries rejected)
//! - tar and tar.gz archives
//!
//! The installation is expanded once and reused until recreation is
//! requested.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use tracing::{debug, info};

use crate::config::{HarnessConfig, InstallRename};
use crate::error::{HarnessError, HarnessResult};

/// Locates the distribution archive on local disk.
pub trait ArtifactResolver: Send + Sync {
    fn resolve(&self) -> HarnessResult<PathBuf>;
}

/// An archive at a fixed path
#[derive(Debug, Clone)]
pub struct LocalArtifact {
    path: PathBuf,
}

impl LocalArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ArtifactResolver for LocalArtifact {
    fn resolve(&self) -> HarnessResult<PathBuf> {
        if self.path.is_file() {
            Ok(self.path.clone())
        } else {
            Err(HarnessError::Preparation(format!(
                "Could not obtain distribution artifact: {} is not a file",
                self.path.display()
            )))
        }
    }
}

/// An archive whose path is read from an environment variable
#[derive(Debug, Clone)]
pub struct EnvArtifact {
    var: String,
}

impl EnvArtifact {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl ArtifactResolver for EnvArtifact {
    fn resolve(&self) -> HarnessResult<PathBuf> {
        let path = std::env::var_os(&self.var).ok_or_else(|| {
            HarnessError::Preparation(format!(
                "Could not obtain distribution artifact: {} is not set",
                self.var
            ))
        })?;
        LocalArtifact::new(path).resolve()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    Zip,
    TarGz,
    Tar,
}

impl ArchiveFormat {
    const EXTENSIONS: [(&'static str, ArchiveFormat); 4] = [
        (".tar.gz", ArchiveFormat::TarGz),
        (".tgz", ArchiveFormat::TarGz),
        (".tar", ArchiveFormat::Tar),
        (".zip", ArchiveFormat::Zip),
    ];

    /// Split an archive file name into its stem and format
    fn split(file_name: &str) -> Option<(&str, ArchiveFormat)> {
        Self::EXTENSIONS.iter().find_map(|(ext, format)| {
            file_name.strip_suffix(ext).map(|stem| (stem, *format))
        })
    }
}

/// Expands and locates the server installation.
#[derive(Clone)]
pub struct Distribution {
    root: PathBuf,
    launcher: String,
    rename: Option<InstallRename>,
    resolver: Arc<dyn ArtifactResolver>,
}

impl Distribution {
    pub fn new(root: impl Into<PathBuf>, launcher: impl Into<String>, resolver: Arc<dyn ArtifactResolver>) -> Self {
        Self {
            root: root.into(),
            launcher: launcher.into(),
            rename: None,
            resolver,
        }
    }

    pub fn from_config(config: &HarnessConfig, resolver: Arc<dyn ArtifactResolver>) -> Self {
        Self {
            rename: config.install_rename.clone(),
            ..Self::new(&config.dist_root, &config.launcher, resolver)
        }
    }

    pub fn with_rename(mut self, rename: InstallRename) -> Self {
        self.rename = Some(rename);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Make sure an executable installation exists and return its path.
    ///
    /// With `recreate` set, any existing installation is removed and the
    /// archive is expanded again.
    pub fn prepare(&self, recreate: bool) -> HarnessResult<PathBuf> {
        fs::create_dir_all(&self.root).map_err(|e| {
            HarnessError::Preparation(format!("cannot create {}: {}", self.root.display(), e))
        })?;

        let archive = self.resolver.resolve()?;
        let (install_name, format) = self.install_name(&archive)?;
        let install_path = self.root.join(install_name);

        if recreate || !install_path.exists() {
            if install_path.exists() {
                info!("Removing stale installation at {}", install_path.display());
                fs::remove_dir_all(&install_path).map_err(|e| {
                    HarnessError::Preparation(format!(
                        "cannot remove {}: {}",
                        install_path.display(),
                        e
                    ))
                })?;
            }

            info!("Expanding {} into {}", archive.display(), self.root.display());
            expand(&archive, format, &self.root).map_err(|e| {
                HarnessError::Preparation(format!("cannot expand {}: {}", archive.display(), e))
            })?;
        } else {
            debug!("Reusing installation at {}", install_path.display());
        }

        if !install_path.is_dir() {
            return Err(HarnessError::Preparation(format!(
                "archive {} did not contain {}",
                archive.display(),
                install_path.display()
            )));
        }

        let launcher = install_path.join("bin").join(&self.launcher);
        make_executable(&launcher).map_err(|e| {
            HarnessError::Preparation(format!("cannot make {} executable: {}", launcher.display(), e))
        })?;

        Ok(install_path)
    }

    /// Directory name the archive expands to, after the optional rename
    fn install_name(&self, archive: &Path) -> HarnessResult<(String, ArchiveFormat)> {
        let file_name = archive
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                HarnessError::Preparation(format!("invalid artifact name: {}", archive.display()))
            })?;

        let (stem, format) = ArchiveFormat::split(file_name).ok_or_else(|| {
            HarnessError::Preparation(format!("unsupported archive format: {}", file_name))
        })?;

        let name = match &self.rename {
            Some(rename) => stem.replace(&rename.from, &rename.to),
            None => stem.to_string(),
        };

        Ok((name, format))
    }
}

fn expand(archive: &Path, format: ArchiveFormat, dest: &Path) -> io::Result<()> {
    let file = File::open(archive)?;
    match format {
        ArchiveFormat::Zip => unzip(file, dest),
        ArchiveFormat::TarGz => tar::Archive::new(GzDecoder::new(file)).unpack(dest),
        ArchiveFormat::Tar => tar::Archive::new(file).unpack(dest),
    }
}

fn unzip(file: File, dest: &Path) -> io::Result<()> {
    // Rejects entries escaping `dest` and applies stored unix modes
    zip::ZipArchive::new(file)
        .and_then(|mut archive| archive.extract(dest))
        .map_err(zip_error)
}

fn zip_error(e: zip::result::ZipError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

fn make_executable(path: &Path) -> io::Result<()> {
    let metadata = fs::metadata(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = metadata.permissions();
        permissions.set_mode(permissions.mode() | 0o755);
        fs::set_permissions(path, permissions)?;
    }
    #[cfg(not(unix))]
    let _ = metadata;

    Ok(())
}
