// src/secrets.rs

//! Loader for secrets files.
//!
//! A secrets file must be named `*.secret.yaml`, must be a regular file, and
//! must not be readable by group or others. The raw bytes are zeroed once
//! parsing is done, whether it succeeded or not.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

const SECRET_SUFFIX: &str = ".secret.yaml";

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("invalid secrets filename {0:?}: must end in {SECRET_SUFFIX}")]
    BadName(PathBuf),
    #[error("error opening {0:?}: not a regular file")]
    NotRegular(PathBuf),
    #[error("error opening {path:?}: permission bits are {mode:03o} (group/other bits are forbidden)")]
    Permissions { path: PathBuf, mode: u32 },
    #[error("error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("error parsing {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

/// Load a YAML secrets file into `T`.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T, SecretsError> {
    let is_secret_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(SECRET_SUFFIX));
    if !is_secret_name {
        return Err(SecretsError::BadName(path.to_path_buf()));
    }

    let meta = fs::metadata(path).map_err(|source| SecretsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if !meta.is_file() {
        return Err(SecretsError::NotRegular(path.to_path_buf()));
    }

    let mode = meta.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(SecretsError::Permissions {
            path: path.to_path_buf(),
            mode,
        });
    }

    let mut data = fs::read(path).map_err(|source| SecretsError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let parsed = serde_yaml::from_slice(&data).map_err(|source| SecretsError::Parse {
        path: path.to_path_buf(),
        source,
    });

    for byte in data.iter_mut() {
        *byte = 0;
    }

    parsed
}
