use std::env;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirError {
    #[error("Directory not found: {0}")]
    DirNotFound(String),
}

pub type DirResult<T> = Result<T, DirError>;

/// Application name used to namespace directories.
pub static APP_NAME: &str = "vecscope";

/// File name of the optional source configuration.
pub static CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirType {
    Config,
}

impl Display for DirType {
    /// Pretty-print the default directory path hint for this dir type.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirType::Config => write!(f, "~/.config/")?,
        };
        write!(f, "{}", APP_NAME)
    }
}

impl DirType {
    /// XDG environment variable key for this directory type.
    fn xdg_key(&self) -> &'static str {
        match self {
            DirType::Config => "XDG_CONFIG_HOME",
        }
    }

    /// Relative default path under HOME when XDG is not set.
    fn rel_path(&self) -> &'static str {
        match self {
            DirType::Config => ".config",
        }
    }

    /// Resolve the directory from an explicit XDG value or home directory.
    ///
    /// Split out from [`DirType::get_dir`] so resolution can be checked without
    /// touching the process environment.
    pub fn resolve(&self, xdg: Option<&Path>, home: Option<&Path>) -> DirResult<PathBuf> {
        match (xdg, home) {
            (Some(dir), _) if !dir.as_os_str().is_empty() => Ok(dir.join(APP_NAME)),
            (_, Some(home)) => Ok(home.join(self.rel_path()).join(APP_NAME)),
            _ => Err(DirError::DirNotFound(self.to_string())),
        }
    }

    /// Resolve the directory path from XDG or fallback environment hints.
    pub fn get_dir(&self) -> DirResult<PathBuf> {
        let xdg = env::var_os(self.xdg_key()).map(PathBuf::from);
        let home = env::home_dir()
            .or_else(|| env::var_os("HOME").map(PathBuf::from))
            .or_else(|| env::var_os("USERPROFILE").map(PathBuf::from));
        self.resolve(xdg.as_deref(), home.as_deref())
    }
}

/// Location of the default configuration file. The file may not exist.
pub fn default_config_file() -> DirResult<PathBuf> {
    Ok(DirType::Config.get_dir()?.join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xdg_value_takes_precedence() {
        let dir = DirType::Config
            .resolve(Some(Path::new("/xdg/config")), Some(Path::new("/home/me")))
            .unwrap();
        assert_eq!(dir, PathBuf::from("/xdg/config/vecscope"));
    }

    #[test]
    fn falls_back_to_home_relative_path() {
        let dir = DirType::Config
            .resolve(None, Some(Path::new("/home/me")))
            .unwrap();
        assert_eq!(dir, PathBuf::from("/home/me/.config/vecscope"));
    }

    #[test]
    fn empty_xdg_value_is_ignored() {
        let dir = DirType::Config
            .resolve(Some(Path::new("")), Some(Path::new("/home/me")))
            .unwrap();
        assert_eq!(dir, PathBuf::from("/home/me/.config/vecscope"));
    }

    #[test]
    fn missing_everything_is_an_error() {
        let err = DirType::Config.resolve(None, None).unwrap_err();
        assert!(matches!(err, DirError::DirNotFound(_)));
        assert!(err.to_string().contains("~/.config/vecscope"));
    }
}
