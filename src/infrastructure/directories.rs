use std::{fs, path::PathBuf};

use anyhow::{Context, Result};

use crate::config::{ClassifierConfig, DirectoryConfig};

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub logs_dir: PathBuf,
    pub data_dir: PathBuf,
    pub model_path: PathBuf,
}

pub fn ensure_directories(
    cfg: &DirectoryConfig,
    classifier: &ClassifierConfig,
) -> Result<ResolvedPaths> {
    let logs_dir = ensure_dir(&cfg.logs_dir)?;
    let data_dir = ensure_dir(&cfg.data_dir)?;
    let model_path = data_dir.join(&classifier.model_filename);

    Ok(ResolvedPaths {
        logs_dir,
        data_dir,
        model_path,
    })
}

fn ensure_dir(path: &str) -> Result<PathBuf> {
    let dir = PathBuf::from(path);
    if !dir.exists() {
        fs::create_dir_all(&dir).with_context(|| format!("failed to create directory {}", path))?;
    }
    Ok(dir.canonicalize().unwrap_or(dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_missing_directories_and_resolves_model_path() {
        let root = tempfile::tempdir().unwrap();
        let cfg = DirectoryConfig {
            logs_dir: root.path().join("logs").display().to_string(),
            data_dir: root.path().join("nested/data").display().to_string(),
        };
        let paths = ensure_directories(&cfg, &ClassifierConfig::default()).unwrap();

        assert!(paths.logs_dir.is_dir());
        assert!(paths.data_dir.is_dir());
        assert_eq!(paths.model_path, paths.data_dir.join("filter.json"));
    }
}
