//! Multi-file configuration loading.

use std::path::Path;

use indexmap::IndexMap;
use snafu::ResultExt;

use crate::config::{ConfigPath, interpolate, is_yaml_file};
use crate::error::{ConfigError, ReadDirSnafu, ReadFileSnafu};

/// A configuration made of keyed components plus process-wide sections,
/// assembled from several YAML documents.
pub trait Mergeable: Sized + Default {
    type Key: Eq + std::hash::Hash + Clone + std::fmt::Display;
    type Component;

    fn components_mut(&mut self) -> &mut IndexMap<Self::Key, Self::Component>;

    fn parse_yaml(contents: &str) -> Result<Self, ConfigError>;

    /// Fold the non-component sections of `other` into `self`.
    fn merge_sections(&mut self, other: Self);

    fn merge(&mut self, mut other: Self) -> Result<(), ConfigError> {
        let duplicates: Vec<String> = other
            .components_mut()
            .keys()
            .filter(|key| self.components_mut().contains_key(*key))
            .map(|key| key.to_string())
            .collect();

        if !duplicates.is_empty() {
            return Err(ConfigError::DuplicateComponents { keys: duplicates });
        }

        let components: Vec<_> = other.components_mut().drain(..).collect();
        self.components_mut().extend(components);
        self.merge_sections(other);
        Ok(())
    }
}

/// Load and merge every config source, collecting all errors before failing.
pub fn load_from_paths<C: Mergeable>(paths: &[ConfigPath]) -> Result<C, ConfigError> {
    let mut config = C::default();
    let mut errors = Vec::new();

    for path in paths {
        let loaded = match path {
            ConfigPath::File(file) => load_file::<C>(file),
            ConfigPath::Dir(dir) => load_dir::<C>(dir),
        };
        if let Err(e) = loaded.and_then(|partial| config.merge(partial)) {
            errors.push(format!("{}: {}", path.as_path().display(), e));
        }
    }

    if !errors.is_empty() {
        return Err(ConfigError::MultipleErrors { errors });
    }
    Ok(config)
}

fn load_file<C: Mergeable>(path: &Path) -> Result<C, ConfigError> {
    if !is_yaml_file(path) {
        return Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        });
    }

    let contents = std::fs::read_to_string(path).context(ReadFileSnafu)?;

    let result = interpolate(&contents);
    if !result.is_ok() {
        return Err(ConfigError::EnvInterpolation {
            message: result.errors.join("\n"),
        });
    }

    C::parse_yaml(&result.text)
}

fn load_dir<C: Mergeable>(dir: &Path) -> Result<C, ConfigError> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .context(ReadDirSnafu { path: dir })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_yaml_file(path))
        .collect();
    files.sort();

    let mut config = C::default();
    let mut errors = Vec::new();

    for path in files {
        if let Err(e) = load_file::<C>(&path).and_then(|partial| config.merge(partial)) {
            errors.push(format!("{}: {}", path.display(), e));
        }
    }

    if !errors.is_empty() {
        return Err(ConfigError::MultipleErrors { errors });
    }
    Ok(config)
}
