//! Where feature files come from.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::types::FeatureType;

const FEATURE_EXT: &str = "feature";

/// One feature file as produced by a [`FeatureSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureFile {
    /// Path relative to the features root, `/`-separated.
    pub file_path: String,
    pub content: String,
    pub feature_type: FeatureType,
}

/// Produces the current set of feature files.
pub trait FeatureSource: Send + Sync {
    fn features(&self) -> io::Result<Vec<FeatureFile>>;
}

impl FeatureSource for Vec<FeatureFile> {
    fn features(&self) -> io::Result<Vec<FeatureFile>> {
        Ok(self.clone())
    }
}

/// Reads `<root>/<feature_type>/**/*.feature`.
///
/// Each directory directly under the root is a feature type. Files directly
/// under the root have no type and are ignored, as are hidden entries.
#[derive(Debug, Clone)]
pub struct DirectoryFeatureSource {
    root: PathBuf,
}

impl DirectoryFeatureSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryFeatureSource { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if is_hidden(&path) {
            continue;
        }
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == FEATURE_EXT) {
            out.push(path);
        }
    }
    Ok(())
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

impl FeatureSource for DirectoryFeatureSource {
    fn features(&self) -> io::Result<Vec<FeatureFile>> {
        let mut types: Vec<PathBuf> = fs::read_dir(&self.root)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<_>>()?;
        types.retain(|p| p.is_dir() && !is_hidden(p));
        types.sort();

        let mut features = Vec::new();
        for type_dir in types {
            let Some(feature_type) = type_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let feature_type = FeatureType::new(feature_type);

            let mut files = Vec::new();
            collect_files(&type_dir, &mut files)?;
            for path in files {
                let Some(file_path) = relative_path(&self.root, &path) else {
                    continue;
                };
                features.push(FeatureFile {
                    file_path,
                    content: fs::read_to_string(&path)?,
                    feature_type: feature_type.clone(),
                });
            }
        }
        features.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        Ok(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn walks_feature_types_recursively() {
        let dir = tempdir().unwrap();
        write(dir.path(), "web/login.feature", "Feature: Login\n");
        write(dir.path(), "web/admin/users.feature", "Feature: Users\n");
        write(dir.path(), "api/health.feature", "Feature: Health\n");
        write(dir.path(), "api/notes.txt", "not a feature");
        write(dir.path(), "api/.hidden/skip.feature", "Feature: Hidden\n");
        write(dir.path(), "untyped.feature", "Feature: Untyped\n");

        let features = DirectoryFeatureSource::new(dir.path()).features().unwrap();
        let paths: Vec<_> = features.iter().map(|f| f.file_path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["api/health.feature", "web/admin/users.feature", "web/login.feature"]
        );
        assert_eq!(features[1].feature_type, FeatureType::new("web"));
        assert_eq!(features[0].content, "Feature: Health\n");
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempdir().unwrap();
        let source = DirectoryFeatureSource::new(dir.path().join("nope"));
        assert!(source.features().is_err());
    }
}
