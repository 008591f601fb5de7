//! Reconciling feature files with the feature catalog.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::persistence::{FeatureCatalog, StoreError};
use crate::types::{ContentHash, FeatureRecord, NewFeature};

use super::parse::{GherkinKeywords, ParsedFeature, parse_feature};
use super::source::{FeatureFile, FeatureSource};
use super::{Result, SyncError};

/// What one synchronization pass found, by file path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    /// New files not created because creation was disabled.
    pub missing_and_skipped: Vec<String>,
    /// Catalog records whose file is gone. Never modified.
    pub stale: Vec<String>,
    pub unchanged: Vec<String>,
    /// Files that could not be parsed. Their records, if any, are left alone.
    pub invalid: Vec<String>,
}

impl SyncReport {
    /// Number of catalog writes the pass made.
    pub fn changes_applied(&self) -> usize {
        self.created.len() + self.updated.len()
    }

    /// True when the pass found nothing but unchanged files.
    pub fn is_empty(&self) -> bool {
        self.changes_applied() == 0
            && self.missing_and_skipped.is_empty()
            && self.stale.is_empty()
            && self.invalid.is_empty()
    }
}

enum Outcome {
    Created,
    Updated,
    Unchanged,
}

pub struct Synchronizer<S, C> {
    source: S,
    catalog: Arc<C>,
    keywords: GherkinKeywords,
}

impl<S: FeatureSource, C: FeatureCatalog> Synchronizer<S, C> {
    pub fn new(source: S, catalog: Arc<C>, keywords: GherkinKeywords) -> Self {
        Synchronizer {
            source,
            catalog,
            keywords,
        }
    }

    /// Brings the catalog in line with the source.
    ///
    /// New files are created when `create_if_missing` is set, changed files
    /// are replaced, and records without a file are reported as stale. Running
    /// it again on the same input applies no changes.
    #[instrument(skip(self))]
    pub fn synchronize(&self, create_if_missing: bool) -> Result<SyncReport> {
        let files = self.source.features().map_err(SyncError::Source)?;
        let mut report = SyncReport::default();
        let mut seen = BTreeSet::new();

        for file in files {
            seen.insert(file.file_path.clone());
            let hash = ContentHash::of(&file.content);

            let existing = self.catalog.find_feature_by_path(&file.file_path)?;
            if existing.is_none() && !create_if_missing {
                debug!(path = %file.file_path, "Skipping new feature file");
                report.missing_and_skipped.push(file.file_path);
                continue;
            }
            if let Some(record) = &existing
                && record.content_hash == hash
            {
                report.unchanged.push(file.file_path);
                continue;
            }

            let parsed = match parse_feature(&file.content, &self.keywords) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(path = %file.file_path, error = %e, "Skipping unparseable feature file");
                    report.invalid.push(file.file_path);
                    continue;
                }
            };

            let outcome = match existing {
                Some(record) => self.replace(record, &file, hash, parsed)?,
                None => self.create(&file, hash, parsed)?,
            };
            match outcome {
                Outcome::Created => report.created.push(file.file_path),
                Outcome::Updated => report.updated.push(file.file_path),
                Outcome::Unchanged => report.unchanged.push(file.file_path),
            }
        }

        report.stale = self
            .catalog
            .list_feature_paths()?
            .into_iter()
            .filter(|path| !seen.contains(path))
            .collect();

        info!(
            created = report.created.len(),
            updated = report.updated.len(),
            skipped = report.missing_and_skipped.len(),
            stale = report.stale.len(),
            invalid = report.invalid.len(),
            "Synchronized feature catalog"
        );
        Ok(report)
    }

    fn create(&self, file: &FeatureFile, hash: ContentHash, parsed: ParsedFeature) -> Result<Outcome> {
        let new = NewFeature {
            file_path: file.file_path.clone(),
            content_hash: hash.clone(),
            feature_type: file.feature_type.clone(),
            name: parsed.name.clone(),
            tags: parsed.tags.clone(),
            scenarios: parsed.scenarios.clone(),
        };
        match self.catalog.create_feature(new) {
            Ok(record) => {
                debug!(path = %record.file_path, id = %record.id, hash = hash.short(), "Created feature record");
                Ok(Outcome::Created)
            }
            // A concurrent pass created it first; reconcile against theirs.
            Err(StoreError::Conflict(_)) => {
                let record = self
                    .catalog
                    .find_feature_by_path(&file.file_path)?
                    .ok_or_else(|| {
                        StoreError::NotFound(format!("feature {} vanished", file.file_path))
                    })?;
                if record.content_hash == hash {
                    return Ok(Outcome::Unchanged);
                }
                self.replace(record, file, hash, parsed)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn replace(
        &self,
        mut record: FeatureRecord,
        file: &FeatureFile,
        hash: ContentHash,
        parsed: ParsedFeature,
    ) -> Result<Outcome> {
        debug!(
            path = %record.file_path,
            old = record.content_hash.short(),
            new = hash.short(),
            "Replacing feature record"
        );
        record.content_hash = hash;
        record.feature_type = file.feature_type.clone();
        record.name = parsed.name;
        record.tags = parsed.tags;
        record.scenarios = parsed.scenarios;
        record.updated_at = Utc::now();
        self.catalog.update_feature(&record)?;
        Ok(Outcome::Updated)
    }
}
