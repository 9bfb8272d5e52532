//! File-level edits that keep the index in step with the files on disk.
//!
//! Every operation writes files through a [`TagAdapter`] first and touches
//! the index only for the files that were written. Per-file failures are
//! collected and reported together as [`Error::PartialWrite`]. Nothing here
//! saves the index; callers save once per user action using the returned
//! [`ChangeSet`].

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::dicom::{self, TagAdapter, TagKey};
use crate::error::{Error, FileFailure, PartialWrite, Result};
use crate::index::{HierarchyIndex, ImageDescriptor, Level, NodeRef, ParentChain};
use crate::{naming, scan};

/// Nodes and files affected by one operation, for UI refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub changed: Vec<NodeRef>,
    pub new_paths: Vec<PathBuf>,
    pub removed_paths: Vec<PathBuf>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.new_paths.is_empty() && self.removed_paths.is_empty()
    }

    fn touch(&mut self, node: NodeRef) {
        if !self.changed.contains(&node) {
            self.changed.push(node);
        }
    }
}

/// Where a copied image lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesTarget {
    /// Next to the original.
    Same,
    /// A new series in the original's study. Without a number, the next free
    /// one among the study's series is used; without a description, the
    /// original's is kept.
    New {
        number: Option<i64>,
        description: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    SliceLocation,
    EchoTime,
    AcquisitionTime,
    InstanceNumber,
}

impl SortKey {
    pub fn tag(self) -> TagKey {
        TagKey::keyword(match self {
            Self::SliceLocation => dicom::SLICE_LOCATION,
            Self::EchoTime => dicom::ECHO_TIME,
            Self::AcquisitionTime => dicom::ACQUISITION_TIME,
            Self::InstanceNumber => dicom::INSTANCE_NUMBER,
        })
    }
}

type ProgressFn<'a> = Box<dyn FnMut(usize, usize) + 'a>;

pub struct Mutator<'a, A: TagAdapter + ?Sized> {
    index: &'a mut HierarchyIndex,
    adapter: &'a A,
    progress: Option<ProgressFn<'a>>,
}

impl<'a, A: TagAdapter + ?Sized> Mutator<'a, A> {
    pub fn new(index: &'a mut HierarchyIndex, adapter: &'a A) -> Self {
        Self {
            index,
            adapter,
            progress: None,
        }
    }

    /// Called as `(current, total)` from inside batch loops.
    pub fn on_progress(mut self, callback: impl FnMut(usize, usize) + 'a) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Duplicates one image file and indexes the copy.
    pub fn copy_image(
        &mut self,
        path: &Path,
        suffix: &str,
        target: &SeriesTarget,
    ) -> Result<(PathBuf, ChangeSet)> {
        let source = self.indexed(path)?;
        let new_path = self.adapter.duplicate_file(path, suffix)?;

        let series = match target {
            SeriesTarget::Same => source.series.clone(),
            SeriesTarget::New {
                number,
                description,
            } => {
                let number = number.unwrap_or_else(|| self.next_series_number(&source));
                let description = description
                    .clone()
                    .unwrap_or_else(|| naming::series_description(&source.series).to_string());
                let values = series_tag_values(number, &description, &naming::new_uid());
                if let Err(err) = self.adapter.put_tags(&new_path, &values) {
                    let _ = self.adapter.delete_file(&new_path);
                    return Err(err);
                }
                naming::series_id(Some(number), Some(&description))
            }
        };

        let entry = self.described(ImageDescriptor {
            series,
            path: new_path.clone(),
            ..source
        });
        self.index.insert_image(&entry);

        let mut changes = ChangeSet::default();
        changes.touch(NodeRef::series(&entry.subject, &entry.study, &entry.series));
        changes.new_paths.push(new_path.clone());
        log::info!("Copied {} to {}", path.display(), new_path.display());
        Ok((new_path, changes))
    }

    /// Gathers `paths` into one new series in the first image's study. The
    /// files take the first image's patient and study attributes along with
    /// the new series attributes.
    ///
    /// With `overwrite` the files are retagged in place and their old series
    /// shrink (and vanish when emptied). Without it each file is duplicated
    /// with `suffix` first and only the duplicates join the new series.
    pub fn merge_images(
        &mut self,
        paths: &[PathBuf],
        series_description: &str,
        overwrite: bool,
        suffix: &str,
    ) -> Result<ChangeSet> {
        let mut changes = ChangeSet::default();
        let Some(anchor) = paths.first() else {
            return Ok(changes);
        };
        let anchor = self.indexed(anchor)?;
        let number = self.next_series_number(&anchor);
        let target = ParentChain {
            subject: anchor.subject.clone(),
            study: anchor.study.clone(),
            series: naming::series_id(Some(number), Some(series_description)),
        };

        let mut values = series_tag_values(number, series_description, &naming::new_uid());
        values.extend(self.study_tag_values(&anchor.path)?);

        let total = paths.len();
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (position, path) in paths.iter().enumerate() {
            self.report(position, total);
            let source = match self.indexed(path) {
                Ok(source) => source,
                Err(err) => {
                    failed.push(failure(path, &err));
                    continue;
                }
            };

            let written = if overwrite {
                path.clone()
            } else {
                match self.adapter.duplicate_file(path, suffix) {
                    Ok(copy) => copy,
                    Err(err) => {
                        failed.push(failure(path, &err));
                        continue;
                    }
                }
            };
            if let Err(err) = self.adapter.put_tags(&written, &values) {
                if !overwrite {
                    let _ = self.adapter.delete_file(&written);
                }
                failed.push(failure(path, &err));
                continue;
            }

            let entry = self.described(ImageDescriptor {
                subject: target.subject.clone(),
                study: target.study.clone(),
                series: target.series.clone(),
                path: written.clone(),
                ..source.clone()
            });
            if overwrite {
                changes.touch(NodeRef::series(&source.subject, &source.study, &source.series));
                self.index.update_image(&entry);
            } else {
                self.index.insert_image(&entry);
            }
            changes.touch(NodeRef::series(&entry.subject, &entry.study, &entry.series));
            changes.new_paths.push(written);
            succeeded.push(path.clone());
        }
        self.report(total, total);

        finish("merge", succeeded, failed, changes)
    }

    /// Deletes the files and drops their images from the index. A file that
    /// is already gone is dropped from the index too.
    pub fn delete_images(&mut self, paths: &[PathBuf]) -> Result<ChangeSet> {
        let mut changes = ChangeSet::default();
        let total = paths.len();
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();

        for (position, path) in paths.iter().enumerate() {
            self.report(position, total);
            if self.adapter.exists(path) {
                if let Err(err) = self.adapter.delete_file(path) {
                    failed.push(failure(path, &err));
                    continue;
                }
            } else {
                log::debug!("{} already gone; dropping it from the index", path.display());
            }

            if let Some(removed) = self.index.remove_image(path) {
                changes.touch(NodeRef::series(&removed.subject, &removed.study, &removed.series));
            }
            changes.removed_paths.push(path.clone());
            succeeded.push(path.clone());
        }
        self.report(total, total);

        finish("delete", succeeded, failed, changes)
    }

    /// Writes `value` into `tag` of every file. When the tag is PatientID,
    /// StudyDescription or SeriesDescription the matching node is renamed in
    /// place if every one of its images was edited; otherwise only the edited
    /// images move to a node carrying the new identifier. Any other change
    /// the edit makes to an image's identifiers, label, date or time is then
    /// taken from the file. Repeated paths are written once.
    pub fn edit_tag(&mut self, paths: &[PathBuf], tag: &TagKey, value: &str) -> Result<ChangeSet> {
        let mut seen = HashSet::with_capacity(paths.len());
        let paths = paths
            .iter()
            .filter(|path| seen.insert(path.as_path()))
            .collect::<Vec<_>>();

        let mut changes = ChangeSet::default();
        let total = paths.len();
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();

        for (position, path) in paths.into_iter().enumerate() {
            self.report(position, total);
            match self.adapter.write_tag(path, tag, value) {
                Ok(()) => succeeded.push(path.clone()),
                Err(err) => failed.push(failure(path, &err)),
            }
        }
        self.report(total, total);

        if let Some(level) = identifying_level(tag) {
            self.apply_identifier_edit(level, &succeeded, value, &mut changes);
        }
        for path in &succeeded {
            let Ok(current) = self.indexed(path) else {
                continue;
            };
            let entry = self.described(current.clone());
            if entry != current {
                self.index.update_image(&entry);
                changes.touch(NodeRef::series(&current.subject, &current.study, &current.series));
                changes.touch(NodeRef::series(&entry.subject, &entry.study, &entry.series));
            }
            if identifying_level(tag).is_none() {
                changes.touch(NodeRef::image(path));
            }
        }
        finish("edit", succeeded, failed, changes)
    }

    /// Renames a node by editing its identifying tag on all of its images.
    /// Images have no identifying tag; their label changes in the index only.
    pub fn rename(&mut self, node: &NodeRef, new_name: &str) -> Result<ChangeSet> {
        let tag = match node {
            NodeRef::Subject { .. } => dicom::PATIENT_ID,
            NodeRef::Study { .. } => dicom::STUDY_DESCRIPTION,
            NodeRef::Series { .. } => dicom::SERIES_DESCRIPTION,
            NodeRef::Image(path) => {
                self.index.set_image_label(path, new_name)?;
                let mut changes = ChangeSet::default();
                changes.touch(node.clone());
                return Ok(changes);
            }
        };
        let paths = self
            .index
            .paths_under(node)
            .ok_or_else(|| Error::not_found(format!("{node:?}")))?;
        self.edit_tag(&paths, &TagKey::keyword(tag), new_name)
    }

    /// Reorders the images of one series by a numeric tag. Images without a
    /// readable value keep their relative order after the others.
    pub fn sort_series(&mut self, series: &NodeRef, key: SortKey) -> Result<ChangeSet> {
        let paths = match series {
            NodeRef::Series { .. } => self.index.paths_under(series),
            _ => None,
        }
        .ok_or_else(|| Error::not_found(format!("{series:?}")))?;

        let tag = key.tag();
        let total = paths.len();
        let mut keys = HashMap::with_capacity(total);
        for (position, path) in paths.iter().enumerate() {
            self.report(position, total);
            let value = match self.adapter.read_tag(path, &tag) {
                Ok(raw) => parse_first_number(&raw),
                Err(Error::TagNotFound { .. }) => None,
                Err(err) => {
                    log::warn!("Sorting without {tag} for {}: {err}", path.display());
                    None
                }
            };
            keys.insert(path.clone(), value);
        }
        self.report(total, total);

        self.index.sort_series_images(series, |a, b| {
            match (keys.get(&a.path).copied().flatten(), keys.get(&b.path).copied().flatten()) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        })?;

        let mut changes = ChangeSet::default();
        changes.touch(series.clone());
        Ok(changes)
    }

    fn apply_identifier_edit(
        &mut self,
        level: Level,
        edited: &[PathBuf],
        value: &str,
        changes: &mut ChangeSet,
    ) {
        let mut groups: Vec<(NodeRef, Vec<PathBuf>)> = Vec::new();
        for path in edited {
            let Some(chain) = self.index.find_parent_chain(path) else {
                continue;
            };
            let node = match level {
                Level::Subject => NodeRef::subject(&chain.subject),
                Level::Study => NodeRef::study(&chain.subject, &chain.study),
                _ => chain.series_ref(),
            };
            match groups.iter_mut().find(|(existing, _)| *existing == node) {
                Some((_, paths)) => paths.push(path.clone()),
                None => groups.push((node, vec![path.clone()])),
            }
        }

        for (node, paths) in groups {
            let covers_node = self
                .index
                .paths_under(&node)
                .is_some_and(|all| all.len() == paths.len());
            let renamed = renamed_ref(&node, value);

            if covers_node {
                let outcome = match (&node, &renamed) {
                    (NodeRef::Subject { subject }, NodeRef::Subject { subject: new_id }) => {
                        self.index.rename_subject(subject, new_id)
                    }
                    (NodeRef::Study { subject, study }, NodeRef::Study { study: new_id, .. }) => {
                        self.index.rename_study(subject, study, new_id)
                    }
                    (
                        NodeRef::Series {
                            subject,
                            study,
                            series,
                        },
                        NodeRef::Series { series: new_id, .. },
                    ) => self.index.rename_series(subject, study, series, new_id),
                    _ => Ok(()),
                };
                if let Err(err) = outcome {
                    log::warn!("Could not rename {node:?}: {err}");
                }
            } else {
                for path in &paths {
                    if let Some(chain) = self.index.find_parent_chain(path) {
                        let target = match &renamed {
                            NodeRef::Subject { subject } => ParentChain {
                                subject: subject.clone(),
                                ..chain
                            },
                            NodeRef::Study { study, .. } => ParentChain {
                                study: study.clone(),
                                ..chain
                            },
                            NodeRef::Series { series, .. } => ParentChain {
                                series: series.clone(),
                                ..chain
                            },
                            NodeRef::Image(_) => chain,
                        };
                        self.index.move_image(path, &target);
                    }
                }
            }
            changes.touch(node);
            changes.touch(renamed);
        }
    }

    /// Patient and study attributes of `path`. Absent ones are written empty,
    /// which reads back the same; an absent Study Instance UID is left out.
    fn study_tag_values(&self, path: &Path) -> Result<Vec<(TagKey, String)>> {
        let tags = [
            TagKey::keyword(dicom::PATIENT_ID),
            TagKey::keyword(dicom::STUDY_DESCRIPTION),
            TagKey::keyword(dicom::STUDY_DATE),
            TagKey::keyword(dicom::STUDY_TIME),
            TagKey::keyword(dicom::STUDY_INSTANCE_UID),
        ];
        let values = self.adapter.read_tags(path, &tags)?;
        Ok(tags
            .into_iter()
            .zip(values)
            .filter_map(|(tag, value)| match value {
                Some(value) => Some((tag, value)),
                None if tag.keyword_name() == Some(dicom::STUDY_INSTANCE_UID) => None,
                None => Some((tag, String::new())),
            })
            .collect())
    }

    /// What a folder scan reads from `fallback.path` now, or `fallback` when
    /// the file cannot be read back.
    fn described(&self, fallback: ImageDescriptor) -> ImageDescriptor {
        match scan::describe_file(self.adapter, &fallback.path) {
            Some(entry) => entry,
            None => {
                log::warn!(
                    "Could not read back {}; indexing it from the edit",
                    fallback.path.display()
                );
                fallback
            }
        }
    }

    fn indexed(&self, path: &Path) -> Result<ImageDescriptor> {
        self.index
            .image_descriptor(path)
            .ok_or_else(|| Error::not_found(format!("image '{}'", path.display())))
    }

    fn next_series_number(&self, source: &ImageDescriptor) -> i64 {
        self.index
            .study(&source.subject, &source.study)
            .map_or(1, |study| {
                naming::next_series_number(study.series.iter().map(|series| series.id.as_str()))
            })
    }

    fn report(&mut self, current: usize, total: usize) {
        if let Some(progress) = self.progress.as_mut() {
            progress(current, total);
        }
    }
}

fn series_tag_values(number: i64, description: &str, uid: &str) -> Vec<(TagKey, String)> {
    vec![
        (TagKey::keyword(dicom::SERIES_NUMBER), number.to_string()),
        (TagKey::keyword(dicom::SERIES_INSTANCE_UID), uid.to_string()),
        (
            TagKey::keyword(dicom::SERIES_DESCRIPTION),
            description.to_string(),
        ),
    ]
}

fn identifying_level(tag: &TagKey) -> Option<Level> {
    match tag {
        TagKey::Keyword(name) => match name.as_str() {
            dicom::PATIENT_ID => Some(Level::Subject),
            dicom::STUDY_DESCRIPTION => Some(Level::Study),
            dicom::SERIES_DESCRIPTION => Some(Level::Series),
            _ => None,
        },
        TagKey::Element(0x0010, 0x0020) => Some(Level::Subject),
        TagKey::Element(0x0008, 0x1030) => Some(Level::Study),
        TagKey::Element(0x0008, 0x103E) => Some(Level::Series),
        TagKey::Element(..) => None,
    }
}

/// The identifier `node` gets once its identifying tag reads `value`.
fn renamed_ref(node: &NodeRef, value: &str) -> NodeRef {
    match node {
        NodeRef::Subject { .. } => NodeRef::subject(naming::subject_id(Some(value))),
        NodeRef::Study { subject, study } => {
            NodeRef::study(subject, naming::with_study_description(study, value))
        }
        NodeRef::Series {
            subject,
            study,
            series,
        } => NodeRef::series(
            subject,
            study,
            naming::with_series_description(series, value),
        ),
        NodeRef::Image(path) => NodeRef::image(path),
    }
}

fn parse_first_number(raw: &str) -> Option<f64> {
    raw.split('\\').next()?.trim().parse::<f64>().ok()
}

fn failure(path: &Path, err: &Error) -> FileFailure {
    FileFailure {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

fn finish(
    operation: &str,
    succeeded: Vec<PathBuf>,
    failed: Vec<FileFailure>,
    changes: ChangeSet,
) -> Result<ChangeSet> {
    if failed.is_empty() {
        log::info!("{operation}: {} file(s) done", succeeded.len());
        return Ok(changes);
    }
    for failure in &failed {
        log::warn!("{operation} failed for {}: {}", failure.path.display(), failure.reason);
    }
    Err(Error::PartialWrite(Box::new(PartialWrite {
        succeeded,
        failed,
        changes,
    })))
}
