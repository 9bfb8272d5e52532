//! The in-memory Subject → Study → Series → Image tree.
//!
//! All structural changes go through [`HierarchyIndex`], which keeps three
//! properties at every public boundary: image paths are unique, no container
//! is left without children, and a parent's checked flag follows its
//! children after every toggle, insert or removal.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// One image as seen by a folder scan or a flattened tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub subject: String,
    pub study: String,
    pub series: String,
    pub path: PathBuf,
    pub label: String,
    pub date: String,
    pub time: String,
}

impl ImageDescriptor {
    pub fn new(
        subject: impl Into<String>,
        study: impl Into<String>,
        series: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        let path = path.into();
        let label = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            subject: subject.into(),
            study: study.into(),
            series: series.into(),
            path,
            label,
            date: String::new(),
            time: String::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_date_time(mut self, date: impl Into<String>, time: impl Into<String>) -> Self {
        self.date = date.into();
        self.time = time.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageNode {
    pub label: String,
    pub path: PathBuf,
    pub date: String,
    pub time: String,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesNode {
    pub id: String,
    pub checked: bool,
    pub expanded: bool,
    pub images: Vec<ImageNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyNode {
    pub id: String,
    pub checked: bool,
    pub expanded: bool,
    pub series: Vec<SeriesNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectNode {
    pub id: String,
    pub checked: bool,
    pub expanded: bool,
    pub studies: Vec<StudyNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Subject,
    Study,
    Series,
    Image,
}

/// Address of a node. Containers are addressed by their identifier chain,
/// images by their path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Subject {
        subject: String,
    },
    Study {
        subject: String,
        study: String,
    },
    Series {
        subject: String,
        study: String,
        series: String,
    },
    Image(PathBuf),
}

impl NodeRef {
    pub fn subject(subject: impl Into<String>) -> Self {
        Self::Subject {
            subject: subject.into(),
        }
    }

    pub fn study(subject: impl Into<String>, study: impl Into<String>) -> Self {
        Self::Study {
            subject: subject.into(),
            study: study.into(),
        }
    }

    pub fn series(
        subject: impl Into<String>,
        study: impl Into<String>,
        series: impl Into<String>,
    ) -> Self {
        Self::Series {
            subject: subject.into(),
            study: study.into(),
            series: series.into(),
        }
    }

    pub fn image(path: impl Into<PathBuf>) -> Self {
        Self::Image(path.into())
    }

    pub fn level(&self) -> Level {
        match self {
            Self::Subject { .. } => Level::Subject,
            Self::Study { .. } => Level::Study,
            Self::Series { .. } => Level::Series,
            Self::Image(_) => Level::Image,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Subject { subject } => format!("subject '{subject}'"),
            Self::Study { subject, study } => format!("study '{subject}/{study}'"),
            Self::Series {
                subject,
                study,
                series,
            } => format!("series '{subject}/{study}/{series}'"),
            Self::Image(path) => format!("image '{}'", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentChain {
    pub subject: String,
    pub study: String,
    pub series: String,
}

impl ParentChain {
    pub fn series_ref(&self) -> NodeRef {
        NodeRef::series(&self.subject, &self.study, &self.series)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Position {
    subject: usize,
    study: Option<usize>,
    series: Option<usize>,
    image: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct NodeState {
    checked: bool,
    expanded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum StateKey {
    Subject(String),
    Study(String, String),
    Series(String, String, String),
    Image(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HierarchyIndex {
    subjects: Vec<SubjectNode>,
    paths: HashSet<PathBuf>,
}

impl HierarchyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index from already-assembled nodes, as read from an index
    /// file. Empty containers are dropped; a repeated image path is an error.
    pub(crate) fn from_subjects(
        mut subjects: Vec<SubjectNode>,
    ) -> std::result::Result<Self, PathBuf> {
        prune_empty(&mut subjects);

        let mut paths = HashSet::new();
        for subject in &subjects {
            for study in &subject.studies {
                for series in &study.series {
                    for image in &series.images {
                        if !paths.insert(image.path.clone()) {
                            return Err(image.path.clone());
                        }
                    }
                }
            }
        }
        Ok(Self { subjects, paths })
    }

    pub fn subjects(&self) -> &[SubjectNode] {
        &self.subjects
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    pub fn image_count(&self) -> usize {
        self.paths.len()
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn subject(&self, subject: &str) -> Option<&SubjectNode> {
        self.subjects.iter().find(|node| node.id == subject)
    }

    pub fn study(&self, subject: &str, study: &str) -> Option<&StudyNode> {
        self.subject(subject)?
            .studies
            .iter()
            .find(|node| node.id == study)
    }

    pub fn series(&self, subject: &str, study: &str, series: &str) -> Option<&SeriesNode> {
        self.study(subject, study)?
            .series
            .iter()
            .find(|node| node.id == series)
    }

    pub fn image(&self, path: &Path) -> Option<&ImageNode> {
        let position = self.image_position(path)?;
        let (study, series, image) = (position.study?, position.series?, position.image?);
        Some(&self.subjects[position.subject].studies[study].series[series].images[image])
    }

    /// Replaces the whole tree with one built from `entries`, carrying the
    /// checked/expanded state of every node whose identifier chain already
    /// existed.
    pub fn rebuild_from_flat_list(&mut self, entries: &[ImageDescriptor]) {
        let previous = self.snapshot_states();
        self.subjects.clear();
        self.paths.clear();

        let mut skipped = 0usize;
        for entry in entries {
            if !self.paths.insert(entry.path.clone()) {
                skipped += 1;
                continue;
            }
            self.push_image(entry, &previous);
        }
        recompute_all(&mut self.subjects);
        if skipped > 0 {
            log::warn!("Skipped {skipped} duplicate image path(s) while rebuilding the index");
        }
        log::debug!(
            "Rebuilt index with {} subject(s) and {} image(s)",
            self.subjects.len(),
            self.paths.len()
        );
    }

    /// Appends the image as the last child of its series, creating the
    /// subject, study and series on first use. Returns `false`, changing
    /// nothing, when the path is already indexed.
    pub fn insert_image(&mut self, entry: &ImageDescriptor) -> bool {
        if !self.paths.insert(entry.path.clone()) {
            return false;
        }
        let position = self.push_image(entry, &HashMap::new());
        self.recompute_upward(position);
        true
    }

    /// Removes the image and any container left empty. Unknown paths are a
    /// no-op.
    pub fn remove_image(&mut self, path: &Path) -> Option<ImageDescriptor> {
        let position = self.image_position(path)?;
        let (study_idx, series_idx, image_idx) =
            (position.study?, position.series?, position.image?);

        let subject = &mut self.subjects[position.subject];
        let study = &mut subject.studies[study_idx];
        let series = &mut study.series[series_idx];
        let image = series.images.remove(image_idx);
        let descriptor = ImageDescriptor {
            subject: subject.id.clone(),
            study: study.id.clone(),
            series: series.id.clone(),
            path: image.path,
            label: image.label,
            date: image.date,
            time: image.time,
        };
        self.paths.remove(path);

        let mut remaining = Position {
            subject: position.subject,
            study: Some(study_idx),
            series: Some(series_idx),
            image: None,
        };
        if series.images.is_empty() {
            study.series.remove(series_idx);
            remaining.series = None;
            if study.series.is_empty() {
                subject.studies.remove(study_idx);
                remaining.study = None;
                if subject.studies.is_empty() {
                    self.subjects.remove(position.subject);
                    return Some(descriptor);
                }
            }
        }
        self.recompute_upward(remaining);
        Some(descriptor)
    }

    /// Moves an image under another (possibly new) series, keeping its
    /// checked flag. Containers are created before the old ones are pruned,
    /// so a study or subject shared by both ends keeps its place.
    pub fn move_image(&mut self, path: &Path, target: &ParentChain) -> bool {
        let Some(old_chain) = self.find_parent_chain(path) else {
            return false;
        };
        let Some(position) = self.image_position(path) else {
            return false;
        };
        let (study, series, image) = match (position.study, position.series, position.image) {
            (Some(study), Some(series), Some(image)) => (study, series, image),
            _ => return false,
        };

        let node = self.subjects[position.subject].studies[study].series[series]
            .images
            .remove(image);
        let entry = ImageDescriptor {
            subject: target.subject.clone(),
            study: target.study.clone(),
            series: target.series.clone(),
            path: node.path,
            label: node.label,
            date: node.date,
            time: node.time,
        };
        let moved = self.push_image(&entry, &HashMap::new());
        if let (Some(study), Some(series), Some(image)) = (moved.study, moved.series, moved.image) {
            self.subjects[moved.subject].studies[study].series[series].images[image].checked =
                node.checked;
        }

        prune_empty(&mut self.subjects);
        self.recompute_chain(&old_chain);
        self.recompute_chain(target);
        true
    }

    /// Brings an indexed image in line with `entry`. The image moves when its
    /// chain differs, keeping its checked flag, and takes the label, date and
    /// time. `false` when the path is not indexed.
    pub fn update_image(&mut self, entry: &ImageDescriptor) -> bool {
        let Some(chain) = self.find_parent_chain(&entry.path) else {
            return false;
        };
        let target = ParentChain {
            subject: entry.subject.clone(),
            study: entry.study.clone(),
            series: entry.series.clone(),
        };
        if chain != target && !self.move_image(&entry.path, &target) {
            return false;
        }
        if let Some(Position {
            subject,
            study: Some(study),
            series: Some(series),
            image: Some(image),
        }) = self.image_position(&entry.path)
        {
            let node = &mut self.subjects[subject].studies[study].series[series].images[image];
            node.label = entry.label.clone();
            node.date = entry.date.clone();
            node.time = entry.time.clone();
        }
        true
    }

    pub fn set_image_label(&mut self, path: &Path, label: &str) -> Result<()> {
        let position = self
            .image_position(path)
            .ok_or_else(|| Error::not_found(NodeRef::image(path).describe()))?;
        if let (Some(study), Some(series), Some(image)) =
            (position.study, position.series, position.image)
        {
            self.subjects[position.subject].studies[study].series[series].images[image].label =
                label.to_string();
        }
        Ok(())
    }

    pub fn image_descriptor(&self, path: &Path) -> Option<ImageDescriptor> {
        let chain = self.find_parent_chain(path)?;
        let image = self.image(path)?;
        Some(ImageDescriptor {
            subject: chain.subject,
            study: chain.study,
            series: chain.series,
            path: image.path.clone(),
            label: image.label.clone(),
            date: image.date.clone(),
            time: image.time.clone(),
        })
    }

    /// Paths of every image at or below `node`, in tree order.
    pub fn paths_under(&self, node: &NodeRef) -> Option<Vec<PathBuf>> {
        if let NodeRef::Image(path) = node {
            return self.paths.contains(path).then(|| vec![path.clone()]);
        }
        let position = self.locate(node)?;
        let subject = &self.subjects[position.subject];
        let series_iter: Box<dyn Iterator<Item = &SeriesNode> + '_> =
            match (position.study, position.series) {
                (None, _) => Box::new(subject.studies.iter().flat_map(|study| study.series.iter())),
                (Some(study), None) => Box::new(subject.studies[study].series.iter()),
                (Some(study), Some(series)) => {
                    Box::new(std::iter::once(&subject.studies[study].series[series]))
                }
            };
        Some(
            series_iter
                .flat_map(|series| series.images.iter())
                .map(|image| image.path.clone())
                .collect(),
        )
    }

    pub fn find_parent_chain(&self, path: &Path) -> Option<ParentChain> {
        let position = self.image_position(path)?;
        let subject = &self.subjects[position.subject];
        let study = &subject.studies[position.study?];
        let series = &study.series[position.series?];
        Some(ParentChain {
            subject: subject.id.clone(),
            study: study.id.clone(),
            series: series.id.clone(),
        })
    }

    /// Sets the flag on `node` and every descendant, then recomputes each
    /// ancestor as "all children checked".
    pub fn set_checked(&mut self, node: &NodeRef, value: bool) -> Result<()> {
        let position = self
            .locate(node)
            .ok_or_else(|| Error::not_found(node.describe()))?;

        let subject = &mut self.subjects[position.subject];
        match (position.study, position.series, position.image) {
            (None, _, _) => set_subject_checked(subject, value),
            (Some(study), None, _) => set_study_checked(&mut subject.studies[study], value),
            (Some(study), Some(series), None) => {
                set_series_checked(&mut subject.studies[study].series[series], value)
            }
            (Some(study), Some(series), Some(image)) => {
                subject.studies[study].series[series].images[image].checked = value
            }
        }
        self.recompute_upward(parent_of(position));
        Ok(())
    }

    /// Sets the expanded flag of a container. Images carry no such flag.
    pub fn set_expanded(&mut self, node: &NodeRef, value: bool) -> Result<()> {
        let position = self
            .locate(node)
            .ok_or_else(|| Error::not_found(node.describe()))?;
        let subject = &mut self.subjects[position.subject];
        match (position.study, position.series, position.image) {
            (None, _, _) => subject.expanded = value,
            (Some(study), None, _) => subject.studies[study].expanded = value,
            (Some(study), Some(series), None) => {
                subject.studies[study].series[series].expanded = value
            }
            (Some(_), Some(_), Some(_)) => {
                return Err(Error::not_found(format!(
                    "expandable node for {}",
                    node.describe()
                )))
            }
        }
        Ok(())
    }

    pub fn is_checked(&self, node: &NodeRef) -> Option<bool> {
        let position = self.locate(node)?;
        let subject = &self.subjects[position.subject];
        Some(match (position.study, position.series, position.image) {
            (None, _, _) => subject.checked,
            (Some(study), None, _) => subject.studies[study].checked,
            (Some(study), Some(series), None) => subject.studies[study].series[series].checked,
            (Some(study), Some(series), Some(image)) => {
                subject.studies[study].series[series].images[image].checked
            }
        })
    }

    /// Checked nodes of one level in depth-first tree order.
    pub fn all_checked(&self, level: Level) -> Vec<NodeRef> {
        let mut out = Vec::new();
        for subject in &self.subjects {
            if level == Level::Subject {
                if subject.checked {
                    out.push(NodeRef::subject(&subject.id));
                }
                continue;
            }
            for study in &subject.studies {
                if level == Level::Study {
                    if study.checked {
                        out.push(NodeRef::study(&subject.id, &study.id));
                    }
                    continue;
                }
                for series in &study.series {
                    if level == Level::Series {
                        if series.checked {
                            out.push(NodeRef::series(&subject.id, &study.id, &series.id));
                        }
                        continue;
                    }
                    out.extend(
                        series
                            .images
                            .iter()
                            .filter(|image| image.checked)
                            .map(|image| NodeRef::image(&image.path)),
                    );
                }
            }
        }
        out
    }

    /// Every image flattened back into descriptors, in tree order.
    pub fn image_descriptors(&self) -> Vec<ImageDescriptor> {
        let mut out = Vec::with_capacity(self.paths.len());
        for subject in &self.subjects {
            for study in &subject.studies {
                for series in &study.series {
                    for image in &series.images {
                        out.push(ImageDescriptor {
                            subject: subject.id.clone(),
                            study: study.id.clone(),
                            series: series.id.clone(),
                            path: image.path.clone(),
                            label: image.label.clone(),
                            date: image.date.clone(),
                            time: image.time.clone(),
                        });
                    }
                }
            }
        }
        out
    }

    /// Renames a subject in place. Renaming onto an existing subject moves
    /// the studies into it.
    pub fn rename_subject(&mut self, subject: &str, new_id: &str) -> Result<()> {
        let from = self
            .subject_index(subject)
            .ok_or_else(|| Error::not_found(NodeRef::subject(subject).describe()))?;
        if subject == new_id {
            return Ok(());
        }
        match self.subject_index(new_id) {
            Some(into) => {
                let moved = self.subjects.remove(from);
                let into = if into > from { into - 1 } else { into };
                for study in moved.studies {
                    merge_study_into(&mut self.subjects[into].studies, study);
                }
                self.recompute_subject(into);
            }
            None => self.subjects[from].id = new_id.to_string(),
        }
        Ok(())
    }

    pub fn rename_study(&mut self, subject: &str, study: &str, new_id: &str) -> Result<()> {
        let position = self
            .locate(&NodeRef::study(subject, study))
            .ok_or_else(|| Error::not_found(NodeRef::study(subject, study).describe()))?;
        if study == new_id {
            return Ok(());
        }
        let studies = &mut self.subjects[position.subject].studies;
        let from = position.study.unwrap_or_default();
        match studies.iter().position(|node| node.id == new_id) {
            Some(_) => {
                let moved = studies.remove(from);
                let renamed = StudyNode {
                    id: new_id.to_string(),
                    ..moved
                };
                merge_study_into(studies, renamed);
            }
            None => studies[from].id = new_id.to_string(),
        }
        self.recompute_subject(position.subject);
        Ok(())
    }

    pub fn rename_series(
        &mut self,
        subject: &str,
        study: &str,
        series: &str,
        new_id: &str,
    ) -> Result<()> {
        let node = NodeRef::series(subject, study, series);
        let position = self
            .locate(&node)
            .ok_or_else(|| Error::not_found(node.describe()))?;
        if series == new_id {
            return Ok(());
        }
        let study_idx = position.study.unwrap_or_default();
        let siblings = &mut self.subjects[position.subject].studies[study_idx].series;
        let from = position.series.unwrap_or_default();
        match siblings.iter().position(|node| node.id == new_id) {
            Some(_) => {
                let moved = siblings.remove(from);
                let renamed = SeriesNode {
                    id: new_id.to_string(),
                    ..moved
                };
                merge_series_into(siblings, renamed);
            }
            None => siblings[from].id = new_id.to_string(),
        }
        self.recompute_study(position.subject, study_idx);
        self.recompute_subject(position.subject);
        Ok(())
    }

    /// Reorders the images of one series; every other sibling order is
    /// untouched. The sort is stable.
    pub fn sort_series_images<F>(&mut self, series: &NodeRef, compare: F) -> Result<()>
    where
        F: FnMut(&ImageNode, &ImageNode) -> Ordering,
    {
        let position = match series {
            NodeRef::Series { .. } => self.locate(series),
            _ => None,
        }
        .ok_or_else(|| Error::not_found(series.describe()))?;
        let (study, series_idx) = (
            position.study.unwrap_or_default(),
            position.series.unwrap_or_default(),
        );
        self.subjects[position.subject].studies[study].series[series_idx]
            .images
            .sort_by(compare);
        Ok(())
    }

    fn push_image(
        &mut self,
        entry: &ImageDescriptor,
        previous: &HashMap<StateKey, NodeState>,
    ) -> Position {
        let state =
            |key: StateKey, default: NodeState| previous.get(&key).copied().unwrap_or(default);

        let subject_idx = match self.subject_index(&entry.subject) {
            Some(index) => index,
            None => {
                let carried = state(
                    StateKey::Subject(entry.subject.clone()),
                    NodeState {
                        checked: false,
                        expanded: true,
                    },
                );
                self.subjects.push(SubjectNode {
                    id: entry.subject.clone(),
                    checked: carried.checked,
                    expanded: carried.expanded,
                    studies: Vec::new(),
                });
                self.subjects.len() - 1
            }
        };

        let collapsed = NodeState {
            checked: false,
            expanded: false,
        };
        let studies = &mut self.subjects[subject_idx].studies;
        let study_idx = match studies.iter().position(|node| node.id == entry.study) {
            Some(index) => index,
            None => {
                let carried = state(
                    StateKey::Study(entry.subject.clone(), entry.study.clone()),
                    collapsed,
                );
                studies.push(StudyNode {
                    id: entry.study.clone(),
                    checked: carried.checked,
                    expanded: carried.expanded,
                    series: Vec::new(),
                });
                studies.len() - 1
            }
        };

        let series_list = &mut studies[study_idx].series;
        let series_idx = match series_list.iter().position(|node| node.id == entry.series) {
            Some(index) => index,
            None => {
                let carried = state(
                    StateKey::Series(
                        entry.subject.clone(),
                        entry.study.clone(),
                        entry.series.clone(),
                    ),
                    collapsed,
                );
                series_list.push(SeriesNode {
                    id: entry.series.clone(),
                    checked: carried.checked,
                    expanded: carried.expanded,
                    images: Vec::new(),
                });
                series_list.len() - 1
            }
        };

        let images = &mut series_list[series_idx].images;
        let checked = state(StateKey::Image(entry.path.clone()), collapsed).checked;
        images.push(ImageNode {
            label: entry.label.clone(),
            path: entry.path.clone(),
            date: entry.date.clone(),
            time: entry.time.clone(),
            checked,
        });

        Position {
            subject: subject_idx,
            study: Some(study_idx),
            series: Some(series_idx),
            image: Some(images.len() - 1),
        }
    }

    fn snapshot_states(&self) -> HashMap<StateKey, NodeState> {
        let mut states = HashMap::new();
        for subject in &self.subjects {
            states.insert(
                StateKey::Subject(subject.id.clone()),
                NodeState {
                    checked: subject.checked,
                    expanded: subject.expanded,
                },
            );
            for study in &subject.studies {
                states.insert(
                    StateKey::Study(subject.id.clone(), study.id.clone()),
                    NodeState {
                        checked: study.checked,
                        expanded: study.expanded,
                    },
                );
                for series in &study.series {
                    states.insert(
                        StateKey::Series(subject.id.clone(), study.id.clone(), series.id.clone()),
                        NodeState {
                            checked: series.checked,
                            expanded: series.expanded,
                        },
                    );
                    for image in &series.images {
                        states.insert(
                            StateKey::Image(image.path.clone()),
                            NodeState {
                                checked: image.checked,
                                expanded: false,
                            },
                        );
                    }
                }
            }
        }
        states
    }

    fn subject_index(&self, subject: &str) -> Option<usize> {
        self.subjects.iter().position(|node| node.id == subject)
    }

    fn locate(&self, node: &NodeRef) -> Option<Position> {
        match node {
            NodeRef::Subject { subject } => Some(Position {
                subject: self.subject_index(subject)?,
                study: None,
                series: None,
                image: None,
            }),
            NodeRef::Study { subject, study } => {
                let subject_idx = self.subject_index(subject)?;
                let study_idx = self.subjects[subject_idx]
                    .studies
                    .iter()
                    .position(|node| &node.id == study)?;
                Some(Position {
                    subject: subject_idx,
                    study: Some(study_idx),
                    series: None,
                    image: None,
                })
            }
            NodeRef::Series {
                subject,
                study,
                series,
            } => {
                let subject_idx = self.subject_index(subject)?;
                let study_idx = self.subjects[subject_idx]
                    .studies
                    .iter()
                    .position(|node| &node.id == study)?;
                let series_idx = self.subjects[subject_idx].studies[study_idx]
                    .series
                    .iter()
                    .position(|node| &node.id == series)?;
                Some(Position {
                    subject: subject_idx,
                    study: Some(study_idx),
                    series: Some(series_idx),
                    image: None,
                })
            }
            NodeRef::Image(path) => self.image_position(path),
        }
    }

    fn image_position(&self, path: &Path) -> Option<Position> {
        if !self.paths.contains(path) {
            return None;
        }
        for (subject_idx, subject) in self.subjects.iter().enumerate() {
            for (study_idx, study) in subject.studies.iter().enumerate() {
                for (series_idx, series) in study.series.iter().enumerate() {
                    if let Some(image_idx) = series.images.iter().position(|image| image.path == path)
                    {
                        return Some(Position {
                            subject: subject_idx,
                            study: Some(study_idx),
                            series: Some(series_idx),
                            image: Some(image_idx),
                        });
                    }
                }
            }
        }
        None
    }

    /// Recomputes from the deepest container of `chain` that still exists.
    fn recompute_chain(&mut self, chain: &ParentChain) {
        let deepest = self
            .locate(&chain.series_ref())
            .or_else(|| self.locate(&NodeRef::study(&chain.subject, &chain.study)))
            .or_else(|| self.locate(&NodeRef::subject(&chain.subject)));
        if let Some(position) = deepest {
            self.recompute_upward(position);
        }
    }

    /// Recomputes the checked flag of every container at or above
    /// `position`, innermost first.
    fn recompute_upward(&mut self, position: Position) {
        if let Some(study) = position.study {
            if let Some(series) = position.series {
                let node = &mut self.subjects[position.subject].studies[study].series[series];
                node.checked = node.images.iter().all(|image| image.checked);
            }
            self.recompute_study(position.subject, study);
        }
        self.recompute_subject(position.subject);
    }

    fn recompute_study(&mut self, subject: usize, study: usize) {
        let node = &mut self.subjects[subject].studies[study];
        node.checked = node.series.iter().all(|series| series.checked);
    }

    fn recompute_subject(&mut self, subject: usize) {
        let node = &mut self.subjects[subject];
        node.checked = node.studies.iter().all(|study| study.checked);
    }
}

fn parent_of(position: Position) -> Position {
    match position {
        Position {
            image: Some(_), ..
        } => Position {
            image: None,
            ..position
        },
        Position {
            series: Some(_), ..
        } => Position {
            series: None,
            ..position
        },
        Position { study: Some(_), .. } => Position {
            study: None,
            ..position
        },
        // The subject itself was toggled; nothing sits above it.
        Position { .. } => position,
    }
}

/// Container flags follow their children after a bulk rebuild; a carried
/// flag can be stale once images come or go.
fn recompute_all(subjects: &mut [SubjectNode]) {
    for subject in subjects.iter_mut() {
        for study in &mut subject.studies {
            for series in &mut study.series {
                series.checked = series.images.iter().all(|image| image.checked);
            }
            study.checked = study.series.iter().all(|series| series.checked);
        }
        subject.checked = subject.studies.iter().all(|study| study.checked);
    }
}

fn prune_empty(subjects: &mut Vec<SubjectNode>) {
    for subject in subjects.iter_mut() {
        for study in &mut subject.studies {
            study.series.retain(|series| !series.images.is_empty());
        }
        subject.studies.retain(|study| !study.series.is_empty());
    }
    subjects.retain(|subject| !subject.studies.is_empty());
}

fn set_subject_checked(subject: &mut SubjectNode, value: bool) {
    subject.checked = value;
    for study in &mut subject.studies {
        set_study_checked(study, value);
    }
}

fn set_study_checked(study: &mut StudyNode, value: bool) {
    study.checked = value;
    for series in &mut study.series {
        set_series_checked(series, value);
    }
}

fn set_series_checked(series: &mut SeriesNode, value: bool) {
    series.checked = value;
    for image in &mut series.images {
        image.checked = value;
    }
}

fn merge_study_into(studies: &mut Vec<StudyNode>, incoming: StudyNode) {
    match studies.iter_mut().find(|node| node.id == incoming.id) {
        Some(existing) => {
            for series in incoming.series {
                merge_series_into(&mut existing.series, series);
            }
            existing.checked = existing.series.iter().all(|series| series.checked);
        }
        None => studies.push(incoming),
    }
}

fn merge_series_into(series_list: &mut Vec<SeriesNode>, incoming: SeriesNode) {
    match series_list.iter_mut().find(|node| node.id == incoming.id) {
        Some(existing) => {
            existing.images.extend(incoming.images);
            existing.checked = existing.images.iter().all(|image| image.checked);
        }
        None => series_list.push(incoming),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_images() -> Vec<ImageDescriptor> {
        vec![
            ImageDescriptor::new("P1", "S1", "SER1", "/a/1.dcm"),
            ImageDescriptor::new("P1", "S1", "SER1", "/a/2.dcm"),
            ImageDescriptor::new("P1", "S1", "SER2", "/a/3.dcm"),
        ]
    }

    fn built(entries: &[ImageDescriptor]) -> HierarchyIndex {
        let mut index = HierarchyIndex::new();
        index.rebuild_from_flat_list(entries);
        index
    }

    #[test]
    fn rebuild_groups_images_under_shared_identifiers() {
        let index = built(&three_images());
        assert_eq!(index.subjects().len(), 1);
        let study = index.study("P1", "S1").expect("study should exist");
        assert_eq!(study.series.len(), 2);
        assert_eq!(study.series[0].id, "SER1");
        assert_eq!(study.series[0].images.len(), 2);
        assert_eq!(study.series[1].images.len(), 1);
        assert_eq!(index.image_count(), 3);
    }

    #[test]
    fn rebuild_applies_default_flags() {
        let index = built(&three_images());
        let subject = index.subject("P1").expect("subject should exist");
        assert!(subject.expanded);
        assert!(!subject.checked);
        let study = &subject.studies[0];
        assert!(!study.expanded);
        assert!(!study.series[0].expanded);
        assert!(study.series[0].images.iter().all(|image| !image.checked));
    }

    #[test]
    fn rebuild_with_no_entries_is_empty() {
        let mut index = built(&three_images());
        index.rebuild_from_flat_list(&[]);
        assert!(index.is_empty());
        assert_eq!(index.image_count(), 0);
        assert!(index.all_checked(Level::Image).is_empty());
    }

    #[test]
    fn rebuild_carries_state_and_is_idempotent() {
        let entries = three_images();
        let mut index = built(&entries);
        index
            .set_checked(&NodeRef::series("P1", "S1", "SER1"), true)
            .expect("series should exist");
        index
            .set_expanded(&NodeRef::study("P1", "S1"), true)
            .expect("study should exist");
        let before = index.clone();

        index.rebuild_from_flat_list(&entries);
        assert_eq!(index, before);
        index.rebuild_from_flat_list(&entries);
        assert_eq!(index, before);
    }

    #[test]
    fn rebuild_unchecks_containers_that_gain_unchecked_images() {
        let mut entries = three_images();
        let mut index = built(&entries);
        index
            .set_checked(&NodeRef::subject("P1"), true)
            .expect("subject should exist");

        entries.push(ImageDescriptor::new("P1", "S1", "SER1", "/a/4.dcm"));
        index.rebuild_from_flat_list(&entries);
        assert_eq!(index.is_checked(&NodeRef::image("/a/1.dcm")), Some(true));
        assert_eq!(index.is_checked(&NodeRef::image("/a/4.dcm")), Some(false));
        assert_eq!(index.is_checked(&NodeRef::series("P1", "S1", "SER1")), Some(false));
        assert_eq!(index.is_checked(&NodeRef::series("P1", "S1", "SER2")), Some(true));
        assert_eq!(index.is_checked(&NodeRef::study("P1", "S1")), Some(false));
        assert_eq!(index.is_checked(&NodeRef::subject("P1")), Some(false));

        index
            .set_checked(&NodeRef::image("/a/4.dcm"), true)
            .expect("image should exist");
        entries.pop();
        index.rebuild_from_flat_list(&entries);
        assert_eq!(index.is_checked(&NodeRef::subject("P1")), Some(true));
    }

    #[test]
    fn update_image_moves_and_relabels() {
        let mut index = built(&three_images());
        index
            .set_checked(&NodeRef::image("/a/1.dcm"), true)
            .expect("image should exist");

        let entry = ImageDescriptor::new("P1", "S2", "3_Merged", "/a/1.dcm")
            .with_label("000007")
            .with_date_time("20240202", "0900");
        assert!(index.update_image(&entry));
        let descriptor = index
            .image_descriptor(Path::new("/a/1.dcm"))
            .expect("image should stay indexed");
        assert_eq!(descriptor, entry);
        assert_eq!(index.is_checked(&NodeRef::image("/a/1.dcm")), Some(true));
        assert_eq!(index.is_checked(&NodeRef::series("P1", "S2", "3_Merged")), Some(true));

        let relabelled = entry.clone().with_label("000008");
        assert!(index.update_image(&relabelled));
        assert_eq!(
            index.image(Path::new("/a/1.dcm")).map(|image| image.label.as_str()),
            Some("000008")
        );
        assert!(!index.update_image(&ImageDescriptor::new("P1", "S1", "SER1", "/missing.dcm")));
    }

    #[test]
    fn rebuild_skips_duplicate_paths() {
        let mut entries = three_images();
        entries.push(ImageDescriptor::new("P2", "S9", "SER9", "/a/1.dcm"));
        let index = built(&entries);
        assert_eq!(index.image_count(), 3);
        assert!(index.subject("P2").is_none());
    }

    #[test]
    fn duplicate_insert_is_a_noop() {
        let mut index = built(&three_images());
        let before = index.clone();
        let inserted = index.insert_image(&ImageDescriptor::new("P1", "S1", "SER3", "/a/1.dcm"));
        assert!(!inserted);
        assert_eq!(index, before);
    }

    #[test]
    fn insert_creates_missing_parents_and_appends() {
        let mut index = built(&three_images());
        assert!(index.insert_image(&ImageDescriptor::new("P1", "S1", "SER1", "/a/4.dcm")));
        assert!(index.insert_image(&ImageDescriptor::new("P2", "S2", "SER1", "/b/1.dcm")));

        let series = index.series("P1", "S1", "SER1").expect("series should exist");
        assert_eq!(series.images.last().map(|image| image.path.as_path()), Some(Path::new("/a/4.dcm")));
        assert_eq!(index.subjects()[1].id, "P2");
        assert!(index.subjects()[1].expanded);
    }

    #[test]
    fn insert_under_checked_series_unchecks_ancestors() {
        let mut index = built(&three_images());
        index
            .set_checked(&NodeRef::subject("P1"), true)
            .expect("subject should exist");
        index.insert_image(&ImageDescriptor::new("P1", "S1", "SER1", "/a/4.dcm"));
        assert_eq!(index.is_checked(&NodeRef::series("P1", "S1", "SER1")), Some(false));
        assert_eq!(index.is_checked(&NodeRef::series("P1", "S1", "SER2")), Some(true));
        assert_eq!(index.is_checked(&NodeRef::subject("P1")), Some(false));
    }

    #[test]
    fn checking_series_checks_every_image() {
        let mut index = built(&three_images());
        index
            .set_checked(&NodeRef::series("P1", "S1", "SER1"), true)
            .expect("series should exist");
        assert_eq!(
            index.all_checked(Level::Image),
            vec![NodeRef::image("/a/1.dcm"), NodeRef::image("/a/2.dcm")]
        );
        assert_eq!(index.is_checked(&NodeRef::study("P1", "S1")), Some(false));
    }

    #[test]
    fn unchecking_all_images_unchecks_series() {
        let mut index = built(&three_images());
        index
            .set_checked(&NodeRef::series("P1", "S1", "SER1"), true)
            .expect("series should exist");
        index
            .set_checked(&NodeRef::image("/a/1.dcm"), false)
            .expect("image should exist");
        assert_eq!(index.is_checked(&NodeRef::series("P1", "S1", "SER1")), Some(false));
        index
            .set_checked(&NodeRef::image("/a/2.dcm"), false)
            .expect("image should exist");
        assert_eq!(index.is_checked(&NodeRef::series("P1", "S1", "SER1")), Some(false));
        assert!(index.all_checked(Level::Series).is_empty());
    }

    #[test]
    fn checking_every_image_propagates_to_subject() {
        let mut index = built(&three_images());
        for path in ["/a/1.dcm", "/a/2.dcm", "/a/3.dcm"] {
            index
                .set_checked(&NodeRef::image(path), true)
                .expect("image should exist");
        }
        assert_eq!(index.all_checked(Level::Series).len(), 2);
        assert_eq!(index.all_checked(Level::Study), vec![NodeRef::study("P1", "S1")]);
        assert_eq!(index.all_checked(Level::Subject), vec![NodeRef::subject("P1")]);
    }

    #[test]
    fn set_checked_on_unknown_node_is_not_found() {
        let mut index = built(&three_images());
        let err = index
            .set_checked(&NodeRef::series("P1", "S1", "nope"), true)
            .expect_err("unknown series should fail");
        assert!(err.is_not_found());
        assert!(index.set_expanded(&NodeRef::image("/a/1.dcm"), true).is_err());
    }

    #[test]
    fn removing_last_children_cascades_to_subject() {
        let mut index = built(&three_images());
        let removed = index.remove_image(Path::new("/a/3.dcm")).expect("image should be removed");
        assert_eq!(removed.series, "SER2");
        assert!(index.series("P1", "S1", "SER2").is_none());
        assert_eq!(
            index.series("P1", "S1", "SER1").map(|series| series.images.len()),
            Some(2)
        );

        index.remove_image(Path::new("/a/1.dcm"));
        index.remove_image(Path::new("/a/2.dcm"));
        assert!(index.study("P1", "S1").is_none());
        assert!(index.subject("P1").is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn removing_unchecked_image_can_check_series() {
        let mut index = built(&three_images());
        index
            .set_checked(&NodeRef::image("/a/1.dcm"), true)
            .expect("image should exist");
        index.remove_image(Path::new("/a/2.dcm"));
        assert_eq!(index.is_checked(&NodeRef::series("P1", "S1", "SER1")), Some(true));
    }

    #[test]
    fn removing_unknown_path_is_a_noop() {
        let mut index = built(&three_images());
        let before = index.clone();
        assert!(index.remove_image(Path::new("/missing.dcm")).is_none());
        assert_eq!(index, before);
    }

    #[test]
    fn parent_chain_lookup() {
        let index = built(&three_images());
        assert_eq!(
            index.find_parent_chain(Path::new("/a/3.dcm")),
            Some(ParentChain {
                subject: "P1".to_string(),
                study: "S1".to_string(),
                series: "SER2".to_string(),
            })
        );
        assert_eq!(index.find_parent_chain(Path::new("/nope.dcm")), None);
    }

    #[test]
    fn rename_keeps_flags_and_order() {
        let mut index = built(&three_images());
        index
            .set_checked(&NodeRef::series("P1", "S1", "SER2"), true)
            .expect("series should exist");
        index
            .rename_series("P1", "S1", "SER2", "SER0")
            .expect("rename should succeed");
        let study = index.study("P1", "S1").expect("study should exist");
        assert_eq!(study.series[1].id, "SER0");
        assert!(study.series[1].checked);

        index.rename_study("P1", "S1", "S9").expect("rename should succeed");
        index.rename_subject("P1", "P7").expect("rename should succeed");
        assert_eq!(
            index.find_parent_chain(Path::new("/a/1.dcm")).map(|chain| chain.series_ref()),
            Some(NodeRef::series("P7", "S9", "SER1"))
        );
    }

    #[test]
    fn rename_onto_existing_sibling_merges_children() {
        let mut index = built(&three_images());
        index
            .rename_series("P1", "S1", "SER2", "SER1")
            .expect("rename should succeed");
        let study = index.study("P1", "S1").expect("study should exist");
        assert_eq!(study.series.len(), 1);
        let paths = study.series[0]
            .images
            .iter()
            .map(|image| image.path.clone())
            .collect::<Vec<_>>();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/a/1.dcm"),
                PathBuf::from("/a/2.dcm"),
                PathBuf::from("/a/3.dcm")
            ]
        );
    }

    #[test]
    fn sort_reorders_only_one_series() {
        let mut index = built(&three_images());
        index
            .sort_series_images(&NodeRef::series("P1", "S1", "SER1"), |a, b| b.path.cmp(&a.path))
            .expect("series should exist");
        let descriptors = index.image_descriptors();
        let paths = descriptors
            .iter()
            .map(|entry| entry.path.to_string_lossy().to_string())
            .collect::<Vec<_>>();
        assert_eq!(paths, vec!["/a/2.dcm", "/a/1.dcm", "/a/3.dcm"]);
        assert!(index
            .sort_series_images(&NodeRef::study("P1", "S1"), |a, b| a.path.cmp(&b.path))
            .is_err());
    }

    #[test]
    fn move_image_keeps_flag_and_prunes_old_series() {
        let mut index = built(&three_images());
        index
            .set_checked(&NodeRef::image("/a/3.dcm"), true)
            .expect("image should exist");
        let target = ParentChain {
            subject: "P1".to_string(),
            study: "S1".to_string(),
            series: "SER1".to_string(),
        };
        assert!(index.move_image(Path::new("/a/3.dcm"), &target));
        assert!(index.series("P1", "S1", "SER2").is_none());
        let series = index.series("P1", "S1", "SER1").expect("series should exist");
        assert_eq!(series.images.len(), 3);
        assert!(series.images[2].checked);
        assert!(!series.checked);
        assert_eq!(index.image_count(), 3);
        assert!(!index.move_image(Path::new("/missing.dcm"), &target));
    }

    #[test]
    fn paths_under_each_level() {
        let index = built(&three_images());
        assert_eq!(
            index.paths_under(&NodeRef::subject("P1")).map(|paths| paths.len()),
            Some(3)
        );
        assert_eq!(
            index.paths_under(&NodeRef::series("P1", "S1", "SER2")),
            Some(vec![PathBuf::from("/a/3.dcm")])
        );
        assert_eq!(
            index.paths_under(&NodeRef::image("/a/1.dcm")),
            Some(vec![PathBuf::from("/a/1.dcm")])
        );
        assert_eq!(index.paths_under(&NodeRef::study("P1", "S2")), None);
    }

    #[test]
    fn from_subjects_rejects_repeated_paths_and_drops_empty_nodes() {
        let image = ImageNode {
            label: "1".to_string(),
            path: PathBuf::from("/a/1.dcm"),
            date: String::new(),
            time: String::new(),
            checked: false,
        };
        let series = |id: &str, images: Vec<ImageNode>| SeriesNode {
            id: id.to_string(),
            checked: false,
            expanded: false,
            images,
        };
        let subject = |series_list: Vec<SeriesNode>| SubjectNode {
            id: "P1".to_string(),
            checked: false,
            expanded: true,
            studies: vec![StudyNode {
                id: "S1".to_string(),
                checked: false,
                expanded: false,
                series: series_list,
            }],
        };

        let index = HierarchyIndex::from_subjects(vec![subject(vec![
            series("A", vec![image.clone()]),
            series("B", Vec::new()),
        ])])
        .expect("tree should be accepted");
        assert!(index.series("P1", "S1", "B").is_none());

        let repeated = HierarchyIndex::from_subjects(vec![subject(vec![
            series("A", vec![image.clone()]),
            series("B", vec![image]),
        ])]);
        assert_eq!(repeated, Err(PathBuf::from("/a/1.dcm")));
    }
}
