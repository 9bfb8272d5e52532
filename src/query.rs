use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::index::HierarchyIndex;

/// A checked series together with its image paths in stored order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesDescriptor {
    pub subject: String,
    pub study: String,
    pub series: String,
    pub image_paths: Vec<PathBuf>,
}

/// Read-only views over one snapshot of a [`HierarchyIndex`].
#[derive(Debug, Clone, Copy)]
pub struct QueryEngine<'a> {
    index: &'a HierarchyIndex,
}

impl HierarchyIndex {
    pub fn query(&self) -> QueryEngine<'_> {
        QueryEngine { index: self }
    }
}

impl<'a> QueryEngine<'a> {
    pub fn new(index: &'a HierarchyIndex) -> Self {
        Self { index }
    }

    /// Paths of images whose own flag is set; a checked series does not
    /// imply its images here.
    pub fn checked_image_paths(&self) -> Vec<PathBuf> {
        self.series_nodes()
            .flat_map(|(_, _, series)| series.images.iter())
            .filter(|image| image.checked)
            .map(|image| image.path.clone())
            .collect()
    }

    pub fn checked_series_descriptors(&self) -> Vec<SeriesDescriptor> {
        self.series_nodes()
            .filter(|(_, _, series)| series.checked)
            .map(|(subject, study, series)| SeriesDescriptor {
                subject: subject.to_string(),
                study: study.to_string(),
                series: series.id.clone(),
                image_paths: series.images.iter().map(|image| image.path.clone()).collect(),
            })
            .collect()
    }

    pub fn checked_study_ids(&self) -> Vec<(String, String)> {
        self.index
            .subjects()
            .iter()
            .flat_map(|subject| {
                subject
                    .studies
                    .iter()
                    .filter(|study| study.checked)
                    .map(move |study| (subject.id.clone(), study.id.clone()))
            })
            .collect()
    }

    pub fn image_paths_for_series(
        &self,
        subject: &str,
        study: &str,
        series: &str,
    ) -> Result<Vec<PathBuf>> {
        self.index
            .series(subject, study, series)
            .map(|node| node.images.iter().map(|image| image.path.clone()).collect())
            .ok_or_else(|| Error::not_found(format!("series '{subject}/{study}/{series}'")))
    }

    pub fn series_descriptor_for_image(&self, path: &Path) -> Result<SeriesDescriptor> {
        let chain = self
            .index
            .find_parent_chain(path)
            .ok_or_else(|| Error::not_found(format!("image '{}'", path.display())))?;
        let image_paths = self.image_paths_for_series(&chain.subject, &chain.study, &chain.series)?;
        Ok(SeriesDescriptor {
            subject: chain.subject,
            study: chain.study,
            series: chain.series,
            image_paths,
        })
    }

    pub fn all_image_paths(&self) -> Vec<PathBuf> {
        self.series_nodes()
            .flat_map(|(_, _, series)| series.images.iter())
            .map(|image| image.path.clone())
            .collect()
    }

    pub fn image_count(&self) -> usize {
        self.index.image_count()
    }

    pub fn is_any_image_checked(&self) -> bool {
        self.series_nodes()
            .any(|(_, _, series)| series.images.iter().any(|image| image.checked))
    }

    pub fn is_any_series_checked(&self) -> bool {
        self.series_nodes().any(|(_, _, series)| series.checked)
    }

    fn series_nodes(
        &self,
    ) -> impl Iterator<Item = (&'a str, &'a str, &'a crate::index::SeriesNode)> + 'a {
        self.index.subjects().iter().flat_map(|subject| {
            subject.studies.iter().flat_map(move |study| {
                study
                    .series
                    .iter()
                    .map(move |series| (subject.id.as_str(), study.id.as_str(), series))
            })
        })
    }
}
