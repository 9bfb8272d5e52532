//! A working folder together with its index file.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::dicom::TagAdapter;
use crate::error::{Error, Result};
use crate::index::HierarchyIndex;
use crate::mutation::Mutator;
use crate::{scan, xml};

pub struct Session<A> {
    folder: PathBuf,
    index_path: PathBuf,
    index: HierarchyIndex,
    adapter: A,
    config: Config,
}

impl<A: TagAdapter + Sync> Session<A> {
    /// Loads the folder's index file, or rebuilds the tree from a scan of the
    /// folder when there is none or it cannot be parsed. A rebuilt tree is
    /// saved straight away.
    pub fn open(folder: impl Into<PathBuf>, adapter: A, config: Config) -> Result<Self> {
        let folder = folder.into();
        let located = xml::locate(&folder, &config.index_token);
        let index_path = located
            .clone()
            .unwrap_or_else(|| default_index_path(&folder, &config.index_token));

        let loaded = match &located {
            Some(path) => match xml::load(path) {
                Ok(index) => Some(index),
                Err(err @ (Error::MalformedIndex { .. } | Error::NotFound(_))) => {
                    log::warn!("{err}; rebuilding from a folder scan");
                    None
                }
                Err(err) => return Err(err),
            },
            None => None,
        };

        let needs_scan = loaded.is_none();
        let mut session = Self {
            folder,
            index_path,
            index: loaded.unwrap_or_default(),
            adapter,
            config,
        };
        if needs_scan {
            session.refresh(|_, _| {});
            session.save()?;
        }
        log::info!(
            "Opened {} with {} image(s) (index {})",
            session.folder.display(),
            session.index.image_count(),
            session.index_path.display()
        );
        Ok(session)
    }

    /// Rescans the folder and rebuilds the tree, keeping the flags of every
    /// node that survives. Does not save.
    pub fn refresh(&mut self, progress: impl FnMut(usize, usize)) {
        let descriptors =
            scan::descriptors_from_folder(&self.folder, &self.adapter, &self.config, progress);
        self.index.rebuild_from_flat_list(&descriptors);
    }
}

impl<A: TagAdapter> Session<A> {
    pub fn save(&self) -> Result<()> {
        xml::save(&self.index, &self.index_path)
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn index(&self) -> &HierarchyIndex {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut HierarchyIndex {
        &mut self.index
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mutator(&mut self) -> Mutator<'_, A> {
        Mutator::new(&mut self.index, &self.adapter)
    }
}

/// `<folder>/<folder name><token>.xml`.
pub fn default_index_path(folder: &Path, token: &str) -> PathBuf {
    let name = folder
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "index".to_string());
    folder.join(format!("{name}{token}.xml"))
}
