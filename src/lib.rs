//! Subject → Study → Series → Image index over a folder of DICOM files,
//! persisted as an XML index file next to the images.

pub mod cli;
pub mod config;
pub mod dicom;
pub mod error;
pub mod index;
pub mod mutation;
pub mod naming;
pub mod query;
pub mod scan;
pub mod session;
pub mod xml;

pub use config::Config;
pub use dicom::{DicomFileAdapter, TagAdapter, TagKey};
pub use error::{Error, Result};
pub use index::{HierarchyIndex, ImageDescriptor, Level, NodeRef, ParentChain};
pub use mutation::{ChangeSet, Mutator, SeriesTarget, SortKey};
pub use query::{QueryEngine, SeriesDescriptor};
pub use session::Session;
