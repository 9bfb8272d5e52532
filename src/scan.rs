use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::Config;
use crate::dicom::{self, TagAdapter, TagKey};
use crate::index::ImageDescriptor;
use crate::naming;

const SCAN_TAGS: [&str; 9] = [
    dicom::PATIENT_ID,
    dicom::STUDY_DESCRIPTION,
    dicom::STUDY_DATE,
    dicom::STUDY_TIME,
    dicom::SERIES_NUMBER,
    dicom::SERIES_DESCRIPTION,
    dicom::INSTANCE_NUMBER,
    dicom::ACQUISITION_DATE,
    dicom::ACQUISITION_TIME,
];

/// Candidate image files below `dir` in file-name order. Index files and
/// hidden entries are left out.
pub fn image_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::warn!("Skipping unreadable entry under {}: {err}", dir.display());
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            !path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
        })
        .collect()
}

/// Reads the identifying tags of every image below `dir`. Files the adapter
/// cannot read are skipped. Tags are read on up to
/// [`Config::workers_for`] threads; the result keeps file order.
pub fn descriptors_from_folder<A>(
    dir: &Path,
    adapter: &A,
    config: &Config,
    mut progress: impl FnMut(usize, usize),
) -> Vec<ImageDescriptor>
where
    A: TagAdapter + Sync + ?Sized,
{
    let files = image_files(dir);
    let total = files.len();
    if total == 0 {
        log::info!("No image files under {}", dir.display());
        return Vec::new();
    }

    let workers = config.workers_for(total);
    let chunk_size = total.div_ceil(workers);
    let tags = SCAN_TAGS.map(TagKey::keyword);
    let mut results: Vec<Option<ImageDescriptor>> = Vec::with_capacity(total);

    std::thread::scope(|scope| {
        let mut jobs = Vec::with_capacity(workers);
        for chunk in files.chunks(chunk_size) {
            let tags = &tags;
            jobs.push((
                chunk,
                scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|path| describe(adapter, path, tags))
                        .collect::<Vec<_>>()
                }),
            ));
        }

        for (chunk, job) in jobs {
            match job.join() {
                Ok(described) => results.extend(described),
                Err(_) => {
                    log::warn!("Scan worker panicked; skipping {} file(s)", chunk.len());
                    results.extend(chunk.iter().map(|_| None));
                }
            }
            progress(results.len(), total);
        }
    });

    let descriptors = results.into_iter().flatten().collect::<Vec<_>>();
    log::info!(
        "Scanned {} of {} file(s) under {} with {workers} worker(s)",
        descriptors.len(),
        total,
        dir.display()
    );
    descriptors
}

/// The entry a folder scan would produce for one file.
pub(crate) fn describe_file<A>(adapter: &A, path: &Path) -> Option<ImageDescriptor>
where
    A: TagAdapter + ?Sized,
{
    describe(adapter, path, &SCAN_TAGS.map(TagKey::keyword))
}

fn describe<A>(adapter: &A, path: &Path, tags: &[TagKey]) -> Option<ImageDescriptor>
where
    A: TagAdapter + ?Sized,
{
    let values = match adapter.read_tags(path, tags) {
        Ok(values) => values,
        Err(err) => {
            log::debug!("Not indexing {}: {err}", path.display());
            return None;
        }
    };
    let value = |index: usize| values.get(index).and_then(|value| value.as_deref());

    let study_date = value(2).unwrap_or_default();
    let study_time = value(3).unwrap_or_default();
    let series_number = value(4).and_then(|raw| raw.trim().parse::<i64>().ok());
    let instance_number = value(6).and_then(|raw| raw.trim().parse::<i64>().ok());
    let date = value(7).filter(|raw| !raw.is_empty()).unwrap_or(study_date);
    let time = value(8).filter(|raw| !raw.is_empty()).unwrap_or(study_time);

    Some(
        ImageDescriptor::new(
            naming::subject_id(value(0)),
            naming::study_id(value(1), study_date, study_time),
            naming::series_id(series_number, value(5)),
            path,
        )
        .with_label(naming::image_label(instance_number, path))
        .with_date_time(date, time),
    )
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}
