use std::fmt;
use std::path::{Path, PathBuf};
use std::{fs, io::Cursor};

use anyhow::{bail, Context};
use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::tags;
use dicom_object::mem::InMemElement;
use dicom_object::{from_reader, open_file, DefaultDicomObject, FileMetaTableBuilder, ReadError};

use crate::error::{Error, Result};
use crate::naming;

pub const PATIENT_ID: &str = "PatientID";
pub const STUDY_INSTANCE_UID: &str = "StudyInstanceUID";
pub const STUDY_DESCRIPTION: &str = "StudyDescription";
pub const STUDY_DATE: &str = "StudyDate";
pub const STUDY_TIME: &str = "StudyTime";
pub const SERIES_INSTANCE_UID: &str = "SeriesInstanceUID";
pub const SERIES_NUMBER: &str = "SeriesNumber";
pub const SERIES_DESCRIPTION: &str = "SeriesDescription";
pub const SOP_INSTANCE_UID: &str = "SOPInstanceUID";
pub const INSTANCE_NUMBER: &str = "InstanceNumber";
pub const ACQUISITION_DATE: &str = "AcquisitionDate";
pub const ACQUISITION_TIME: &str = "AcquisitionTime";
pub const SLICE_LOCATION: &str = "SliceLocation";
pub const ECHO_TIME: &str = "EchoTime";

/// Attributes [`TagAdapter::put_tags`] may create in a file that lacks them.
const CREATABLE: [(&str, Tag, VR); 14] = [
    (PATIENT_ID, tags::PATIENT_ID, VR::LO),
    (STUDY_INSTANCE_UID, tags::STUDY_INSTANCE_UID, VR::UI),
    (STUDY_DESCRIPTION, tags::STUDY_DESCRIPTION, VR::LO),
    (STUDY_DATE, tags::STUDY_DATE, VR::DA),
    (STUDY_TIME, tags::STUDY_TIME, VR::TM),
    (SERIES_INSTANCE_UID, tags::SERIES_INSTANCE_UID, VR::UI),
    (SERIES_NUMBER, tags::SERIES_NUMBER, VR::IS),
    (SERIES_DESCRIPTION, tags::SERIES_DESCRIPTION, VR::LO),
    (SOP_INSTANCE_UID, tags::SOP_INSTANCE_UID, VR::UI),
    (INSTANCE_NUMBER, tags::INSTANCE_NUMBER, VR::IS),
    (ACQUISITION_DATE, tags::ACQUISITION_DATE, VR::DA),
    (ACQUISITION_TIME, tags::ACQUISITION_TIME, VR::TM),
    (SLICE_LOCATION, tags::SLICE_LOCATION, VR::DS),
    (ECHO_TIME, tags::ECHO_TIME, VR::DS),
];

/// A DICOM attribute addressed either by dictionary keyword or by its
/// `(group, element)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TagKey {
    Keyword(String),
    Element(u16, u16),
}

impl TagKey {
    pub fn keyword(name: impl Into<String>) -> Self {
        Self::Keyword(name.into())
    }

    pub fn keyword_name(&self) -> Option<&str> {
        match self {
            Self::Keyword(name) => Some(name),
            Self::Element(..) => None,
        }
    }

    /// Parses `(0010,0020)`, `0010,0020` or `00100020` as an element pair and
    /// anything else as a keyword.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let compact = trimmed
            .trim_start_matches('(')
            .trim_end_matches(')')
            .replace(',', "");
        if compact.len() == 8 && compact.bytes().all(|b| b.is_ascii_hexdigit()) {
            if let (Ok(group), Ok(element)) = (
                u16::from_str_radix(&compact[..4], 16),
                u16::from_str_radix(&compact[4..], 16),
            ) {
                return Self::Element(group, element);
            }
        }
        Self::Keyword(trimmed.to_string())
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keyword(name) => f.write_str(name),
            Self::Element(group, element) => write!(f, "({group:04X},{element:04X})"),
        }
    }
}

impl From<&str> for TagKey {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

fn creatable_attribute(tag: &TagKey) -> Option<(Tag, VR)> {
    CREATABLE
        .iter()
        .find(|(keyword, element_tag, _)| match tag {
            TagKey::Keyword(name) => name == keyword,
            TagKey::Element(group, element) => *element_tag == Tag(*group, *element),
        })
        .map(|(_, element_tag, vr)| (*element_tag, *vr))
}

/// File-level access to DICOM images: existence, tag reads and writes,
/// duplication and deletion. Everything above this trait is pure in-memory
/// bookkeeping.
pub trait TagAdapter {
    fn exists(&self, path: &Path) -> bool;

    /// Fails with [`Error::TagNotFound`] when the file lacks the attribute.
    fn read_tag(&self, path: &Path, tag: &TagKey) -> Result<String>;

    /// Reads several tags at once; absent attributes come back as `None`.
    fn read_tags(&self, path: &Path, tags: &[TagKey]) -> Result<Vec<Option<String>>> {
        tags.iter()
            .map(|tag| match self.read_tag(path, tag) {
                Ok(value) => Ok(Some(value)),
                Err(Error::TagNotFound { .. }) => Ok(None),
                Err(err) => Err(err),
            })
            .collect()
    }

    /// Fails with [`Error::TagNotFound`] when the file lacks the attribute;
    /// attributes are never added implicitly.
    fn write_tag(&self, path: &Path, tag: &TagKey, value: &str) -> Result<()>;

    fn write_tags(&self, path: &Path, values: &[(TagKey, String)]) -> Result<()> {
        for (tag, value) in values {
            self.write_tag(path, tag, value)?;
        }
        Ok(())
    }

    /// Like [`TagAdapter::write_tags`], but a hierarchy or ordering attribute the file
    /// lacks is created with its dictionary VR. Other absent attributes still
    /// fail with [`Error::TagNotFound`]. Nothing is written on failure.
    fn put_tags(&self, path: &Path, values: &[(TagKey, String)]) -> Result<()>;

    /// Copies `src` next to itself with `suffix` appended to the file stem and
    /// gives the copy a fresh SOP Instance UID.
    fn duplicate_file(&self, src: &Path, suffix: &str) -> Result<PathBuf>;

    fn delete_file(&self, path: &Path) -> Result<()>;
}

/// [`TagAdapter`] over DICOM files on the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct DicomFileAdapter;

impl TagAdapter for DicomFileAdapter {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read_tag(&self, path: &Path, tag: &TagKey) -> Result<String> {
        let obj = open_dicom_object(path).map_err(|err| dicom_error(path, err))?;
        find_element(&obj, tag)
            .and_then(element_string)
            .ok_or_else(|| tag_not_found(path, tag))
    }

    fn read_tags(&self, path: &Path, tags: &[TagKey]) -> Result<Vec<Option<String>>> {
        let obj = open_dicom_object(path).map_err(|err| dicom_error(path, err))?;
        Ok(tags
            .iter()
            .map(|tag| find_element(&obj, tag).and_then(element_string))
            .collect())
    }

    fn write_tag(&self, path: &Path, tag: &TagKey, value: &str) -> Result<()> {
        self.write_tags(path, &[(tag.clone(), value.to_string())])
    }

    fn write_tags(&self, path: &Path, values: &[(TagKey, String)]) -> Result<()> {
        store_tags(path, values, false)
    }

    fn put_tags(&self, path: &Path, values: &[(TagKey, String)]) -> Result<()> {
        store_tags(path, values, true)
    }

    fn duplicate_file(&self, src: &Path, suffix: &str) -> Result<PathBuf> {
        let dest = unique_sibling_path(src, suffix, |candidate| candidate.exists());
        fs::copy(src, &dest)
            .with_context(|| format!("Could not copy {} to {}", src.display(), dest.display()))
            .map_err(|err| dicom_error(src, err))?;

        let uid = naming::new_uid();
        if let Err(err) = restamp_instance_uid(&dest, &uid) {
            let _ = fs::remove_file(&dest);
            return Err(dicom_error(&dest, err));
        }
        Ok(dest)
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)
            .with_context(|| format!("Could not delete {}", path.display()))
            .map_err(|err| dicom_error(path, err))
    }
}

/// `dir/stem<suffix>.ext`, with `_2`, `_3`, ... appended until `taken` says
/// the name is free.
pub fn unique_sibling_path(src: &Path, suffix: &str, taken: impl Fn(&Path) -> bool) -> PathBuf {
    let stem = src
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = src
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let parent = src.parent().unwrap_or_else(|| Path::new(""));

    let mut candidate = parent.join(format!("{stem}{suffix}{extension}"));
    let mut counter = 2;
    while taken(&candidate) {
        candidate = parent.join(format!("{stem}{suffix}_{counter}{extension}"));
        counter += 1;
    }
    candidate
}

fn store_tags(path: &Path, values: &[(TagKey, String)], create_missing: bool) -> Result<()> {
    let mut obj = open_dicom_object(path).map_err(|err| dicom_error(path, err))?;
    for (tag, value) in values {
        let (element_tag, vr) = match find_element(&obj, tag) {
            Some(element) => (element.header().tag, element.vr()),
            None if create_missing => {
                creatable_attribute(tag).ok_or_else(|| tag_not_found(path, tag))?
            }
            None => return Err(tag_not_found(path, tag)),
        };
        obj.put(DataElement::new(
            element_tag,
            vr,
            PrimitiveValue::from(value.clone()),
        ));
    }
    obj.write_to_file(path)
        .with_context(|| format!("Could not write {}", path.display()))
        .map_err(|err| dicom_error(path, err))?;
    log::debug!("Wrote {} tag(s) to {}", values.len(), path.display());
    Ok(())
}

/// Sets the SOP Instance UID of the data set and of the file meta group.
fn restamp_instance_uid(path: &Path, uid: &str) -> anyhow::Result<()> {
    let mut obj = open_dicom_object(path)?;
    obj.put(DataElement::new(
        tags::SOP_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(uid),
    ));
    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(obj.meta().transfer_syntax())
        .media_storage_sop_class_uid(obj.meta().media_storage_sop_class_uid())
        .media_storage_sop_instance_uid(uid);
    let obj = obj
        .into_inner()
        .with_meta(meta)
        .with_context(|| format!("Could not rebuild the file meta group of {}", path.display()))?;
    obj.write_to_file(path)
        .with_context(|| format!("Could not write {}", path.display()))
}

fn find_element<'a>(obj: &'a DefaultDicomObject, tag: &TagKey) -> Option<&'a InMemElement> {
    match tag {
        TagKey::Keyword(name) => obj.element_by_name(name).ok(),
        TagKey::Element(group, element) => obj.element(Tag(*group, *element)).ok(),
    }
}

fn element_string(element: &InMemElement) -> Option<String> {
    element
        .to_str()
        .ok()
        .map(|value| value.trim_end_matches('\0').trim().to_string())
}

fn tag_not_found(path: &Path, tag: &TagKey) -> Error {
    Error::TagNotFound {
        path: path.to_path_buf(),
        tag: tag.to_string(),
    }
}

fn dicom_error(path: &Path, err: anyhow::Error) -> Error {
    Error::Dicom {
        path: path.to_path_buf(),
        message: format!("{err:#}"),
    }
}

fn open_dicom_object(path: &Path) -> anyhow::Result<DefaultDicomObject> {
    match open_file(path) {
        Ok(obj) => Ok(obj),
        Err(err) => {
            if is_missing_meta_group_length_error(&err) {
                let bytes =
                    fs::read(path).with_context(|| format!("Could not read {}", path.display()))?;

                if let Some(repaired) = repair_missing_meta_group_length(&bytes) {
                    log::debug!(
                        "Repairing missing File Meta Information Group Length in {}",
                        path.display()
                    );
                    return from_reader(Cursor::new(repaired)).with_context(|| {
                        format!(
                            "Could not open {} after repairing missing File Meta Information Group Length (0002,0000)",
                            path.display()
                        )
                    });
                }
            }

            if !path.is_file() {
                bail!("{} does not exist", path.display());
            }
            Err(err).with_context(|| format!("Could not open {}", path.display()))
        }
    }
}

fn is_missing_meta_group_length_error(error: &ReadError) -> bool {
    matches!(
        error,
        ReadError::ParseMetaDataSet {
            source: dicom_object::meta::Error::UnexpectedTag { tag, .. }
        } if tag.group() == 0x0002 && tag.element() != 0x0000
    )
}

fn repair_missing_meta_group_length(bytes: &[u8]) -> Option<Vec<u8>> {
    let offset = detect_dicom_prefix_offset(bytes)?;
    if bytes.len() < offset + 4 {
        return None;
    }

    let first_group = u16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
    let first_element = u16::from_le_bytes([bytes[offset + 2], bytes[offset + 3]]);
    if first_group != 0x0002 || first_element == 0x0000 {
        return None;
    }

    let meta_group_len = scan_meta_group_len(bytes, offset)?;
    let meta_group_len = u32::try_from(meta_group_len).ok()?;

    let mut repaired = Vec::with_capacity(bytes.len() + 12);
    repaired.extend_from_slice(&bytes[..offset]);
    repaired.extend_from_slice(&group_length_element(meta_group_len));
    repaired.extend_from_slice(&bytes[offset..]);
    Some(repaired)
}

fn detect_dicom_prefix_offset(bytes: &[u8]) -> Option<usize> {
    if bytes.len() >= 132 && &bytes[128..132] == b"DICM" {
        return Some(132);
    }
    if bytes.len() >= 4 && &bytes[..4] == b"DICM" {
        return Some(4);
    }
    None
}

fn scan_meta_group_len(bytes: &[u8], start: usize) -> Option<usize> {
    let mut position = start;
    while position + 8 <= bytes.len() {
        let group = u16::from_le_bytes([bytes[position], bytes[position + 1]]);
        if group != 0x0002 {
            break;
        }

        let vr = [bytes[position + 4], bytes[position + 5]];
        let (header_len, value_len) = explicit_vr_element_length(bytes, position, vr)?;
        let next = position
            .checked_add(header_len)?
            .checked_add(value_len as usize)?;
        if next > bytes.len() {
            return None;
        }
        position = next;
    }

    (position > start).then(|| position - start)
}

fn explicit_vr_element_length(bytes: &[u8], position: usize, vr: [u8; 2]) -> Option<(usize, u32)> {
    let long_form = matches!(
        &vr,
        b"OB" | b"OD" | b"OF" | b"OL" | b"OW" | b"SQ" | b"UC" | b"UR" | b"UT" | b"UN"
    );

    if long_form {
        if position + 12 > bytes.len() {
            return None;
        }
        let value_len = u32::from_le_bytes([
            bytes[position + 8],
            bytes[position + 9],
            bytes[position + 10],
            bytes[position + 11],
        ]);
        (value_len != u32::MAX).then_some((12, value_len))
    } else {
        let value_len = u16::from_le_bytes([bytes[position + 6], bytes[position + 7]]) as u32;
        Some((8, value_len))
    }
}

fn group_length_element(group_len: u32) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[0..2].copy_from_slice(&0x0002u16.to_le_bytes());
    out[2..4].copy_from_slice(&0x0000u16.to_le_bytes());
    out[4..6].copy_from_slice(b"UL");
    out[6..8].copy_from_slice(&4u16.to_le_bytes());
    out[8..12].copy_from_slice(&group_len.to_le_bytes());
    out
}

#[cfg(test)]
pub(crate) use memory::MemoryAdapter;

/// Writes a small MR image file holding `values`.
#[cfg(test)]
pub(crate) fn write_dicom_file(path: &Path, values: &[(&str, &str)]) {
    use dicom_object::InMemDicomObject;

    let mut obj = InMemDicomObject::new_empty();
    for (keyword, value) in values {
        let (tag, vr) = creatable_attribute(&TagKey::keyword(*keyword))
            .unwrap_or_else(|| panic!("no test attribute for {keyword}"));
        obj.put(DataElement::new(tag, vr, PrimitiveValue::from(*value)));
    }
    let sop_uid = values
        .iter()
        .find(|(keyword, _)| *keyword == SOP_INSTANCE_UID)
        .map(|(_, uid)| uid.to_string())
        .unwrap_or_else(naming::new_uid);
    let file_obj = obj
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax("1.2.840.10008.1.2.1")
                .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.4")
                .media_storage_sop_instance_uid(sop_uid),
        )
        .expect("meta should build");
    file_obj.write_to_file(path).expect("test file should write");
}


#[cfg(test)]
mod tests {
    use super::*;

    fn write_sample(path: &Path, patient_id: &str, sop_uid: &str) {
        write_dicom_file(
            path,
            &[
                (SOP_INSTANCE_UID, sop_uid),
                (PATIENT_ID, patient_id),
                (SERIES_DESCRIPTION, "T1 map"),
            ],
        );
    }

    #[test]
    fn tag_key_parses_hex_pairs_and_keywords() {
        assert_eq!(TagKey::parse("(0010,0020)"), TagKey::Element(0x0010, 0x0020));
        assert_eq!(TagKey::parse("0008103e"), TagKey::Element(0x0008, 0x103E));
        assert_eq!(TagKey::parse(" PatientID "), TagKey::keyword("PatientID"));
        assert_eq!(TagKey::Element(0x0008, 0x103E).to_string(), "(0008,103E)");
    }

    #[test]
    fn unique_sibling_path_skips_taken_names() {
        let src = Path::new("/data/IM_1.dcm");
        let taken = [PathBuf::from("/data/IM_1_copy.dcm")];
        let dest = unique_sibling_path(src, "_copy", |candidate| taken.iter().any(|t| t == candidate));
        assert_eq!(dest, PathBuf::from("/data/IM_1_copy_2.dcm"));
    }

    #[test]
    fn file_adapter_reads_writes_and_duplicates() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("1.dcm");
        write_sample(&path, "P1", "1.2.3.4");
        let adapter = DicomFileAdapter;

        assert!(adapter.exists(&path));
        assert_eq!(
            adapter
                .read_tag(&path, &TagKey::keyword(PATIENT_ID))
                .expect("PatientID should read"),
            "P1"
        );
        assert_eq!(
            adapter
                .read_tag(&path, &TagKey::Element(0x0008, 0x103E))
                .expect("SeriesDescription should read"),
            "T1 map"
        );

        let missing = adapter.read_tag(&path, &TagKey::keyword(SLICE_LOCATION));
        assert!(matches!(missing, Err(Error::TagNotFound { .. })));
        let missing = adapter.write_tag(&path, &TagKey::keyword(SLICE_LOCATION), "1.0");
        assert!(matches!(missing, Err(Error::TagNotFound { .. })));

        adapter
            .write_tag(&path, &TagKey::keyword(PATIENT_ID), "P2")
            .expect("PatientID should write");
        assert_eq!(
            adapter
                .read_tag(&path, &TagKey::keyword(PATIENT_ID))
                .expect("PatientID should read back"),
            "P2"
        );

        let copy = adapter.duplicate_file(&path, "_copy").expect("copy should succeed");
        assert_eq!(copy, dir.path().join("1_copy.dcm"));
        let copy_uid = adapter
            .read_tag(&copy, &TagKey::keyword(SOP_INSTANCE_UID))
            .expect("copy UID should read");
        assert_ne!(copy_uid, "1.2.3.4");
        let copy_obj = open_file(&copy).expect("copy should open");
        assert_eq!(
            copy_obj
                .meta()
                .media_storage_sop_instance_uid()
                .trim_end_matches('\0'),
            copy_uid
        );
        assert_eq!(
            adapter
                .read_tag(&copy, &TagKey::keyword(PATIENT_ID))
                .expect("copy keeps PatientID"),
            "P2"
        );

        adapter.delete_file(&copy).expect("delete should succeed");
        assert!(!adapter.exists(&copy));
    }

    #[test]
    fn put_tags_creates_identifying_attributes_only() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("bare.dcm");
        write_dicom_file(&path, &[(SOP_INSTANCE_UID, "1.2.3.9"), (PATIENT_ID, "P1")]);
        let adapter = DicomFileAdapter;
        let series = vec![
            (TagKey::keyword(SERIES_NUMBER), "3".to_string()),
            (TagKey::Element(0x0008, 0x103E), "T2".to_string()),
        ];

        let strict = adapter.write_tags(&path, &series);
        assert!(matches!(strict, Err(Error::TagNotFound { .. })));
        adapter.put_tags(&path, &series).expect("series tags should be created");
        let read_back = [
            TagKey::keyword(SERIES_NUMBER),
            TagKey::keyword(SERIES_DESCRIPTION),
        ];
        assert_eq!(
            adapter.read_tags(&path, &read_back).expect("tags should read"),
            vec![Some("3".to_string()), Some("T2".to_string())]
        );

        let unknown = adapter.put_tags(
            &path,
            &[
                (TagKey::keyword(PATIENT_ID), "P9".to_string()),
                (TagKey::keyword("PatientComments"), "x".to_string()),
            ],
        );
        assert!(matches!(unknown, Err(Error::TagNotFound { .. })));
        assert_eq!(
            adapter
                .read_tag(&path, &TagKey::keyword(PATIENT_ID))
                .expect("PatientID should read"),
            "P1"
        );
    }

    #[test]
    fn file_without_meta_group_length_reads_and_is_rewritten_whole() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("legacy.dcm");
        write_sample(&path, "P1", "1.2.3.5");
        let mut bytes = fs::read(&path).expect("sample should read");
        assert_eq!(&bytes[132..136], &[0x02, 0x00, 0x00, 0x00]);
        bytes.drain(132..144);
        fs::write(&path, &bytes).expect("stripped sample should write");

        let adapter = DicomFileAdapter;
        assert_eq!(
            adapter
                .read_tag(&path, &TagKey::keyword(PATIENT_ID))
                .expect("repaired file should read"),
            "P1"
        );
        adapter
            .write_tag(&path, &TagKey::keyword(PATIENT_ID), "P2")
            .expect("repaired file should write");
        let rewritten = fs::read(&path).expect("rewritten file should read");
        assert_eq!(&rewritten[132..136], &[0x02, 0x00, 0x00, 0x00]);
        assert!(open_file(&path).is_ok());
    }

    #[test]
    fn repair_inserts_group_length_when_missing() {
        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(b"DICM");
        // (0002,0002) UI, length 4
        bytes.extend_from_slice(&[
            0x02, 0x00, 0x02, 0x00, b'U', b'I', 0x04, 0x00, b'A', b'B', b'C', b'D',
        ]);
        // (0002,0010) UI, length 20
        bytes.extend_from_slice(&[
            0x02, 0x00, 0x10, 0x00, b'U', b'I', 0x14, 0x00, b'T', b'R', b'A', b'N', b'S', b'F',
            b'E', b'R', b'-', b'S', b'Y', b'N', b'T', b'A', b'X', b'-', b'T', b'E', b'S', b'T',
        ]);
        bytes.extend_from_slice(&[0x08, 0x00, 0x16, 0x00, b'U', b'I', 0x02, 0x00, b'1', 0x00]);

        let repaired = repair_missing_meta_group_length(&bytes).expect("expected repaired bytes");

        let offset = 132;
        assert_eq!(&repaired[offset..offset + 4], &[0x02, 0x00, 0x00, 0x00]);
        assert_eq!(&repaired[offset + 4..offset + 6], b"UL");
        assert_eq!(&repaired[offset + 8..offset + 12], &40u32.to_le_bytes());
        assert_eq!(repaired.len(), bytes.len() + 12);
    }

    #[test]
    fn repair_is_noop_when_group_length_already_exists() {
        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(b"DICM");
        bytes.extend_from_slice(&[
            0x02, 0x00, 0x00, 0x00, b'U', b'L', 0x04, 0x00, 0x08, 0x00, 0x00, 0x00, 0x08, 0x00,
            0x16, 0x00, b'U', b'I', 0x02, 0x00, b'1', 0x00,
        ]);

        assert!(repair_missing_meta_group_length(&bytes).is_none());
    }
}
