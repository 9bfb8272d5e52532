//! Persistence of a [`HierarchyIndex`] as an XML index file.
//!
//! Layout: a `DICOM` root holding `Subject` > `Study` > `Series` > `Image`
//! elements. Containers carry `id`, `checked` and `expanded` attributes; an
//! image carries `checked` and four child elements (`label`, `name`, `time`,
//! `date`) so file paths never need attribute escaping. Flags are the
//! literal strings `True` and `False`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::index::{HierarchyIndex, ImageNode, SeriesNode, StudyNode, SubjectNode};

const ROOT: &str = "DICOM";
const SUBJECT: &str = "Subject";
const STUDY: &str = "Study";
const SERIES: &str = "Series";
const IMAGE: &str = "Image";

pub fn load(path: &Path) -> Result<HierarchyIndex> {
    let text = fs::read_to_string(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => Error::not_found(format!("index file {}", path.display())),
        io::ErrorKind::InvalidData => Error::malformed(path, "index file is not valid UTF-8"),
        _ => Error::Persistence {
            path: path.to_path_buf(),
            source: err,
        },
    })?;
    let index = from_xml_str(&text, path)?;
    log::debug!(
        "Loaded index {} with {} image(s)",
        path.display(),
        index.image_count()
    );
    Ok(index)
}

/// Writes the index next to `path` and renames it into place, so a failed
/// save leaves the previous file intact.
pub fn save(index: &HierarchyIndex, path: &Path) -> Result<()> {
    let persistence = |source: io::Error| Error::Persistence {
        path: path.to_path_buf(),
        source,
    };
    let bytes = render(index).map_err(persistence)?;

    let mut tmp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, &bytes).map_err(persistence)?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(persistence(err));
    }
    log::debug!(
        "Saved index {} with {} image(s)",
        path.display(),
        index.image_count()
    );
    Ok(())
}

/// First `.xml` file under `dir`, in file-name order, whose name contains
/// `token`.
pub fn locate(dir: &Path, token: &str) -> Option<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| {
            let path = entry.path();
            let is_xml = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"));
            is_xml && entry.file_name().to_string_lossy().contains(token)
        })
        .map(|entry| entry.into_path())
}

pub fn to_xml_string(index: &HierarchyIndex) -> io::Result<String> {
    render(index).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

/// Parses index-file text; `origin` only labels errors.
pub fn from_xml_str(text: &str, origin: &Path) -> Result<HierarchyIndex> {
    let root = parse_document(text).map_err(|reason| Error::malformed(origin, reason))?;
    if root.name != ROOT {
        return Err(Error::malformed(
            origin,
            format!("root element is <{}>, expected <{ROOT}>", root.name),
        ));
    }

    let subjects = root
        .children
        .iter()
        .map(subject_from_element)
        .collect::<std::result::Result<Vec<_>, String>>()
        .map_err(|reason| Error::malformed(origin, reason))?;

    HierarchyIndex::from_subjects(subjects).map_err(|path| {
        Error::malformed(
            origin,
            format!("image path {} appears more than once", path.display()),
        )
    })
}

fn render(index: &HierarchyIndex) -> io::Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)),
    )?;
    emit(&mut writer, Event::Start(BytesStart::new(ROOT)))?;

    for subject in index.subjects() {
        emit(
            &mut writer,
            container_start(SUBJECT, &subject.id, subject.checked, subject.expanded),
        )?;
        for study in &subject.studies {
            emit(
                &mut writer,
                container_start(STUDY, &study.id, study.checked, study.expanded),
            )?;
            for series in &study.series {
                emit(
                    &mut writer,
                    container_start(SERIES, &series.id, series.checked, series.expanded),
                )?;
                for image in &series.images {
                    write_image(&mut writer, image)?;
                }
                emit(&mut writer, Event::End(BytesEnd::new(SERIES)))?;
            }
            emit(&mut writer, Event::End(BytesEnd::new(STUDY)))?;
        }
        emit(&mut writer, Event::End(BytesEnd::new(SUBJECT)))?;
    }

    emit(&mut writer, Event::End(BytesEnd::new(ROOT)))?;
    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    Ok(bytes)
}

fn container_start<'a>(name: &'a str, id: &'a str, checked: bool, expanded: bool) -> Event<'a> {
    Event::Start(BytesStart::new(name).with_attributes([
        ("id", id),
        ("checked", flag_text(checked)),
        ("expanded", flag_text(expanded)),
    ]))
}

fn write_image(writer: &mut Writer<Vec<u8>>, image: &ImageNode) -> io::Result<()> {
    emit(
        writer,
        Event::Start(BytesStart::new(IMAGE).with_attributes([("checked", flag_text(image.checked))])),
    )?;
    let path = image.path.to_string_lossy();
    for (field, value) in [
        ("label", image.label.as_str()),
        ("name", path.as_ref()),
        ("time", image.time.as_str()),
        ("date", image.date.as_str()),
    ] {
        if value.is_empty() {
            emit(writer, Event::Empty(BytesStart::new(field)))?;
            continue;
        }
        emit(writer, Event::Start(BytesStart::new(field)))?;
        emit(writer, Event::Text(BytesText::new(value)))?;
        emit(writer, Event::End(BytesEnd::new(field)))?;
    }
    emit(writer, Event::End(BytesEnd::new(IMAGE)))
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> io::Result<()> {
    writer
        .write_event(event)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))
}

fn flag_text(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.attribute(key)
            .map_or(default, |value| value.trim().eq_ignore_ascii_case("true"))
    }

    fn id(&self) -> std::result::Result<String, String> {
        self.attribute("id")
            .map(str::to_string)
            .ok_or_else(|| format!("<{}> element is missing its id attribute", self.name))
    }

    fn expect_children(&self, child: &str) -> std::result::Result<&[Element], String> {
        if let Some(unexpected) = self.children.iter().find(|element| element.name != child) {
            return Err(format!(
                "<{}> found inside <{}>, expected <{child}>",
                unexpected.name, self.name
            ));
        }
        Ok(&self.children)
    }
}

fn subject_from_element(element: &Element) -> std::result::Result<SubjectNode, String> {
    expect_name(element, SUBJECT, ROOT)?;
    Ok(SubjectNode {
        id: element.id()?,
        checked: element.flag("checked", false),
        // A subject row is always shown open unless the file says otherwise.
        expanded: element.flag("expanded", true),
        studies: element
            .expect_children(STUDY)?
            .iter()
            .map(study_from_element)
            .collect::<std::result::Result<_, _>>()?,
    })
}

fn study_from_element(element: &Element) -> std::result::Result<StudyNode, String> {
    Ok(StudyNode {
        id: element.id()?,
        checked: element.flag("checked", false),
        expanded: element.flag("expanded", false),
        series: element
            .expect_children(SERIES)?
            .iter()
            .map(series_from_element)
            .collect::<std::result::Result<_, _>>()?,
    })
}

fn series_from_element(element: &Element) -> std::result::Result<SeriesNode, String> {
    Ok(SeriesNode {
        id: element.id()?,
        checked: element.flag("checked", false),
        expanded: element.flag("expanded", false),
        images: element
            .expect_children(IMAGE)?
            .iter()
            .map(image_from_element)
            .collect::<std::result::Result<_, _>>()?,
    })
}

fn image_from_element(element: &Element) -> std::result::Result<ImageNode, String> {
    let mut image = ImageNode {
        label: String::new(),
        path: PathBuf::new(),
        date: String::new(),
        time: String::new(),
        checked: element.flag("checked", false),
    };
    let mut has_name = false;
    for field in &element.children {
        if !field.children.is_empty() {
            return Err(format!("<{}> inside <{IMAGE}> must hold text only", field.name));
        }
        let value = field.text.trim().to_string();
        match field.name.as_str() {
            "label" => image.label = value,
            // File names may start or end with spaces.
            "name" => {
                has_name = !value.is_empty();
                image.path = PathBuf::from(&field.text);
            }
            "time" => image.time = value,
            "date" => image.date = value,
            other => return Err(format!("unexpected <{other}> inside <{IMAGE}>")),
        }
    }
    if !has_name {
        return Err(format!("<{IMAGE}> element is missing its <name> file path"));
    }
    Ok(image)
}

fn expect_name(element: &Element, expected: &str, parent: &str) -> std::result::Result<(), String> {
    if element.name == expected {
        Ok(())
    } else {
        Err(format!(
            "<{}> found inside <{parent}>, expected <{expected}>",
            element.name
        ))
    }
}

fn parse_document(text: &str) -> std::result::Result<Element, String> {
    let mut reader = Reader::from_str(text);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|err| format!("XML error at byte {}: {err}", reader.buffer_position()))?;
        match event {
            Event::Start(start) => stack.push(element_from_start(&start)?),
            Event::Empty(start) => {
                let element = element_from_start(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| "closing tag without an open element".to_string())?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(text) => {
                let value = text
                    .unescape()
                    .map_err(|err| format!("invalid text content: {err}"))?;
                push_text(&mut stack, &value)?;
            }
            Event::CData(data) => {
                let raw = data.into_inner();
                push_text(&mut stack, &String::from_utf8_lossy(&raw))?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(format!("<{}> is never closed", open.name));
    }
    root.ok_or_else(|| "document has no root element".to_string())
}

fn element_from_start(start: &BytesStart<'_>) -> std::result::Result<Element, String> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|err| format!("bad attribute on <{name}>: {err}"))?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|err| format!("bad attribute value on <{name}>: {err}"))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        ..Element::default()
    })
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> std::result::Result<(), String> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_some() => {
            return Err(format!("second root element <{}>", element.name));
        }
        None => *root = Some(element),
    }
    Ok(())
}

fn push_text(stack: &mut [Element], value: &str) -> std::result::Result<(), String> {
    match stack.last_mut() {
        Some(element) => {
            element.text.push_str(value);
            Ok(())
        }
        None if value.trim().is_empty() => Ok(()),
        None => Err("text outside the root element".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{ImageDescriptor, Level, NodeRef};

    fn sample_index() -> HierarchyIndex {
        let mut index = HierarchyIndex::new();
        index.rebuild_from_flat_list(&[
            ImageDescriptor::new("P1", "Brain_20240101_101500", "1_T1", "/a/1.dcm")
                .with_label("000001")
                .with_date_time("20240101", "101512"),
            ImageDescriptor::new("P1", "Brain_20240101_101500", "1_T1", "/a/2.dcm")
                .with_label("000002"),
            ImageDescriptor::new("P1", "Brain_20240101_101500", "2_T2 & <fast>", "/a/b&c/3.dcm"),
            ImageDescriptor::new("P2", "Knee__", "1", "/k/1.dcm"),
        ]);
        index
    }

    #[test]
    fn save_then_load_reproduces_the_tree() {
        let mut index = sample_index();
        index
            .set_checked(&NodeRef::series("P1", "Brain_20240101_101500", "1_T1"), true)
            .expect("series should exist");
        index
            .set_expanded(&NodeRef::study("P2", "Knee__"), true)
            .expect("study should exist");
        index
            .set_expanded(&NodeRef::subject("P2"), false)
            .expect("subject should exist");

        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("session_studytree.xml");
        save(&index, &path).expect("save should succeed");
        let loaded = load(&path).expect("load should succeed");

        assert_eq!(loaded, index);
        assert_eq!(loaded.image_descriptors(), index.image_descriptors());
        assert_eq!(loaded.all_checked(Level::Image), index.all_checked(Level::Image));
        assert!(!dir.path().join("session_studytree.xml.tmp").exists());
    }

    #[test]
    fn image_path_keeps_surrounding_spaces() {
        let mut index = HierarchyIndex::new();
        index.rebuild_from_flat_list(&[ImageDescriptor::new(
            "P1",
            "Brain__",
            "1",
            "/a/ scan 1.dcm ",
        )]);
        let text = to_xml_string(&index).expect("render should succeed");
        assert!(text.contains("<name>/a/ scan 1.dcm </name>"));

        let loaded = from_xml_str(&text, Path::new("spaces.xml")).expect("parse should succeed");
        assert!(loaded.contains_path(Path::new("/a/ scan 1.dcm ")));
        assert_eq!(loaded, index);
    }

    #[test]
    fn image_fields_are_child_elements() {
        let text = to_xml_string(&sample_index()).expect("render should succeed");
        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(text.contains("<Subject id=\"P1\" checked=\"False\" expanded=\"True\">"));
        assert!(text.contains("<name>/a/b&amp;c/3.dcm</name>"));
        assert!(text.contains("id=\"2_T2 &amp; &lt;fast&gt;\""));
        assert!(text.contains("<date>20240101</date>"));
        assert!(!text.contains("name=\""));
    }

    #[test]
    fn missing_flags_default_to_false() {
        let text = r#"<DICOM>
            <Subject id="P1">
              <Study id="S1">
                <Series id="SER1">
                  <Image><label>1</label><name>/a/1.dcm</name></Image>
                </Series>
              </Study>
            </Subject>
          </DICOM>"#;
        let index = from_xml_str(text, Path::new("inline.xml")).expect("should parse");
        let subject = index.subject("P1").expect("subject should exist");
        assert!(!subject.checked);
        assert!(subject.expanded);
        assert!(!subject.studies[0].expanded);
        assert!(!subject.studies[0].series[0].checked);
        let image = index.image(Path::new("/a/1.dcm")).expect("image should exist");
        assert_eq!(image.label, "1");
        assert!(image.date.is_empty());
    }

    #[test]
    fn wrong_root_is_malformed() {
        let err = from_xml_str("<Index></Index>", Path::new("x.xml")).expect_err("should fail");
        assert!(matches!(err, Error::MalformedIndex { .. }));
        assert!(err.to_string().contains("expected <DICOM>"));
    }

    #[test]
    fn bad_nesting_is_malformed() {
        let text = r#"<DICOM><Subject id="P1"><Series id="S"/></Subject></DICOM>"#;
        let err = from_xml_str(text, Path::new("x.xml")).expect_err("should fail");
        assert!(err.to_string().contains("<Series> found inside <Subject>"));

        let text = r#"<DICOM><Subject id="P1"><Study id="S1">"#;
        assert!(matches!(
            from_xml_str(text, Path::new("x.xml")),
            Err(Error::MalformedIndex { .. })
        ));

        let text = r#"<DICOM><Subject id="P1"><Study id="S1"><Series id="A">
            <Image checked="True"><label>1</label></Image>
            </Series></Study></Subject></DICOM>"#;
        let err = from_xml_str(text, Path::new("x.xml")).expect_err("should fail");
        assert!(err.to_string().contains("missing its <name>"));
    }

    #[test]
    fn repeated_path_is_malformed() {
        let text = r#"<DICOM><Subject id="P1"><Study id="S1">
            <Series id="A"><Image><name>/a/1.dcm</name></Image></Series>
            <Series id="B"><Image><name>/a/1.dcm</name></Image></Series>
            </Study></Subject></DICOM>"#;
        let err = from_xml_str(text, Path::new("x.xml")).expect_err("should fail");
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().expect("temp dir");
        let err = load(&dir.path().join("none.xml")).expect_err("should fail");
        assert!(err.is_not_found());
    }

    #[test]
    fn save_into_missing_directory_is_persistence_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("missing").join("index.xml");
        let err = save(&sample_index(), &path).expect_err("should fail");
        assert!(matches!(err, Error::Persistence { .. }));
    }

    #[test]
    fn locate_finds_token_match_recursively() {
        let dir = tempfile::tempdir().expect("temp dir");
        let nested = dir.path().join("b_nested");
        fs::create_dir_all(&nested).expect("create nested dir");
        fs::write(dir.path().join("a_notes.xml"), "<x/>").expect("write file");
        fs::write(nested.join("scan_studytree.xml"), "<DICOM/>").expect("write file");
        fs::write(nested.join("scan_studytree.txt"), "").expect("write file");

        assert_eq!(
            locate(dir.path(), "_studytree"),
            Some(nested.join("scan_studytree.xml"))
        );
        assert_eq!(locate(dir.path(), "_weasel"), None);
    }
}
