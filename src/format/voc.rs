//! Pascal VOC format driver.
//!
//! Reads the common VOC layout: an `Annotations/` directory with one XML
//! file per image next to a `JPEGImages/` directory. Unparsable XML files
//! are skipped and counted, never fatal to the rest of the dataset.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};
use tracing::warn;
use walkdir::WalkDir;

use super::{Egestor, IngestOutcome, Ingestor};
use crate::error::LabelportError;
use crate::ir::{DetectionRecord, ImageDetection};
use crate::reconcile::builtin_aliases;

const ANNOTATIONS_DIR: &str = "Annotations";
const IMAGES_DIR: &str = "JPEGImages";

pub struct VocIngestor;

impl Ingestor for VocIngestor {
    fn validate(&self, source: &Path) -> Result<(), LabelportError> {
        for subdir in [ANNOTATIONS_DIR, IMAGES_DIR] {
            if !source.join(subdir).is_dir() {
                return Err(LabelportError::FormatValidation {
                    format: "voc",
                    path: source.to_path_buf(),
                    reason: format!("expected subdirectory '{subdir}'"),
                });
            }
        }
        Ok(())
    }

    fn ingest(&self, source: &Path) -> Result<IngestOutcome, LabelportError> {
        let annotations_dir = source.join(ANNOTATIONS_DIR);

        let mut xml_files: Vec<PathBuf> = WalkDir::new(&annotations_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.file_type().is_file()
                    && entry.path().extension().is_some_and(|ext| ext == "xml")
            })
            .map(|entry| entry.into_path())
            .collect();
        xml_files.sort();

        let mut records = Vec::with_capacity(xml_files.len());
        let mut skipped = 0usize;
        let mut next_detection_id: u64 = 0;

        for (idx, xml_path) in xml_files.iter().enumerate() {
            match parse_annotation_file(source, xml_path, idx as u64 + 1, &mut next_detection_id) {
                Ok(unit) => records.push(unit),
                Err(err) => {
                    warn!(path = %xml_path.display(), %err, "skipping unparsable VOC annotation");
                    skipped += 1;
                }
            }
        }

        Ok(IngestOutcome { records, skipped })
    }
}

fn parse_annotation_file(
    root: &Path,
    xml_path: &Path,
    image_id: u64,
    next_detection_id: &mut u64,
) -> Result<ImageDetection, LabelportError> {
    let xml = fs::read_to_string(xml_path)?;
    let doc = Document::parse(&xml).map_err(|err| LabelportError::VocXmlParse {
        path: xml_path.to_path_buf(),
        message: err.to_string(),
    })?;
    let annotation = doc.root_element();

    let parse_err = |message: String| LabelportError::VocXmlParse {
        path: xml_path.to_path_buf(),
        message,
    };

    let file_name = match child_text(annotation, "filename") {
        Some(name) => name.to_string(),
        None => {
            let stem = xml_path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| parse_err("missing <filename> and unusable file stem".into()))?;
            format!("{stem}.jpg")
        }
    };

    let size = child_element(annotation, "size")
        .ok_or_else(|| parse_err("missing <size> element".into()))?;
    let width: u32 = parse_child(size, "width").map_err(parse_err)?;
    let height: u32 = parse_child(size, "height").map_err(parse_err)?;

    let segmented = child_text(annotation, "segmented") == Some("1");
    let image_stem = Path::new(&file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&file_name)
        .to_string();

    let mut unit = ImageDetection::blank();
    unit.image.id = image_id;
    unit.image.path = root
        .join(IMAGES_DIR)
        .join(&file_name)
        .to_string_lossy()
        .into_owned();
    unit.image.segmented_path = segmented.then(|| {
        root.join("SegmentationClass")
            .join(format!("{image_stem}.png"))
            .to_string_lossy()
            .into_owned()
    });
    unit.image.width = width;
    unit.image.height = height;
    unit.image.file_name = file_name;

    for object in annotation.children().filter(|n| n.has_tag_name("object")) {
        let label = child_text(object, "name")
            .ok_or_else(|| parse_err("object without <name>".into()))?
            .to_string();
        let bndbox = child_element(object, "bndbox")
            .ok_or_else(|| parse_err(format!("object '{label}' without <bndbox>")))?;

        let mut det = DetectionRecord::blank();
        det.id = *next_detection_id;
        *next_detection_id += 1;
        det.image_id = image_id;
        det.label = label;
        det.left = parse_child(bndbox, "xmin").map_err(parse_err)?;
        det.top = parse_child(bndbox, "ymin").map_err(parse_err)?;
        det.right = parse_child(bndbox, "xmax").map_err(parse_err)?;
        det.bottom = parse_child(bndbox, "ymax").map_err(parse_err)?;
        det.is_bbox = true;
        unit.detections.push(det);
    }

    Ok(unit)
}

fn child_element<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(tag))
}

fn child_text<'a>(node: Node<'a, '_>, tag: &str) -> Option<&'a str> {
    child_element(node, tag).and_then(|n| n.text()).map(str::trim)
}

fn parse_child<T: std::str::FromStr>(node: Node<'_, '_>, tag: &str) -> Result<T, String> {
    let text = child_text(node, tag).ok_or_else(|| format!("missing <{tag}>"))?;
    text.parse()
        .map_err(|_| format!("invalid <{tag}> value '{text}'"))
}

pub struct VocEgestor;

impl Egestor for VocEgestor {
    fn expected_labels(&self) -> BTreeMap<String, Vec<String>> {
        builtin_aliases()
    }

    fn egest(&self, records: &[ImageDetection], dest: &Path) -> Result<PathBuf, LabelportError> {
        let annotations_dir = dest.join(ANNOTATIONS_DIR);
        fs::create_dir_all(&annotations_dir)?;
        fs::create_dir_all(dest.join(IMAGES_DIR))?;

        for unit in records {
            let stem = Path::new(&unit.image.file_name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&unit.image.file_name);
            let xml_path = annotations_dir.join(format!("{stem}.xml"));
            fs::write(&xml_path, render_annotation_xml(unit)).map_err(|source| {
                LabelportError::PayloadWrite {
                    path: xml_path.clone(),
                    source,
                }
            })?;
        }

        Ok(annotations_dir)
    }
}

fn render_annotation_xml(unit: &ImageDetection) -> String {
    let mut xml = String::new();
    let _ = writeln!(xml, "<annotation>");
    let _ = writeln!(xml, "  <folder>{IMAGES_DIR}</folder>");
    let _ = writeln!(xml, "  <filename>{}</filename>", unit.image.file_name);
    let _ = writeln!(xml, "  <size>");
    let _ = writeln!(xml, "    <width>{}</width>", unit.image.width);
    let _ = writeln!(xml, "    <height>{}</height>", unit.image.height);
    let _ = writeln!(xml, "    <depth>3</depth>");
    let _ = writeln!(xml, "  </size>");
    let _ = writeln!(
        xml,
        "  <segmented>{}</segmented>",
        u8::from(unit.image.segmented_path.is_some())
    );
    for det in &unit.detections {
        let _ = writeln!(xml, "  <object>");
        let _ = writeln!(xml, "    <name>{}</name>", det.label);
        let _ = writeln!(xml, "    <bndbox>");
        let _ = writeln!(xml, "      <xmin>{}</xmin>", det.left);
        let _ = writeln!(xml, "      <ymin>{}</ymin>", det.top);
        let _ = writeln!(xml, "      <xmax>{}</xmax>", det.right);
        let _ = writeln!(xml, "      <ymax>{}</ymax>", det.bottom);
        let _ = writeln!(xml, "    </bndbox>");
        let _ = writeln!(xml, "  </object>");
    }
    let _ = writeln!(xml, "</annotation>");
    xml
}
