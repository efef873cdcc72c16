use std::io::Cursor;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::xml::{XmlDomError, XmlElement};

pub const REL_TYPE_WORKSHEET: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
pub const REL_TYPE_SHARED_STRINGS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings";
pub const REL_TYPE_STYLES: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles";
pub const REL_TYPE_VBA_PROJECT: &str =
    "http://schemas.microsoft.com/office/2006/relationships/vbaProject";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub type_uri: String,
    pub target: String,
    pub target_mode: Option<String>,
}

impl Relationship {
    pub fn is_external(&self) -> bool {
        self.target_mode
            .as_deref()
            .is_some_and(|mode| mode.trim().eq_ignore_ascii_case("External"))
    }

    pub fn is_worksheet(&self) -> bool {
        self.type_uri.ends_with("/worksheet")
    }

    fn from_element(el: &XmlElement) -> Option<Self> {
        Some(Self {
            id: el.attr("Id")?.to_string(),
            type_uri: el.attr("Type")?.to_string(),
            target: el.attr("Target")?.to_string(),
            target_mode: el.attr("TargetMode").map(str::to_string),
        })
    }
}

/// `rId{N}` -> `N`.
pub fn rel_id_number(id: &str) -> Option<u32> {
    id.strip_prefix("rId")?.parse().ok()
}

/// Streaming read of a `.rels` part, for parts that are only inspected.
pub fn parse_relationships(xml: &[u8]) -> Result<Vec<Relationship>, XmlDomError> {
    let mut reader = Reader::from_reader(Cursor::new(xml));
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut relationships = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(start) | Event::Empty(start) => {
                if local_name(start.name().as_ref()).eq_ignore_ascii_case(b"Relationship") {
                    let mut id = None;
                    let mut target = None;
                    let mut type_uri = None;
                    let mut target_mode = None;
                    for attr in start.attributes() {
                        let attr = attr?;
                        let key = local_name(attr.key.as_ref());
                        let value = attr.unescape_value()?.into_owned();
                        if key.eq_ignore_ascii_case(b"Id") {
                            id = Some(value);
                        } else if key.eq_ignore_ascii_case(b"Target") {
                            target = Some(value);
                        } else if key.eq_ignore_ascii_case(b"Type") {
                            type_uri = Some(value);
                        } else if key.eq_ignore_ascii_case(b"TargetMode") {
                            target_mode = Some(value);
                        }
                    }
                    if let (Some(id), Some(target), Some(type_uri)) = (id, target, type_uri) {
                        relationships.push(Relationship {
                            id,
                            target,
                            type_uri,
                            target_mode,
                        });
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(relationships)
}

pub(crate) fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|b| *b == b':') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}

/// Editable view over a `.rels` part that preserves entries it does not touch.
#[derive(Debug, Clone)]
pub struct RelationshipsPart {
    root: XmlElement,
}

impl RelationshipsPart {
    pub fn from_element(root: XmlElement) -> Self {
        Self { root }
    }

    pub fn element(&self) -> &XmlElement {
        &self.root
    }

    pub fn relationships(&self) -> Vec<Relationship> {
        self.root
            .children_by_local("Relationship")
            .filter_map(Relationship::from_element)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.root.children_by_local("Relationship").next().is_none()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.root
            .children_by_local("Relationship")
            .any(|el| el.attr("Id") == Some(id))
    }

    pub fn find(&self, mut pred: impl FnMut(&Relationship) -> bool) -> Option<Relationship> {
        self.relationships().into_iter().find(|rel| pred(rel))
    }

    /// Largest `N` among `rId{N}` ids, or 0.
    pub fn max_numeric_id(&self) -> u32 {
        self.root
            .children_by_local("Relationship")
            .filter_map(|el| el.attr("Id").and_then(rel_id_number))
            .max()
            .unwrap_or(0)
    }

    /// First `rId{k}` with `k > n` that no relationship uses.
    pub fn next_free_id_after(&self, n: u32) -> String {
        let mut k = n.saturating_add(1);
        loop {
            let candidate = format!("rId{k}");
            if !self.contains_id(&candidate) {
                return candidate;
            }
            k = k.saturating_add(1);
        }
    }

    pub fn rename_id(&mut self, old_id: &str, new_id: &str) -> bool {
        match self
            .root
            .children_by_local_mut("Relationship")
            .find(|el| el.attr("Id") == Some(old_id))
        {
            Some(el) => {
                el.set_attr("Id", new_id);
                true
            }
            None => false,
        }
    }

    pub fn push(&mut self, rel: &Relationship) {
        let mut el = self.root.sibling_name("Relationship");
        el.set_attr("Id", rel.id.clone());
        el.set_attr("Type", rel.type_uri.clone());
        el.set_attr("Target", rel.target.clone());
        if let Some(mode) = &rel.target_mode {
            el.set_attr("TargetMode", mode.clone());
        }
        self.root.push_child(el);
    }

    /// Keeps only relationships accepted by `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&Relationship) -> bool) {
        self.root.children.retain(|node| match node {
            crate::xml::XmlNode::Element(el) if el.name.local == "Relationship" => {
                Relationship::from_element(el).is_some_and(|rel| keep(&rel))
            }
            _ => true,
        });
    }
}
