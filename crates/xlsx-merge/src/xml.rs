//! Minimal owned XML tree used for every part the merge rewrites.
//!
//! Parsing goes through `roxmltree`; serialization is hand-written on top of
//! `quick_xml::escape` so that prefixes and namespace declarations survive a
//! read/modify/write cycle. Namespace declarations are kept as attributes in the
//! [`NS_XMLNS`] namespace (local name = prefix, empty for the default namespace).

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;

use quick_xml::escape::escape;
use thiserror::Error;

pub const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
pub const NS_OFFICE_RELATIONSHIPS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
pub const NS_XMLNS: &str = "http://www.w3.org/2000/xmlns/";
pub const NS_XML: &str = "http://www.w3.org/XML/1998/namespace";

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n";

#[derive(Debug, Error)]
pub enum XmlDomError {
    #[error("part is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("xml parse error: {0}")]
    Parse(#[from] roxmltree::Error),
    #[error("xml read error: {0}")]
    Read(#[from] quick_xml::Error),
    #[error("xml attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QName {
    pub ns: Option<String>,
    pub local: String,
}

impl QName {
    pub fn new(ns: Option<&str>, local: &str) -> Self {
        Self {
            ns: ns.map(str::to_string),
            local: local.to_string(),
        }
    }

    /// Unqualified attribute or element name.
    pub fn local(local: &str) -> Self {
        Self::new(None, local)
    }

    fn is_namespace_declaration(&self) -> bool {
        self.ns.as_deref() == Some(NS_XMLNS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: QName,
    pub attrs: BTreeMap<QName, String>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: QName) -> Self {
        Self {
            name,
            attrs: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// New element sharing this element's namespace, for appending as a child.
    pub fn sibling_name(&self, local: &str) -> Self {
        Self::new(QName::new(self.name.ns.as_deref(), local))
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, XmlDomError> {
        let text = std::str::from_utf8(bytes)?;
        let text = text.strip_prefix('\u{FEFF}').unwrap_or(text);
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..Default::default()
        };
        let doc = roxmltree::Document::parse_with_options(text, options)?;
        Ok(build_element(doc.root_element(), false))
    }

    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attrs.get(&QName::local(local)).map(String::as_str)
    }

    pub fn attr_ns(&self, ns: &str, local: &str) -> Option<&str> {
        self.attrs
            .get(&QName::new(Some(ns), local))
            .map(String::as_str)
    }

    pub fn set_attr(&mut self, local: &str, value: impl Into<String>) {
        self.attrs.insert(QName::local(local), value.into());
    }

    pub fn set_attr_ns(&mut self, ns: &str, local: &str, value: impl Into<String>) {
        self.attrs.insert(QName::new(Some(ns), local), value.into());
    }

    pub fn remove_attr(&mut self, local: &str) -> Option<String> {
        self.attrs.remove(&QName::local(local))
    }

    pub fn declare_namespace(&mut self, prefix: &str, uri: &str) {
        self.set_attr_ns(NS_XMLNS, prefix, uri);
    }

    pub fn element_children(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            XmlNode::Text(_) => None,
        })
    }

    pub fn element_children_mut(&mut self) -> impl Iterator<Item = &mut XmlElement> {
        self.children.iter_mut().filter_map(|node| match node {
            XmlNode::Element(el) => Some(el),
            XmlNode::Text(_) => None,
        })
    }

    pub fn children_by_local<'a>(
        &'a self,
        local: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.element_children()
            .filter(move |el| el.name.local == local)
    }

    pub fn children_by_local_mut<'a>(
        &'a mut self,
        local: &'a str,
    ) -> impl Iterator<Item = &'a mut XmlElement> + 'a {
        self.element_children_mut()
            .filter(move |el| el.name.local == local)
    }

    pub fn child(&self, local: &str) -> Option<&XmlElement> {
        self.element_children().find(|el| el.name.local == local)
    }

    pub fn child_mut(&mut self, local: &str) -> Option<&mut XmlElement> {
        self.element_children_mut().find(|el| el.name.local == local)
    }

    /// Concatenated text content of this element and its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children = vec![XmlNode::Text(text.into())];
    }

    pub fn push_child(&mut self, child: XmlElement) {
        self.children.push(XmlNode::Element(child));
    }

    /// Inserts `child` before the first child element named `before` (or at the end).
    pub fn push_child_before(&mut self, child: XmlElement, before: &str) {
        let idx = self
            .children
            .iter()
            .position(|node| matches!(node, XmlNode::Element(el) if el.name.local == before))
            .unwrap_or(self.children.len());
        self.children.insert(idx, XmlNode::Element(child));
    }

    /// Visits this element and every descendant element in document order.
    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut XmlElement)) {
        f(self);
        for child in self.element_children_mut() {
            child.walk_mut(f);
        }
    }

    /// Drops every descendant element for which `keep` returns false.
    pub fn retain_descendants(&mut self, keep: &mut impl FnMut(&XmlElement) -> bool) {
        self.children.retain(|node| match node {
            XmlNode::Element(el) => keep(el),
            XmlNode::Text(_) => true,
        });
        for child in self.element_children_mut() {
            child.retain_descendants(keep);
        }
    }

    /// Namespace-aware, attribute-order-independent signature used for deduplication.
    ///
    /// Namespace declarations and prefixes do not contribute; element and attribute names
    /// are expanded to `{uri}local`.
    pub fn canonical_signature(&self) -> String {
        let mut out = String::new();
        write_signature(self, &mut out);
        out
    }

    pub fn to_xml_string(&self) -> String {
        let mut out = String::from(XML_DECLARATION);
        let mut scope = Vec::new();
        write_element(self, &mut scope, &mut out);
        out
    }

    pub fn to_xml_bytes(&self) -> Vec<u8> {
        self.to_xml_string().into_bytes()
    }
}

fn build_element(node: roxmltree::Node<'_, '_>, preserve_space: bool) -> XmlElement {
    let tag = node.tag_name();
    let mut element = XmlElement::new(QName::new(non_empty(tag.namespace()), tag.name()));

    let inherited: Vec<(Option<&str>, &str)> = node
        .parent_element()
        .map(|parent| {
            parent
                .namespaces()
                .map(|ns| (ns.name(), ns.uri()))
                .collect()
        })
        .unwrap_or_default();
    for ns in node.namespaces() {
        if ns.uri() == NS_XML || inherited.contains(&(ns.name(), ns.uri())) {
            continue;
        }
        element.declare_namespace(ns.name().unwrap_or(""), ns.uri());
    }

    for attr in node.attributes() {
        element.attrs.insert(
            QName::new(non_empty(attr.namespace()), attr.name()),
            attr.value().to_string(),
        );
    }

    let preserve_space = match node.attribute((NS_XML, "space")) {
        Some("preserve") => true,
        Some("default") => false,
        _ => preserve_space,
    };
    let has_element_children = node.children().any(|child| child.is_element());

    for child in node.children() {
        if child.is_element() {
            element
                .children
                .push(XmlNode::Element(build_element(child, preserve_space)));
        } else if child.is_text() {
            let text = child.text().unwrap_or_default();
            if has_element_children && !preserve_space && text.trim().is_empty() {
                continue;
            }
            element.children.push(XmlNode::Text(text.to_string()));
        }
    }

    element
}

/// roxmltree reports names under an `xmlns=""` reset as `Some("")`.
fn non_empty(ns: Option<&str>) -> Option<&str> {
    ns.filter(|uri| !uri.is_empty())
}

fn collect_text(element: &XmlElement, out: &mut String) {
    for child in &element.children {
        match child {
            XmlNode::Text(text) => out.push_str(text),
            XmlNode::Element(el) => collect_text(el, out),
        }
    }
}

fn write_signature(element: &XmlElement, out: &mut String) {
    out.push('<');
    push_expanded(&element.name, out);
    for (name, value) in &element.attrs {
        if name.is_namespace_declaration() {
            continue;
        }
        out.push(' ');
        push_expanded(name, out);
        out.push_str("=\"");
        out.push_str(&escape(value));
        out.push('"');
    }
    out.push('>');
    for child in &element.children {
        match child {
            XmlNode::Element(el) => write_signature(el, out),
            XmlNode::Text(text) => out.push_str(&escape(text)),
        }
    }
    out.push_str("</>");
}

fn push_expanded(name: &QName, out: &mut String) {
    if let Some(ns) = &name.ns {
        out.push('{');
        out.push_str(ns);
        out.push('}');
    }
    out.push_str(&name.local);
}

/// `(prefix, uri)`; the empty prefix is the default namespace.
type Scope = Vec<(String, String)>;

fn lookup_prefix(scope: &Scope, uri: &str, allow_default: bool) -> Option<String> {
    let mut shadowed: HashSet<&str> = HashSet::new();
    for (prefix, bound) in scope.iter().rev() {
        if !shadowed.insert(prefix.as_str()) {
            continue;
        }
        if bound == uri && (allow_default || !prefix.is_empty()) {
            return Some(prefix.clone());
        }
    }
    None
}

fn default_namespace(scope: &Scope) -> &str {
    scope
        .iter()
        .rev()
        .find(|(prefix, _)| prefix.is_empty())
        .map(|(_, uri)| uri.as_str())
        .unwrap_or("")
}

fn fresh_prefix(scope: &Scope) -> String {
    let mut n = 0usize;
    loop {
        let candidate = format!("ns{n}");
        if !scope.iter().any(|(prefix, _)| *prefix == candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn qualified(prefix: &str, local: &str) -> String {
    if prefix.is_empty() {
        local.to_string()
    } else {
        format!("{prefix}:{local}")
    }
}

/// Attribute-value normalization turns raw tab, newline and carriage return into spaces.
fn escape_attr(value: &str) -> Cow<'_, str> {
    let escaped = escape(value);
    if !escaped.contains(['\t', '\n', '\r']) {
        return escaped;
    }
    Cow::Owned(
        escaped
            .replace('\t', "&#9;")
            .replace('\n', "&#10;")
            .replace('\r', "&#13;"),
    )
}

/// Line-end normalization would fold a raw `\r` into `\n`.
fn escape_text(text: &str) -> Cow<'_, str> {
    let escaped = escape(text);
    if escaped.contains('\r') {
        Cow::Owned(escaped.replace('\r', "&#13;"))
    } else {
        escaped
    }
}

fn write_element(element: &XmlElement, scope: &mut Scope, out: &mut String) {
    let mark = scope.len();
    let mut declarations: Vec<(String, String)> = Vec::new();
    for (name, uri) in &element.attrs {
        if name.is_namespace_declaration() {
            declarations.push((name.local.clone(), uri.clone()));
            scope.push((name.local.clone(), uri.clone()));
        }
    }

    let element_prefix = match element.name.ns.as_deref() {
        None => {
            if !default_namespace(scope).is_empty() {
                declarations.push((String::new(), String::new()));
                scope.push((String::new(), String::new()));
            }
            String::new()
        }
        Some(uri) => match lookup_prefix(scope, uri, true) {
            Some(prefix) => prefix,
            None => {
                let prefix = fresh_prefix(scope);
                declarations.push((prefix.clone(), uri.to_string()));
                scope.push((prefix.clone(), uri.to_string()));
                prefix
            }
        },
    };

    let mut attributes: Vec<(String, &str)> = Vec::new();
    for (name, value) in &element.attrs {
        if name.is_namespace_declaration() {
            continue;
        }
        let prefix = match name.ns.as_deref() {
            None => String::new(),
            Some(NS_XML) => "xml".to_string(),
            Some(uri) => match lookup_prefix(scope, uri, false) {
                Some(prefix) => prefix,
                None => {
                    let prefix = fresh_prefix(scope);
                    declarations.push((prefix.clone(), uri.to_string()));
                    scope.push((prefix.clone(), uri.to_string()));
                    prefix
                }
            },
        };
        attributes.push((qualified(&prefix, &name.local), value.as_str()));
    }

    let tag = qualified(&element_prefix, &element.name.local);
    out.push('<');
    out.push_str(&tag);
    for (prefix, uri) in &declarations {
        if prefix.is_empty() {
            let _ = write!(out, " xmlns=\"{}\"", escape(uri.as_str()));
        } else {
            let _ = write!(out, " xmlns:{prefix}=\"{}\"", escape(uri.as_str()));
        }
    }
    for (name, value) in &attributes {
        let _ = write!(out, " {name}=\"{}\"", escape_attr(value));
    }

    if element.children.is_empty() {
        out.push_str("/>");
    } else {
        out.push('>');
        for child in &element.children {
            match child {
                XmlNode::Element(el) => write_element(el, scope, out),
                XmlNode::Text(text) => out.push_str(&escape_text(text)),
            }
        }
        out.push_str("</");
        out.push_str(&tag);
        out.push('>');
    }

    scope.truncate(mark);
}
