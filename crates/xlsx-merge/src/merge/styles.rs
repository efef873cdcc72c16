use std::collections::HashMap;

use crate::context::MergeContext;
use crate::merge::content_types::{ensure_override, update_content_types, CT_STYLES};
use crate::merge::relationships::register_workbook_part;
use crate::merge::{parse_id, remap_attr, IdMap};
use crate::options::MergeOptions;
use crate::package::Package;
use crate::relationships::REL_TYPE_STYLES;
use crate::xml::{XmlElement, XmlNode};
use crate::MergeError;

pub const STYLES_PART: &str = "xl/styles.xml";

const DEFAULT_STYLES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <fonts count="1">
    <font>
      <sz val="11"/>
      <color theme="1"/>
      <name val="Calibri"/>
      <family val="2"/>
      <scheme val="minor"/>
    </font>
  </fonts>
  <fills count="2">
    <fill><patternFill patternType="none"/></fill>
    <fill><patternFill patternType="gray125"/></fill>
  </fills>
  <borders count="1">
    <border><left/><right/><top/><bottom/><diagonal/></border>
  </borders>
  <cellStyleXfs count="1">
    <xf numFmtId="0" fontId="0" fillId="0" borderId="0"/>
  </cellStyleXfs>
  <cellXfs count="1">
    <xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/>
  </cellXfs>
  <cellStyles count="1">
    <cellStyle name="Normal" xfId="0" builtinId="0"/>
  </cellStyles>
  <dxfs count="0"/>
  <tableStyles count="0" defaultTableStyle="TableStyleMedium9" defaultPivotStyle="PivotStyleLight16"/>
</styleSheet>
"#;

/// Donor index -> accumulator index for every style table touched by one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleMaps {
    pub num_fmts: IdMap,
    pub fonts: IdMap,
    pub fills: IdMap,
    pub borders: IdMap,
    pub cell_style_xfs: IdMap,
    pub cell_styles: IdMap,
    pub cell_xfs: IdMap,
    pub dxfs: IdMap,
}

/// Folds donor style tables into the accumulator's `xl/styles.xml`.
///
/// Leaf tables (fonts, fills, borders, dxfs) are deduplicated on the canonical form of each
/// record. Composite records (`xf`) have their references rewritten first and are then
/// deduplicated the same way, so a donor format identical to an existing one collapses onto it.
#[derive(Debug)]
pub struct StyleMerger {
    next_num_fmt_id: u32,
}

impl StyleMerger {
    pub fn new(options: &MergeOptions) -> Self {
        Self {
            next_num_fmt_id: options.first_custom_num_fmt_id,
        }
    }

    pub fn merge(&mut self, ctx: &mut MergeContext, donor: &Package) -> Result<StyleMaps, MergeError> {
        let Some(donor_root) = donor.read_xml_optional(STYLES_PART)? else {
            return Ok(StyleMaps::default());
        };

        let mut root = match ctx.accumulator().read_xml_optional(STYLES_PART)? {
            Some(root) => root,
            None => {
                log::debug!("creating {STYLES_PART} in the merged workbook");
                register_workbook_part(ctx, STYLES_PART, REL_TYPE_STYLES)?;
                update_content_types(ctx, |types| ensure_override(types, STYLES_PART, CT_STYLES))?;
                XmlElement::parse(DEFAULT_STYLES_XML.as_bytes()).map_err(|source| {
                    MergeError::MalformedPart {
                        package: ctx.accumulator().name().to_string(),
                        part: STYLES_PART.to_string(),
                        source,
                    }
                })?
            }
        };

        let num_fmts = self.merge_num_fmts(&mut root, &donor_root);
        let fonts = merge_records(&mut root, &donor_root, "fonts", "font", &IdMap::new(), |_| {});
        let fills = merge_records(&mut root, &donor_root, "fills", "fill", &IdMap::new(), |_| {});
        let borders =
            merge_records(&mut root, &donor_root, "borders", "border", &IdMap::new(), |_| {});

        let remap_refs = |xf: &mut XmlElement| {
            remap_attr(xf, "numFmtId", &num_fmts);
            remap_attr(xf, "fontId", &fonts);
            remap_attr(xf, "fillId", &fills);
            remap_attr(xf, "borderId", &borders);
        };

        let named = pair_named_styles(&root, &donor_root);
        let cell_style_xfs = merge_records(
            &mut root,
            &donor_root,
            "cellStyleXfs",
            "xf",
            &named.style_xfs,
            remap_refs,
        );
        let cell_styles = merge_cell_styles(&mut root, &donor_root, &named, &cell_style_xfs);
        let cell_xfs = merge_records(&mut root, &donor_root, "cellXfs", "xf", &IdMap::new(), |xf| {
            remap_refs(xf);
            remap_attr(xf, "xfId", &cell_style_xfs);
        });
        let dxfs = merge_records(&mut root, &donor_root, "dxfs", "dxf", &IdMap::new(), |_| {});

        ctx.accumulator_mut().write_xml(STYLES_PART, &root);
        log::debug!(
            "{}: styles merged ({} cell formats, {} differential formats)",
            donor.name(),
            cell_xfs.len(),
            dxfs.len()
        );

        Ok(StyleMaps {
            num_fmts,
            fonts,
            fills,
            borders,
            cell_style_xfs,
            cell_styles,
            cell_xfs,
            dxfs,
        })
    }

    /// Number formats are matched on `formatCode`; new codes get the next synthetic id.
    fn merge_num_fmts(&mut self, root: &mut XmlElement, donor_root: &XmlElement) -> IdMap {
        let mut map = IdMap::new();
        let Some(donor_list) = donor_root.child("numFmts") else {
            return map;
        };
        let (idx, mut list, existed) = take_styles_child(root, "numFmts");

        let mut by_code: HashMap<String, u32> = HashMap::new();
        for el in list.children_by_local("numFmt") {
            if let Some(id) = parse_id(el, "numFmtId") {
                by_code
                    .entry(el.attr("formatCode").unwrap_or_default().to_string())
                    .or_insert(id);
                self.next_num_fmt_id = self.next_num_fmt_id.max(id.saturating_add(1));
            }
        }

        for el in donor_list.children_by_local("numFmt") {
            let Some(donor_id) = parse_id(el, "numFmtId") else {
                continue;
            };
            let code = el.attr("formatCode").unwrap_or_default().to_string();
            let id = match by_code.get(&code) {
                Some(id) => *id,
                None => {
                    let id = self.next_num_fmt_id;
                    self.next_num_fmt_id += 1;
                    let mut record = el.clone();
                    record.set_attr("numFmtId", id.to_string());
                    list.push_child_before(record, "extLst");
                    by_code.insert(code, id);
                    id
                }
            };
            map.insert(donor_id, id);
        }

        let count = list.children_by_local("numFmt").count();
        list.set_attr("count", count.to_string());
        if existed || count > 0 {
            root.children.insert(idx, XmlNode::Element(list));
        }
        map
    }
}

#[derive(Debug, Default)]
struct NamedStylePairs {
    /// Donor `cellStyle` index -> accumulator `cellStyle` index, for names present on both sides.
    cell_styles: IdMap,
    /// Donor `cellStyleXfs` index -> accumulator index implied by those name matches.
    style_xfs: IdMap,
}

fn pair_named_styles(root: &XmlElement, donor_root: &XmlElement) -> NamedStylePairs {
    let mut pairs = NamedStylePairs::default();
    let Some(donor_list) = donor_root.child("cellStyles") else {
        return pairs;
    };

    let mut existing: HashMap<&str, (u32, Option<u32>)> = HashMap::new();
    if let Some(list) = root.child("cellStyles") {
        for (i, cs) in list.children_by_local("cellStyle").enumerate() {
            if let Some(name) = cs.attr("name") {
                existing
                    .entry(name)
                    .or_insert((i as u32, parse_id(cs, "xfId")));
            }
        }
    }

    for (i, cs) in donor_list.children_by_local("cellStyle").enumerate() {
        let Some((target, target_xf)) = cs.attr("name").and_then(|name| existing.get(name)) else {
            continue;
        };
        pairs.cell_styles.insert(i as u32, *target);
        if let (Some(donor_xf), Some(target_xf)) = (parse_id(cs, "xfId"), target_xf) {
            pairs.style_xfs.entry(donor_xf).or_insert(*target_xf);
        }
    }
    pairs
}

/// Named styles are matched by name; unmatched ones are appended with `xfId` rewritten.
fn merge_cell_styles(
    root: &mut XmlElement,
    donor_root: &XmlElement,
    named: &NamedStylePairs,
    cell_style_xfs: &IdMap,
) -> IdMap {
    let mut map = named.cell_styles.clone();
    let Some(donor_list) = donor_root.child("cellStyles") else {
        return map;
    };
    let (idx, mut list, existed) = take_styles_child(root, "cellStyles");

    let mut names: HashMap<String, u32> = HashMap::new();
    for (i, cs) in list.children_by_local("cellStyle").enumerate() {
        names
            .entry(cs.attr("name").unwrap_or_default().to_string())
            .or_insert(i as u32);
    }
    let mut len = list.children_by_local("cellStyle").count() as u32;

    for (i, cs) in donor_list.children_by_local("cellStyle").enumerate() {
        let donor_id = i as u32;
        if map.contains_key(&donor_id) {
            continue;
        }
        let name = cs.attr("name").unwrap_or_default().to_string();
        if let Some(id) = names.get(&name) {
            map.insert(donor_id, *id);
            continue;
        }
        let mut record = cs.clone();
        remap_attr(&mut record, "xfId", cell_style_xfs);
        list.push_child_before(record, "extLst");
        names.insert(name, len);
        map.insert(donor_id, len);
        len += 1;
    }

    list.set_attr("count", len.to_string());
    if existed || len > 0 {
        root.children.insert(idx, XmlNode::Element(list));
    }
    map
}

/// Appends donor records of one table, reusing any existing record with the same canonical form.
///
/// `paired` pre-assigns donor indices that were already resolved some other way; `rewrite` runs
/// on each remaining donor record before its signature is taken.
fn merge_records(
    root: &mut XmlElement,
    donor_root: &XmlElement,
    container: &str,
    item: &str,
    paired: &IdMap,
    mut rewrite: impl FnMut(&mut XmlElement),
) -> IdMap {
    let mut map = IdMap::new();
    let Some(donor_list) = donor_root.child(container) else {
        return map;
    };
    let (idx, mut list, existed) = take_styles_child(root, container);

    let mut index: HashMap<String, u32> = HashMap::new();
    for (i, el) in list.children_by_local(item).enumerate() {
        index.entry(el.canonical_signature()).or_insert(i as u32);
    }
    let mut len = list.children_by_local(item).count() as u32;

    for (i, el) in donor_list.children_by_local(item).enumerate() {
        let donor_id = i as u32;
        if let Some(target) = paired.get(&donor_id) {
            map.insert(donor_id, *target);
            continue;
        }
        let mut record = el.clone();
        rewrite(&mut record);
        let signature = record.canonical_signature();
        let id = match index.get(&signature) {
            Some(id) => *id,
            None => {
                let id = len;
                len += 1;
                index.insert(signature, id);
                list.push_child_before(record, "extLst");
                id
            }
        };
        map.insert(donor_id, id);
    }

    list.set_attr("count", len.to_string());
    if existed || len > 0 {
        root.children.insert(idx, XmlNode::Element(list));
    }
    map
}

/// Detaches the named `styleSheet` child (creating an empty one if absent) and returns the index
/// it must be reinserted at, plus whether it already existed.
fn take_styles_child(root: &mut XmlElement, local: &str) -> (usize, XmlElement, bool) {
    let existing = root
        .children
        .iter()
        .position(|child| matches!(child, XmlNode::Element(el) if el.name.local == local));
    if let Some(idx) = existing {
        if let XmlNode::Element(el) = root.children.remove(idx) {
            return (idx, el, true);
        }
    }
    let idx = insertion_index(root, local);
    (idx, root.sibling_name(local), false)
}

fn insertion_index(root: &XmlElement, local: &str) -> usize {
    let order = [
        "numFmts",
        "fonts",
        "fills",
        "borders",
        "cellStyleXfs",
        "cellXfs",
        "cellStyles",
        "dxfs",
        "tableStyles",
        "colors",
        "extLst",
    ];

    let Some(target_pos) = order.iter().position(|name| name == &local) else {
        return root.children.len();
    };

    for (idx, child) in root.children.iter().enumerate() {
        let XmlNode::Element(el) = child else {
            continue;
        };
        if let Some(pos) = order.iter().position(|name| name == &el.name.local) {
            if pos > target_pos {
                return idx;
            }
        }
    }

    root.children.len()
}
