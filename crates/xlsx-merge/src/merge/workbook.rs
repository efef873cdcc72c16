use std::collections::HashMap;
use std::io::Cursor;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::context::MergeContext;
use crate::merge::relationships::RelationshipUpdate;
use crate::merge::worksheet::ImportedSheet;
use crate::path::{resolve_target, WORKBOOK_PART, WORKBOOK_RELS_PART};
use crate::relationships::{local_name, parse_relationships};
use crate::xml::{XmlDomError, XmlElement, XmlNode, NS_OFFICE_RELATIONSHIPS};
use crate::MergeError;

/// Children of `<workbook>` that precede `<sheets>`.
const BEFORE_SHEETS: &[&str] = &[
    "fileVersion",
    "fileSharing",
    "workbookPr",
    "AlternateContent",
    "revisionPtr",
    "absPath",
    "workbookProtection",
    "bookViews",
];

/// A `<sheet>` entry of `xl/workbook.xml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkbookSheet {
    pub name: String,
    pub sheet_id: Option<u32>,
    pub rel_id: Option<String>,
}

pub fn parse_workbook_sheets(workbook_xml: &[u8]) -> Result<Vec<WorkbookSheet>, XmlDomError> {
    let mut reader = Reader::from_reader(Cursor::new(workbook_xml));
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut sheets = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Empty(e) | Event::Start(e) => {
                if e.local_name().as_ref() == b"sheet" {
                    sheets.push(parse_sheet_element(&e)?);
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(sheets)
}

fn parse_sheet_element(e: &BytesStart<'_>) -> Result<WorkbookSheet, XmlDomError> {
    let mut sheet = WorkbookSheet {
        name: String::new(),
        sheet_id: None,
        rel_id: None,
    };

    for attr in e.attributes() {
        let attr = attr?;
        let key = attr.key.as_ref();
        match key {
            b"name" => sheet.name = attr.unescape_value()?.into_owned(),
            b"sheetId" => sheet.sheet_id = attr.unescape_value()?.trim().parse().ok(),
            _ if key != b"id" && local_name(key) == b"id" => {
                sheet.rel_id = Some(attr.unescape_value()?.into_owned())
            }
            _ => {}
        }
    }

    Ok(sheet)
}

/// Adds each imported sheet to `xl/workbook.xml` and keeps the workbook's relationship ids valid.
#[derive(Debug, Default)]
pub struct WorkbookDefinitionUpdater;

impl WorkbookDefinitionUpdater {
    pub fn merge(
        &self,
        ctx: &mut MergeContext,
        sheet: &ImportedSheet,
        update: &RelationshipUpdate,
    ) -> Result<(), MergeError> {
        let mut root = ctx.accumulator().read_xml(WORKBOOK_PART)?;

        if !update.displaced.is_empty() {
            let rels = parse_relationships(
                ctx.accumulator()
                    .part(WORKBOOK_RELS_PART)
                    .unwrap_or_default(),
            )
            .map_err(|source| MergeError::MalformedPart {
                package: ctx.accumulator().name().to_string(),
                part: WORKBOOK_RELS_PART.to_string(),
                source,
            })?;
            repair_displaced_ids(&mut root, update, &rels);
        }

        let idx = ensure_sheets(&mut root);
        if let XmlNode::Element(sheets) = &mut root.children[idx] {
            let already_listed = sheets.children_by_local("sheet").any(|el| {
                el.attr_ns(NS_OFFICE_RELATIONSHIPS, "id") == Some(update.sheet_rel_id.as_str())
            });
            if !already_listed {
                let sheet_id = choose_sheet_id(sheets, sheet.number);
                let mut el = sheets.sibling_name("sheet");
                el.set_attr("name", sheet.name.clone());
                el.set_attr("sheetId", sheet_id.to_string());
                el.set_attr_ns(NS_OFFICE_RELATIONSHIPS, "id", update.sheet_rel_id.clone());
                sheets.push_child(el);
            }
        }

        if let Some(views) = root.child_mut("bookViews") {
            for view in views.children_by_local_mut("workbookView") {
                view.set_attr("activeTab", "0");
            }
        }

        if ctx.options().force_full_calc_on_load {
            set_full_calc_on_load(&mut root);
        }

        ctx.accumulator_mut().write_xml(WORKBOOK_PART, &root);
        Ok(())
    }
}

/// `number`, unless another sheet already uses it, in which case one past the largest `sheetId`.
fn choose_sheet_id(sheets: &XmlElement, number: u32) -> u32 {
    let ids: Vec<u32> = sheets
        .children_by_local("sheet")
        .filter_map(|el| el.attr("sheetId").and_then(|v| v.trim().parse().ok()))
        .collect();
    if ids.contains(&number) {
        ids.iter().max().copied().unwrap_or(0) + 1
    } else {
        number
    }
}

/// Points every workbook reference at a displaced relationship to that relationship's new id.
fn repair_displaced_ids(
    root: &mut XmlElement,
    update: &RelationshipUpdate,
    rels: &[crate::relationships::Relationship],
) {
    let id_by_target: HashMap<String, &str> = rels
        .iter()
        .map(|rel| (resolve_target(WORKBOOK_PART, &rel.target), rel.id.as_str()))
        .collect();
    let renames: HashMap<&str, &str> = update
        .displaced
        .iter()
        .map(|d| {
            let current = id_by_target
                .get(&resolve_target(WORKBOOK_PART, &d.target))
                .copied()
                .unwrap_or(d.new_id.as_str());
            (d.old_id.as_str(), current)
        })
        .collect();

    root.walk_mut(&mut |el| {
        // Sheets already point at worksheet relationships, which are never displaced.
        if el.name.local == "sheet" {
            return;
        }
        for (name, value) in el.attrs.iter_mut() {
            if name.ns.as_deref() != Some(NS_OFFICE_RELATIONSHIPS) {
                continue;
            }
            if let Some(new_id) = renames.get(value.as_str()) {
                log::debug!("workbook.xml: {} {} -> {new_id}", el.name.local, value);
                *value = (*new_id).to_string();
            }
        }
    });
}

/// Index of the `<sheets>` child, inserted after the elements that must precede it if missing.
fn ensure_sheets(root: &mut XmlElement) -> usize {
    if let Some(idx) = root
        .children
        .iter()
        .position(|node| matches!(node, XmlNode::Element(el) if el.name.local == "sheets"))
    {
        return idx;
    }
    let idx = root
        .children
        .iter()
        .rposition(|node| {
            matches!(node, XmlNode::Element(el) if BEFORE_SHEETS.contains(&el.name.local.as_str()))
        })
        .map(|i| i + 1)
        .unwrap_or(0);
    let sheets = root.sibling_name("sheets");
    root.children.insert(idx, XmlNode::Element(sheets));
    idx
}

fn set_full_calc_on_load(root: &mut XmlElement) {
    if let Some(calc_pr) = root.child_mut("calcPr") {
        calc_pr.set_attr("fullCalcOnLoad", "1");
        return;
    }
    let mut calc_pr = root.sibling_name("calcPr");
    calc_pr.set_attr("fullCalcOnLoad", "1");
    // calcPr sits after definedNames and before the trailing optional blocks.
    let before = [
        "oleSize",
        "customWorkbookViews",
        "pivotCaches",
        "smartTagPr",
        "smartTagTypes",
        "webPublishing",
        "fileRecoveryPr",
        "webPublishObjects",
        "extLst",
    ];
    let idx = root
        .children
        .iter()
        .position(|node| {
            matches!(node, XmlNode::Element(el) if before.contains(&el.name.local.as_str()))
        })
        .unwrap_or(root.children.len());
    root.children.insert(idx, XmlNode::Element(calc_pr));
}
