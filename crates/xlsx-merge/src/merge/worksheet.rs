use std::collections::HashSet;

use serde::Serialize;

use crate::context::MergeContext;
use crate::merge::workbook::parse_workbook_sheets;
use crate::merge::{remap_attr, IdMap};
use crate::package::Package;
use crate::path::{
    rels_for_part, resolve_target, sheet_number_from_part, worksheet_part_name, WORKBOOK_PART,
    WORKBOOK_RELS_PART,
};
use crate::relationships::{parse_relationships, Relationship, RelationshipsPart};
use crate::xml::{QName, XmlElement, XmlNode, NS_OFFICE_RELATIONSHIPS};
use crate::{MergeError, MergeWarning};

/// Excel rejects sheet names longer than this.
const MAX_SHEET_NAME_CHARS: usize = 31;

/// Containers that are invalid once the elements they held have been dropped.
const PRUNE_WHEN_EMPTY: &[&str] = &[
    "hyperlinks",
    "tableParts",
    "oleObjects",
    "controls",
    "AlternateContent",
    "Choice",
    "Fallback",
];

/// Elements with no meaning once the part they reference is gone.
const DROP_WITHOUT_TARGET: &[&str] = &[
    "drawing",
    "legacyDrawing",
    "legacyDrawingHF",
    "picture",
    "tablePart",
    "oleObject",
    "control",
];

/// A worksheet copied into the accumulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedSheet {
    /// `N` of the new `xl/worksheets/sheet{N}.xml`.
    pub number: u32,
    pub name: String,
    /// Part name inside the donor.
    pub source_part: String,
}

/// Index maps produced by the package-wide steps for one donor.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceMaps<'a> {
    pub strings: &'a IdMap,
    pub cell_formats: &'a IdMap,
    pub conditional_formats: &'a IdMap,
}

#[derive(Debug, Default)]
pub struct WorksheetMerger;

impl WorksheetMerger {
    /// Copies one donor worksheet under the next free sheet number, rewriting its shared-string,
    /// cell-format and conditional-format references. Returns `None` if `part` is absent.
    pub fn merge(
        &self,
        ctx: &mut MergeContext,
        donor: &Package,
        part: &str,
        maps: &ReferenceMaps<'_>,
    ) -> Result<Option<ImportedSheet>, MergeError> {
        let Some(mut sheet) = donor.read_xml_optional(part)? else {
            return Ok(None);
        };

        let number = next_sheet_number(ctx.accumulator())?;
        let target = worksheet_part_name(number);

        remap_references(&mut sheet, maps);
        let carried = carry_external_relationships(ctx, donor, part, &target)?;
        for rel_id in strip_dangling_references(&mut sheet, &carried) {
            ctx.warn(MergeWarning::DanglingSheetRelationship {
                package: donor.name().to_string(),
                part: part.to_string(),
                rel_id,
            });
        }
        ctx.accumulator_mut().write_xml(&target, &sheet);

        let declared = declared_sheet_name(donor, part)?;
        let name = if ctx.options().unique_sheet_names {
            let existing: Vec<String> = match ctx.accumulator().part(WORKBOOK_PART) {
                Some(bytes) => parse_workbook_sheets(bytes)
                    .map_err(|source| MergeError::MalformedPart {
                        package: ctx.accumulator().name().to_string(),
                        part: WORKBOOK_PART.to_string(),
                        source,
                    })?
                    .into_iter()
                    .map(|s| s.name)
                    .collect(),
                None => Vec::new(),
            };
            unique_sheet_name(&existing, &declared)
        } else {
            declared
        };

        Ok(Some(ImportedSheet {
            number,
            name,
            source_part: part.to_string(),
        }))
    }
}

/// One more than the largest `N` among the accumulator's `xl/worksheets/sheet{N}.xml` parts.
pub fn next_sheet_number(package: &Package) -> Result<u32, MergeError> {
    let max = package
        .list_parts("xl/worksheets/sheet*.xml")?
        .iter()
        .filter_map(|part| sheet_number_from_part(part))
        .max()
        .unwrap_or(0);
    Ok(max + 1)
}

fn remap_references(sheet: &mut XmlElement, maps: &ReferenceMaps<'_>) {
    sheet.walk_mut(&mut |el| match el.name.local.as_str() {
        "c" => {
            if el.attr("t") == Some("s") {
                if let Some(v) = el.child_mut("v") {
                    let mapped = v
                        .text()
                        .trim()
                        .parse::<u32>()
                        .ok()
                        .and_then(|old| maps.strings.get(&old));
                    if let Some(new) = mapped {
                        v.set_text(new.to_string());
                    }
                }
            }
            remap_attr(el, "s", maps.cell_formats);
        }
        "row" => remap_attr(el, "s", maps.cell_formats),
        "col" => remap_attr(el, "style", maps.cell_formats),
        "cfRule" => remap_attr(el, "dxfId", maps.conditional_formats),
        // Only the accumulator's own selection survives.
        "sheetView" => {
            el.remove_attr("tabSelected");
        }
        _ => {}
    });
}

/// Copies the donor sheet's external relationships (hyperlinks and the like) and returns their ids.
///
/// Internal targets (drawings, tables, comments, ...) are not carried since their parts are not.
fn carry_external_relationships(
    ctx: &mut MergeContext,
    donor: &Package,
    part: &str,
    target: &str,
) -> Result<HashSet<String>, MergeError> {
    let target_rels = rels_for_part(target);
    ctx.accumulator_mut().remove_part(&target_rels);

    let Some(root) = donor.read_xml_optional(&rels_for_part(part))? else {
        return Ok(HashSet::new());
    };
    let mut rels = RelationshipsPart::from_element(root);
    rels.retain(Relationship::is_external);
    let carried = rels.relationships().into_iter().map(|rel| rel.id).collect();
    if !rels.is_empty() {
        ctx.accumulator_mut().write_xml(&target_rels, rels.element());
    }
    Ok(carried)
}

/// Resolves relationship attributes that point at an id that was not carried.
///
/// Elements that only exist to point at another part are dropped. Everything else keeps its
/// content and loses just the dangling attribute (`pageSetup` without its printer settings).
fn strip_dangling_references(sheet: &mut XmlElement, carried: &HashSet<String>) -> Vec<String> {
    let is_dangling = |name: &QName, value: &str| {
        name.ns.as_deref() == Some(NS_OFFICE_RELATIONSHIPS) && !carried.contains(value)
    };

    let mut dropped = Vec::new();
    sheet.retain_descendants(&mut |el| {
        if !needs_target(el) {
            return true;
        }
        let dangling: Vec<String> = el
            .attrs
            .iter()
            .filter(|(name, value)| is_dangling(*name, value.as_str()))
            .map(|(_, value)| value.clone())
            .collect();
        let keep = dangling.is_empty();
        dropped.extend(dangling);
        keep
    });
    let removed_elements = !dropped.is_empty();

    sheet.walk_mut(&mut |el| {
        el.attrs.retain(|name, value| {
            if is_dangling(name, value.as_str()) {
                dropped.push(value.clone());
                false
            } else {
                true
            }
        });
    });

    if removed_elements {
        prune_empty_containers(sheet);
        sheet.walk_mut(&mut |el| {
            if el.name.local == "tableParts" {
                let count = el.children_by_local("tablePart").count();
                el.set_attr("count", count.to_string());
            }
        });
    }
    dropped
}

fn needs_target(el: &XmlElement) -> bool {
    let local = el.name.local.as_str();
    DROP_WITHOUT_TARGET.contains(&local)
        || (local == "hyperlink" && el.attr("location").is_none())
}

fn prune_empty_containers(el: &mut XmlElement) {
    for child in el.element_children_mut() {
        prune_empty_containers(child);
    }
    el.children.retain(|node| match node {
        XmlNode::Element(child) => {
            !(PRUNE_WHEN_EMPTY.contains(&child.name.local.as_str())
                && child.element_children().next().is_none())
        }
        XmlNode::Text(_) => true,
    });
}

/// Name the donor workbook gives the sheet stored in `part`.
///
/// Resolution order: the `<sheet>` whose `r:id` targets `part`, then the `<sheet>` whose
/// `sheetId` equals the part's number, then `"Worksheet {N}"`.
pub fn declared_sheet_name(package: &Package, part: &str) -> Result<String, MergeError> {
    let malformed = |part: &str, source| MergeError::MalformedPart {
        package: package.name().to_string(),
        part: part.to_string(),
        source,
    };
    let sheets = match package.part(WORKBOOK_PART) {
        Some(bytes) => parse_workbook_sheets(bytes).map_err(|e| malformed(WORKBOOK_PART, e))?,
        None => Vec::new(),
    };
    let rel_id = match package.part(WORKBOOK_RELS_PART) {
        Some(bytes) => parse_relationships(bytes)
            .map_err(|e| malformed(WORKBOOK_RELS_PART, e))?
            .into_iter()
            .find(|rel| rel.is_worksheet() && resolve_target(WORKBOOK_PART, &rel.target) == part)
            .map(|rel| rel.id),
        None => None,
    };

    if let Some(rel_id) = rel_id {
        if let Some(sheet) = sheets.iter().find(|s| s.rel_id.as_deref() == Some(rel_id.as_str())) {
            return Ok(sheet.name.clone());
        }
    }
    let number = sheet_number_from_part(part);
    if let Some(sheet) = number.and_then(|n| sheets.iter().find(|s| s.sheet_id == Some(n))) {
        return Ok(sheet.name.clone());
    }
    Ok(match number {
        Some(n) => format!("Worksheet {n}"),
        None => "Worksheet".to_string(),
    })
}

/// `name`, or `name (2)`, `name (3)`, ... whichever is free, compared case-insensitively and kept
/// within Excel's length limit.
pub fn unique_sheet_name(existing: &[String], name: &str) -> String {
    let taken: HashSet<String> = existing.iter().map(|n| n.to_lowercase()).collect();
    if !taken.contains(&name.to_lowercase()) {
        return name.to_string();
    }
    let mut n = 2u32;
    loop {
        let suffix = format!(" ({n})");
        let keep = MAX_SHEET_NAME_CHARS.saturating_sub(suffix.chars().count());
        let base: String = name.chars().take(keep).collect();
        let candidate = format!("{base}{suffix}");
        if !taken.contains(&candidate.to_lowercase()) {
            return candidate;
        }
        n += 1;
    }
}
