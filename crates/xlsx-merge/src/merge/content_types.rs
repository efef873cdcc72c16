use crate::context::MergeContext;
use crate::merge::worksheet::ImportedSheet;
use crate::package::{WorkbookKind, VBA_PROJECT_PART};
use crate::path::{content_type_part_name, worksheet_part_name, CONTENT_TYPES_PART, WORKBOOK_PART};
use crate::xml::{XmlElement, XmlNode};
use crate::MergeError;

pub const CT_WORKSHEET: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml";
pub const CT_SHARED_STRINGS: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml";
pub const CT_STYLES: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml";
pub const CT_VBA_PROJECT: &str = "application/vnd.ms-office.vbaProject";

/// Declares the media type of each imported worksheet part.
#[derive(Debug, Default)]
pub struct ContentTypeRegistrar;

impl ContentTypeRegistrar {
    pub fn merge(&self, ctx: &mut MergeContext, sheet: &ImportedSheet) -> Result<(), MergeError> {
        let part = worksheet_part_name(sheet.number);
        update_content_types(ctx, |types| ensure_override(types, &part, CT_WORKSHEET))
    }
}

/// Applies `edit` to `[Content_Types].xml`, writing the part back only when it reports a change.
pub(crate) fn update_content_types(
    ctx: &mut MergeContext,
    edit: impl FnOnce(&mut XmlElement) -> bool,
) -> Result<(), MergeError> {
    let mut types = ctx.accumulator().read_xml(CONTENT_TYPES_PART)?;
    if edit(&mut types) {
        ctx.accumulator_mut().write_xml(CONTENT_TYPES_PART, &types);
    }
    Ok(())
}

pub(crate) fn ensure_override(types: &mut XmlElement, part: &str, content_type: &str) -> bool {
    let part_name = content_type_part_name(part);
    if let Some(existing) = types
        .children_by_local_mut("Override")
        .find(|el| el.attr("PartName").is_some_and(|p| p.eq_ignore_ascii_case(&part_name)))
    {
        if existing.attr("ContentType") == Some(content_type) {
            return false;
        }
        existing.set_attr("ContentType", content_type);
        return true;
    }

    let mut el = types.sibling_name("Override");
    el.set_attr("PartName", part_name);
    el.set_attr("ContentType", content_type);
    types.push_child(el);
    true
}

/// Drops the overrides of parts that were removed from the package.
pub(crate) fn remove_overrides(types: &mut XmlElement, parts: &[String]) -> bool {
    let names: Vec<String> = parts.iter().map(|part| content_type_part_name(part)).collect();
    let before = types.children.len();
    types.children.retain(|node| match node {
        XmlNode::Element(el) if el.name.local == "Override" => !el
            .attr("PartName")
            .is_some_and(|p| names.iter().any(|name| p.eq_ignore_ascii_case(name))),
        _ => true,
    });
    types.children.len() != before
}

/// Switches the workbook to the macro-enabled main type and declares the VBA project media type.
pub(crate) fn ensure_macro_enabled(types: &mut XmlElement) -> bool {
    let mut changed = ensure_override(
        types,
        WORKBOOK_PART,
        WorkbookKind::MacroEnabledWorkbook.workbook_content_type(),
    );

    let bin_default = types
        .children_by_local("Default")
        .find(|el| el.attr("Extension").is_some_and(|ext| ext.eq_ignore_ascii_case("bin")))
        .map(|el| el.attr("ContentType").unwrap_or_default().to_string());
    match bin_default {
        Some(ct) if ct == CT_VBA_PROJECT => {}
        // `.bin` is already bound to something else (e.g. printer settings).
        Some(_) => changed |= ensure_override(types, VBA_PROJECT_PART, CT_VBA_PROJECT),
        None => {
            let mut el = types.sibling_name("Default");
            el.set_attr("Extension", "bin");
            el.set_attr("ContentType", CT_VBA_PROJECT);
            types.push_child_before(el, "Override");
            changed = true;
        }
    }
    changed
}
