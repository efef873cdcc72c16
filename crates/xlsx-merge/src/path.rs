//! OPC part-name helpers.

pub const WORKBOOK_PART: &str = "xl/workbook.xml";
pub const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

pub fn rels_for_part(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file_name)) => format!("{dir}/_rels/{file_name}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

pub fn resolve_target(source_part: &str, target: &str) -> String {
    // Some producers append a fragment to relationship targets; part names never carry one.
    let target = target.split('#').next().unwrap_or(target);
    if target.is_empty() {
        return normalize(source_part);
    }
    if let Some(target) = target.strip_prefix('/') {
        return normalize(target);
    }

    let base_dir = source_part.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    normalize(&format!("{base_dir}/{target}"))
}

/// Canonical in-package name: forward slashes, no leading separator.
pub fn normalize_part_name(name: &str) -> String {
    name.replace('\\', "/").trim_start_matches('/').to_string()
}

/// Absolute form used by `[Content_Types].xml` overrides.
pub fn content_type_part_name(part: &str) -> String {
    format!("/{}", normalize_part_name(part))
}

pub fn worksheet_part_name(number: u32) -> String {
    format!("xl/worksheets/sheet{number}.xml")
}

/// Target of a worksheet relationship as written in the workbook's relationship part.
pub fn worksheet_relationship_target(number: u32) -> String {
    format!("worksheets/sheet{number}.xml")
}

/// Numeric suffix of `xl/worksheets/sheet{N}.xml`.
pub fn sheet_number_from_part(part: &str) -> Option<u32> {
    let file_name = part.strip_prefix("xl/worksheets/")?;
    let digits = file_name.strip_prefix("sheet")?.strip_suffix(".xml")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn normalize(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rels_for_part_in_subdir() {
        assert_eq!(rels_for_part("xl/workbook.xml"), "xl/_rels/workbook.xml.rels");
        assert_eq!(
            rels_for_part("xl/worksheets/sheet3.xml"),
            "xl/worksheets/_rels/sheet3.xml.rels"
        );
    }

    #[test]
    fn resolve_target_relative_and_absolute() {
        assert_eq!(
            resolve_target("xl/workbook.xml", "worksheets/sheet1.xml"),
            "xl/worksheets/sheet1.xml"
        );
        assert_eq!(
            resolve_target("xl/workbook.xml", "/xl/worksheets/sheet2.xml"),
            "xl/worksheets/sheet2.xml"
        );
        assert_eq!(
            resolve_target("xl/worksheets/sheet1.xml", "./../worksheets/./sheet2.xml#frag"),
            "xl/worksheets/sheet2.xml"
        );
    }

    #[test]
    fn sheet_numbers_only_come_from_worksheet_parts() {
        assert_eq!(sheet_number_from_part("xl/worksheets/sheet12.xml"), Some(12));
        assert_eq!(sheet_number_from_part("xl/worksheets/sheet.xml"), None);
        assert_eq!(sheet_number_from_part("xl/worksheets/sheet1a.xml"), None);
        assert_eq!(sheet_number_from_part("xl/chartsheets/sheet1.xml"), None);
        assert_eq!(sheet_number_from_part("xl/worksheets/_rels/sheet1.xml.rels"), None);
    }

    #[test]
    fn content_type_names_are_absolute() {
        assert_eq!(content_type_part_name("xl/vbaProject.bin"), "/xl/vbaProject.bin");
        assert_eq!(content_type_part_name("/xl/workbook.xml"), "/xl/workbook.xml");
    }
}
