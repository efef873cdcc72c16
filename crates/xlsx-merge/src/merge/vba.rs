use crate::context::MergeContext;
use crate::merge::content_types::{ensure_macro_enabled, remove_overrides, update_content_types};
use crate::package::{Package, VBA_PROJECT_PART};
use crate::path::{rels_for_part, resolve_target, WORKBOOK_PART, WORKBOOK_RELS_PART};
use crate::relationships::{
    parse_relationships, Relationship, RelationshipsPart, REL_TYPE_VBA_PROJECT,
};
use crate::MergeError;

/// Carries a donor's `xl/vbaProject.bin` into the merged workbook.
///
/// The last donor with a macro project wins. Once a project is present the workbook is declared
/// macro-enabled and gets exactly one `vbaProject` relationship.
#[derive(Debug, Default)]
pub struct VbaProjectMerger;

impl VbaProjectMerger {
    /// Returns whether the donor contributed a macro project.
    pub fn merge(&self, ctx: &mut MergeContext, donor: &Package) -> Result<bool, MergeError> {
        let Some(project) = donor.vba_project_bin() else {
            return Ok(false);
        };
        if ctx.accumulator().vba_project_bin().is_some() {
            log::info!(
                "replacing the macro project of the merged workbook with the one from {}",
                donor.name()
            );
            drop_project_signatures(ctx)?;
        }
        ctx.accumulator_mut()
            .set_part(VBA_PROJECT_PART, project.to_vec());

        ensure_vba_relationship(ctx)?;
        update_content_types(ctx, ensure_macro_enabled)?;
        Ok(true)
    }
}

/// Removes `xl/_rels/vbaProject.bin.rels` and the signature parts it points at; they sign the
/// project being replaced.
fn drop_project_signatures(ctx: &mut MergeContext) -> Result<(), MergeError> {
    let rels_part = rels_for_part(VBA_PROJECT_PART);
    let Some(bytes) = ctx.accumulator_mut().remove_part(&rels_part) else {
        return Ok(());
    };
    let rels = parse_relationships(&bytes).map_err(|source| MergeError::MalformedPart {
        package: ctx.accumulator().name().to_string(),
        part: rels_part.clone(),
        source,
    })?;

    let removed: Vec<String> = rels
        .iter()
        .filter(|rel| !rel.is_external())
        .map(|rel| resolve_target(VBA_PROJECT_PART, &rel.target))
        .collect();
    for part in &removed {
        if ctx.accumulator_mut().remove_part(part).is_some() {
            log::debug!("dropped macro signature {part}");
        }
    }
    update_content_types(ctx, |types| remove_overrides(types, &removed))
}

fn ensure_vba_relationship(ctx: &mut MergeContext) -> Result<(), MergeError> {
    let mut rels = RelationshipsPart::from_element(ctx.accumulator().read_xml(WORKBOOK_RELS_PART)?);
    let present = rels.find(|rel| {
        rel.type_uri == REL_TYPE_VBA_PROJECT
            || resolve_target(WORKBOOK_PART, &rel.target) == VBA_PROJECT_PART
    });
    if present.is_some() {
        return Ok(());
    }

    let id = format!("rId{}", rels.max_numeric_id() + 1);
    rels.push(&Relationship {
        id,
        type_uri: REL_TYPE_VBA_PROJECT.to_string(),
        target: "vbaProject.bin".to_string(),
        target_mode: None,
    });
    ctx.accumulator_mut()
        .write_xml(WORKBOOK_RELS_PART, rels.element());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::options::MergeOptions;
    use crate::package::WorkbookKind;
    use crate::path::CONTENT_TYPES_PART;
    use crate::relationships::parse_relationships;

    fn package(name: &str, vba: Option<&[u8]>) -> Package {
        let mut parts = BTreeMap::new();
        parts.insert(
            CONTENT_TYPES_PART.to_string(),
            br#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/></Types>"#.to_vec(),
        );
        parts.insert(
            WORKBOOK_RELS_PART.to_string(),
            br#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#.to_vec(),
        );
        if let Some(vba) = vba {
            parts.insert(VBA_PROJECT_PART.to_string(), vba.to_vec());
        }
        Package::from_parts(name, parts)
    }

    #[test]
    fn donor_macro_project_makes_the_workbook_macro_enabled() {
        let mut ctx = MergeContext::new(package("a.xlsx", None), MergeOptions::default());
        let donor = package("b.xlsm", Some(b"vba-1"));

        assert!(VbaProjectMerger.merge(&mut ctx, &donor).unwrap());
        assert_eq!(ctx.accumulator().kind(), WorkbookKind::MacroEnabledWorkbook);

        let rels = parse_relationships(ctx.accumulator().part(WORKBOOK_RELS_PART).unwrap()).unwrap();
        let vba: Vec<&Relationship> = rels
            .iter()
            .filter(|r| r.type_uri == REL_TYPE_VBA_PROJECT)
            .collect();
        assert_eq!(vba.len(), 1);
        assert_eq!(vba[0].id, "rId2");

        let types =
            String::from_utf8(ctx.accumulator().part(CONTENT_TYPES_PART).unwrap().to_vec()).unwrap();
        assert!(types.contains("application/vnd.ms-excel.sheet.macroEnabled.main+xml"));
        assert!(types.contains("application/vnd.ms-office.vbaProject"));
    }

    #[test]
    fn last_macro_project_wins_without_duplicate_entries() {
        let mut ctx = MergeContext::new(package("a.xlsx", None), MergeOptions::default());
        VbaProjectMerger
            .merge(&mut ctx, &package("b.xlsm", Some(b"vba-1")))
            .unwrap();
        VbaProjectMerger
            .merge(&mut ctx, &package("c.xlsm", Some(b"vba-2")))
            .unwrap();

        assert_eq!(ctx.accumulator().vba_project_bin(), Some(&b"vba-2"[..]));
        let rels = parse_relationships(ctx.accumulator().part(WORKBOOK_RELS_PART).unwrap()).unwrap();
        assert_eq!(
            rels.iter()
                .filter(|r| r.type_uri == REL_TYPE_VBA_PROJECT)
                .count(),
            1
        );
        let types =
            String::from_utf8(ctx.accumulator().part(CONTENT_TYPES_PART).unwrap().to_vec()).unwrap();
        assert_eq!(types.matches("application/vnd.ms-office.vbaProject").count(), 1);
    }

    #[test]
    fn replaced_project_loses_its_signature() {
        let mut base = package("a.xlsm", Some(b"vba-1"));
        base.set_part(
            "xl/_rels/vbaProject.bin.rels",
            br#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.microsoft.com/office/2006/relationships/vbaProjectSignature" Target="vbaProjectSignature.bin"/></Relationships>"#.to_vec(),
        );
        base.set_part("xl/vbaProjectSignature.bin", b"sig-1".to_vec());
        base.set_part(
            CONTENT_TYPES_PART,
            br#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="bin" ContentType="application/vnd.ms-office.vbaProject"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.ms-excel.sheet.macroEnabled.main+xml"/><Override PartName="/xl/vbaProjectSignature.bin" ContentType="application/vnd.ms-office.vbaProjectSignature"/></Types>"#.to_vec(),
        );
        let mut ctx = MergeContext::new(base, MergeOptions::default());

        VbaProjectMerger
            .merge(&mut ctx, &package("b.xlsm", Some(b"vba-2")))
            .unwrap();

        let merged = ctx.accumulator();
        assert_eq!(merged.vba_project_bin(), Some(&b"vba-2"[..]));
        assert!(!merged.contains_part("xl/_rels/vbaProject.bin.rels"));
        assert!(!merged.contains_part("xl/vbaProjectSignature.bin"));
        let types = String::from_utf8(merged.part(CONTENT_TYPES_PART).unwrap().to_vec()).unwrap();
        assert!(!types.contains("vbaProjectSignature"), "{types}");
        assert_eq!(merged.kind(), WorkbookKind::MacroEnabledWorkbook);
    }

    #[test]
    fn donor_without_macros_changes_nothing() {
        let mut ctx = MergeContext::new(package("a.xlsx", None), MergeOptions::default());
        let before = ctx.accumulator().part(CONTENT_TYPES_PART).unwrap().to_vec();
        assert!(!VbaProjectMerger
            .merge(&mut ctx, &package("b.xlsx", None))
            .unwrap());
        assert_eq!(ctx.accumulator().part(CONTENT_TYPES_PART).unwrap(), &before[..]);
        assert_eq!(ctx.accumulator().kind(), WorkbookKind::Workbook);
    }
}
