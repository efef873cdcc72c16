use serde::Serialize;

use crate::context::MergeContext;
use crate::merge::worksheet::ImportedSheet;
use crate::path::{
    resolve_target, worksheet_part_name, worksheet_relationship_target, WORKBOOK_PART,
    WORKBOOK_RELS_PART,
};
use crate::relationships::{Relationship, RelationshipsPart, REL_TYPE_WORKSHEET};
use crate::MergeError;

/// A non-worksheet relationship that had to give up its id to a new worksheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplacedRelationship {
    pub old_id: String,
    pub new_id: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipUpdate {
    /// Id under which the workbook references the imported worksheet.
    pub sheet_rel_id: String,
    pub displaced: Vec<DisplacedRelationship>,
}

/// Registers imported worksheets in `xl/_rels/workbook.xml.rels`.
///
/// A new sheet `N` asks for `rId{N}`. Worksheet relationships already present keep their ids; a
/// non-worksheet relationship sitting on `rId{N}` moves to the first free id above `N`.
#[derive(Debug, Default)]
pub struct RelationshipRegistrar;

impl RelationshipRegistrar {
    pub fn merge(
        &self,
        ctx: &mut MergeContext,
        sheet: &ImportedSheet,
    ) -> Result<RelationshipUpdate, MergeError> {
        let mut rels = RelationshipsPart::from_element(ctx.accumulator().read_xml(WORKBOOK_RELS_PART)?);
        let part = worksheet_part_name(sheet.number);

        if let Some(existing) = rels.find(|rel| {
            rel.is_worksheet() && resolve_target(WORKBOOK_PART, &rel.target) == part
        }) {
            return Ok(RelationshipUpdate {
                sheet_rel_id: existing.id,
                displaced: Vec::new(),
            });
        }

        let wanted = format!("rId{}", sheet.number);
        let holders: Vec<Relationship> = rels
            .relationships()
            .into_iter()
            .filter(|rel| rel.id == wanted)
            .collect();

        let mut displaced = Vec::new();
        let sheet_rel_id = if holders.is_empty() {
            wanted
        } else if holders.iter().any(Relationship::is_worksheet) {
            rels.next_free_id_after(sheet.number)
        } else {
            for holder in holders {
                let new_id = rels.next_free_id_after(sheet.number);
                rels.rename_id(&holder.id, &new_id);
                log::debug!(
                    "moved relationship {} ({}) to {new_id} to make room for sheet {}",
                    holder.id,
                    holder.target,
                    sheet.number
                );
                displaced.push(DisplacedRelationship {
                    old_id: holder.id,
                    new_id,
                    target: holder.target,
                });
            }
            wanted
        };

        rels.push(&Relationship {
            id: sheet_rel_id.clone(),
            type_uri: REL_TYPE_WORKSHEET.to_string(),
            target: worksheet_relationship_target(sheet.number),
            target_mode: None,
        });
        ctx.accumulator_mut()
            .write_xml(WORKBOOK_RELS_PART, rels.element());

        Ok(RelationshipUpdate {
            sheet_rel_id,
            displaced,
        })
    }
}

/// Adds a workbook-level relationship of `rel_type` pointing at `part` unless one already exists.
pub(crate) fn register_workbook_part(
    ctx: &mut MergeContext,
    part: &str,
    rel_type: &str,
) -> Result<(), MergeError> {
    let mut rels = RelationshipsPart::from_element(ctx.accumulator().read_xml(WORKBOOK_RELS_PART)?);
    if rels.find(|rel| rel.type_uri == rel_type).is_some() {
        return Ok(());
    }
    let id = format!("rId{}", rels.max_numeric_id() + 1);
    let target = part.strip_prefix("xl/").unwrap_or(part).to_string();
    rels.push(&Relationship {
        id,
        type_uri: rel_type.to_string(),
        target,
        target_mode: None,
    });
    ctx.accumulator_mut()
        .write_xml(WORKBOOK_RELS_PART, rels.element());
    Ok(())
}
