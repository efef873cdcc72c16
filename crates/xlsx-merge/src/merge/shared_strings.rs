use std::collections::HashMap;

use crate::context::MergeContext;
use crate::merge::content_types::{ensure_override, update_content_types, CT_SHARED_STRINGS};
use crate::merge::relationships::register_workbook_part;
use crate::merge::IdMap;
use crate::package::Package;
use crate::relationships::REL_TYPE_SHARED_STRINGS;
use crate::xml::{QName, XmlElement, NS_MAIN};
use crate::MergeError;

pub const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";

/// Folds a donor's shared-string table into the accumulator's.
///
/// Strings are matched on their visible text; a donor string with no match is appended as-is
/// (rich runs included). The returned map sends every donor index to its accumulator index.
#[derive(Debug, Default)]
pub struct SharedStringMerger;

impl SharedStringMerger {
    pub fn merge(&self, ctx: &mut MergeContext, donor: &Package) -> Result<IdMap, MergeError> {
        let Some(donor_table) = donor.read_xml_optional(SHARED_STRINGS_PART)? else {
            return Ok(IdMap::new());
        };

        let mut table = match ctx.accumulator().read_xml_optional(SHARED_STRINGS_PART)? {
            Some(table) => table,
            None => {
                log::debug!("creating {SHARED_STRINGS_PART} in the merged workbook");
                register_workbook_part(ctx, SHARED_STRINGS_PART, REL_TYPE_SHARED_STRINGS)?;
                update_content_types(ctx, |types| {
                    ensure_override(types, SHARED_STRINGS_PART, CT_SHARED_STRINGS)
                })?;
                empty_table()
            }
        };

        let existing_len = table.children_by_local("si").count() as u32;
        let mut index: HashMap<String, u32> = HashMap::new();
        for (i, si) in table.children_by_local("si").enumerate() {
            index.entry(visible_text(si)).or_insert(i as u32);
        }

        let mut len = existing_len;
        let mut map = IdMap::new();
        let mut appended = Vec::new();
        let mut donor_len = 0u32;
        for (donor_id, si) in donor_table.children_by_local("si").enumerate() {
            donor_len += 1;
            let text = visible_text(si);
            let id = match index.get(&text) {
                Some(id) => *id,
                None => {
                    let id = len;
                    len += 1;
                    index.insert(text, id);
                    appended.push(si.clone());
                    id
                }
            };
            map.insert(donor_id as u32, id);
        }

        log::debug!(
            "{}: {} shared strings, {} new",
            donor.name(),
            donor_len,
            appended.len()
        );
        for si in appended {
            table.push_child_before(si, "extLst");
        }

        let count = parse_count(&table, "count").unwrap_or(existing_len)
            + parse_count(&donor_table, "count").unwrap_or(donor_len);
        table.set_attr("count", count.to_string());
        table.set_attr("uniqueCount", len.to_string());
        ctx.accumulator_mut().write_xml(SHARED_STRINGS_PART, &table);

        Ok(map)
    }
}

/// Displayed text of an `<si>`: direct `<t>` plus `<r><t>` runs, phonetic runs excluded.
pub fn visible_text(si: &XmlElement) -> String {
    let mut out = String::new();
    for child in si.element_children() {
        match child.name.local.as_str() {
            "t" => out.push_str(&child.text()),
            "r" => {
                for t in child.children_by_local("t") {
                    out.push_str(&t.text());
                }
            }
            _ => {}
        }
    }
    out
}

fn parse_count(el: &XmlElement, attr: &str) -> Option<u32> {
    el.attr(attr).and_then(|v| v.trim().parse().ok())
}

fn empty_table() -> XmlElement {
    let mut sst = XmlElement::new(QName::new(Some(NS_MAIN), "sst"));
    sst.declare_namespace("", NS_MAIN);
    sst
}
