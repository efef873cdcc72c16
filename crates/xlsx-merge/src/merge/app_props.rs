use crate::context::MergeContext;
use crate::merge::worksheet::ImportedSheet;
use crate::xml::{XmlElement, XmlNode};
use crate::MergeError;

pub const APP_PROPERTIES_PART: &str = "docProps/app.xml";

/// Keeps `docProps/app.xml` (sheet count and titles) in step with the imported sheets.
#[derive(Debug, Default)]
pub struct AppMetadataUpdater;

impl AppMetadataUpdater {
    pub fn merge(&self, ctx: &mut MergeContext, sheet: &ImportedSheet) -> Result<(), MergeError> {
        let Some(mut root) = ctx.accumulator().read_xml_optional(APP_PROPERTIES_PART)? else {
            log::debug!("no {APP_PROPERTIES_PART}; skipping document metadata");
            return Ok(());
        };

        let slot = bump_worksheet_count(&mut root);
        insert_title(&mut root, slot, &sheet.name);
        ctx.accumulator_mut()
            .write_xml(APP_PROPERTIES_PART, &root);
        Ok(())
    }
}

/// Increments the worksheet count in `HeadingPairs` and returns the title index just past the
/// existing worksheet titles, or `None` when there are no heading pairs to go by.
fn bump_worksheet_count(root: &mut XmlElement) -> Option<usize> {
    let vector = root.child_mut("HeadingPairs")?.child_mut("vector")?;

    let pairs: Vec<(String, usize)> = {
        let variants: Vec<&XmlElement> = vector.children_by_local("variant").collect();
        variants
            .chunks(2)
            .map(|pair| {
                let name = pair[0].child("lpstr").map(|el| el.text()).unwrap_or_default();
                let count = pair
                    .get(1)
                    .and_then(|v| v.child("i4"))
                    .and_then(|el| el.text().trim().parse().ok())
                    .unwrap_or(0);
                (name, count)
            })
            .collect()
    };
    if pairs.is_empty() {
        return None;
    }

    let idx = pairs
        .iter()
        .position(|(name, _)| name == "Worksheets")
        .unwrap_or(0);
    let offset: usize = pairs[..idx].iter().map(|(_, count)| count).sum();
    let count = pairs[idx].1;

    let i4 = vector
        .children_by_local_mut("variant")
        .nth(idx * 2 + 1)
        .and_then(|variant| variant.child_mut("i4"))?;
    i4.set_text((count + 1).to_string());
    Some(offset + count)
}

fn insert_title(root: &mut XmlElement, slot: Option<usize>, name: &str) {
    let Some(vector) = root
        .child_mut("TitlesOfParts")
        .and_then(|titles| titles.child_mut("vector"))
    else {
        return;
    };

    let mut title = vector.sibling_name("lpstr");
    title.set_text(name);

    let positions: Vec<usize> = vector
        .children
        .iter()
        .enumerate()
        .filter(|(_, node)| matches!(node, XmlNode::Element(el) if el.name.local == "lpstr"))
        .map(|(i, _)| i)
        .collect();
    let at = match slot {
        Some(slot) if slot < positions.len() => positions[slot],
        _ => vector.children.len(),
    };
    vector.children.insert(at, XmlNode::Element(title));

    let size = vector.element_children().count();
    vector.set_attr("size", size.to_string());
}
