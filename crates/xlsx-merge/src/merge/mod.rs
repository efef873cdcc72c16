//! The merge pipeline: one component per package concern, run in a fixed order for every donor.

use std::collections::BTreeMap;

use crate::context::MergeContext;
use crate::options::MergeOptions;
use crate::package::Package;
use crate::path::sheet_number_from_part;
use crate::xml::XmlElement;
use crate::{MergeError, MergeWarning};

pub mod app_props;
pub mod content_types;
pub mod relationships;
pub mod shared_strings;
pub mod styles;
pub mod vba;
pub mod workbook;
pub mod worksheet;

pub use app_props::AppMetadataUpdater;
pub use content_types::ContentTypeRegistrar;
pub use relationships::{DisplacedRelationship, RelationshipRegistrar, RelationshipUpdate};
pub use shared_strings::SharedStringMerger;
pub use styles::{StyleMaps, StyleMerger};
pub use vba::VbaProjectMerger;
pub use workbook::WorkbookDefinitionUpdater;
pub use worksheet::{ImportedSheet, ReferenceMaps, WorksheetMerger};

/// Donor index -> accumulator index.
pub type IdMap = BTreeMap<u32, u32>;

pub(crate) fn parse_id(el: &XmlElement, attr: &str) -> Option<u32> {
    el.attr(attr).and_then(|v| v.trim().parse().ok())
}

/// Rewrites a numeric attribute through `map`; ids the map does not know are left alone.
pub(crate) fn remap_attr(el: &mut XmlElement, attr: &str, map: &IdMap) {
    if let Some(new) = parse_id(el, attr).and_then(|old| map.get(&old)) {
        el.set_attr(attr, new.to_string());
    }
}

/// Worksheet parts of `package` (`xl/worksheets/sheet{N}.xml`) in ascending `N`.
pub fn worksheet_parts(package: &Package) -> Result<Vec<String>, MergeError> {
    let mut parts: Vec<(u32, String)> = package
        .list_parts("xl/worksheets/sheet*.xml")?
        .into_iter()
        .filter_map(|part| sheet_number_from_part(&part).map(|n| (n, part)))
        .collect();
    parts.sort();
    Ok(parts.into_iter().map(|(_, part)| part).collect())
}

/// All merge components, holding whatever state must persist across donors.
#[derive(Debug)]
pub struct MergeSteps {
    pub shared_strings: SharedStringMerger,
    pub styles: StyleMerger,
    pub vba: VbaProjectMerger,
    pub worksheet: WorksheetMerger,
    pub relationships: RelationshipRegistrar,
    pub content_types: ContentTypeRegistrar,
    pub app: AppMetadataUpdater,
    pub workbook: WorkbookDefinitionUpdater,
}

impl MergeSteps {
    pub fn new(options: &MergeOptions) -> Self {
        Self {
            shared_strings: SharedStringMerger,
            styles: StyleMerger::new(options),
            vba: VbaProjectMerger,
            worksheet: WorksheetMerger,
            relationships: RelationshipRegistrar,
            content_types: ContentTypeRegistrar,
            app: AppMetadataUpdater,
            workbook: WorkbookDefinitionUpdater,
        }
    }

    /// Imports every worksheet of `donor` into the accumulator.
    ///
    /// Package-wide tables go first so their index maps are ready for the worksheet rewrite; each
    /// imported sheet is then registered in the relationships, content types, app metadata and
    /// workbook definition, in that order.
    pub fn merge_donor(
        &mut self,
        ctx: &mut MergeContext,
        donor: &Package,
    ) -> Result<Vec<ImportedSheet>, MergeError> {
        let strings = self.shared_strings.merge(ctx, donor)?;
        let styles = self.styles.merge(ctx, donor)?;
        self.vba.merge(ctx, donor)?;

        let maps = ReferenceMaps {
            strings: &strings,
            cell_formats: &styles.cell_xfs,
            conditional_formats: &styles.dxfs,
        };

        let mut imported = Vec::new();
        for part in worksheet_parts(donor)? {
            let Some(sheet) = self.worksheet.merge(ctx, donor, &part, &maps)? else {
                ctx.warn(MergeWarning::MissingWorksheetPart {
                    package: donor.name().to_string(),
                    part,
                });
                continue;
            };
            let update = self.relationships.merge(ctx, &sheet)?;
            self.content_types.merge(ctx, &sheet)?;
            self.app.merge(ctx, &sheet)?;
            self.workbook.merge(ctx, &sheet, &update)?;
            log::info!(
                "imported {}:{} as sheet {} ({:?})",
                donor.name(),
                part,
                sheet.number,
                sheet.name
            );
            imported.push(sheet);
        }
        Ok(imported)
    }
}
