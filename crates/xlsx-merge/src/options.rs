use crate::package::PackageLimits;

/// First id Excel leaves free for custom number formats; 0-163 are built-in or reserved.
pub const FIRST_CUSTOM_NUM_FMT_ID: u32 = 164;

/// Knobs for a merge session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    /// Inflation limits applied to every input package.
    pub limits: PackageLimits,
    /// Set `calcPr/@fullCalcOnLoad` so Excel recomputes formulas in the merged workbook.
    pub force_full_calc_on_load: bool,
    /// Suffix imported sheet names (`" (2)"`, `" (3)"`, ...) when they collide with an existing name.
    pub unique_sheet_names: bool,
    /// Lower bound for synthetic `numFmtId`s assigned to imported custom number formats.
    pub first_custom_num_fmt_id: u32,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            limits: PackageLimits::default(),
            force_full_calc_on_load: true,
            unique_sheet_names: true,
            first_custom_num_fmt_id: FIRST_CUSTOM_NUM_FMT_ID,
        }
    }
}
