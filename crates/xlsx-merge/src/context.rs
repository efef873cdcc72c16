use crate::options::MergeOptions;
use crate::package::Package;
use crate::MergeWarning;

/// The accumulating workbook plus everything merge steps share while importing donors.
#[derive(Debug)]
pub struct MergeContext {
    accumulator: Package,
    options: MergeOptions,
    warnings: Vec<MergeWarning>,
}

impl MergeContext {
    pub fn new(accumulator: Package, options: MergeOptions) -> Self {
        Self {
            accumulator,
            options,
            warnings: Vec::new(),
        }
    }

    pub fn accumulator(&self) -> &Package {
        &self.accumulator
    }

    pub fn accumulator_mut(&mut self) -> &mut Package {
        &mut self.accumulator
    }

    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    pub fn warn(&mut self, warning: MergeWarning) {
        log::warn!("{warning}");
        self.warnings.push(warning);
    }

    pub fn take_warnings(&mut self) -> Vec<MergeWarning> {
        std::mem::take(&mut self.warnings)
    }

    pub fn into_package(self) -> Package {
        self.accumulator
    }
}
