//! Merge XLSX/XLSM workbooks at the Open Packaging Convention part level.
//!
//! The first accepted workbook becomes the base. Every worksheet of each later workbook is copied
//! into it while the package-wide tables are deduplicated and every reference rewritten:
//!
//! - shared strings (`xl/sharedStrings.xml`), by visible text;
//! - cell formatting (`xl/styles.xml`): number formats, fonts, fills, borders, cell style
//!   records, named styles and differential formats;
//! - the VBA project (`xl/vbaProject.bin`), which turns the output into an `.xlsm`.
//!
//! Relationships, content types, `docProps/app.xml` and the workbook's sheet list are updated
//! after each imported sheet so the package stays consistent at every step.
//!
//! [`WorkbookMerger`] is the entry point; [`Package`] is the in-memory archive it works on.

pub mod cli;
pub mod context;
mod error;
pub mod merge;
pub mod options;
pub mod package;
pub mod path;
pub mod relationships;
pub mod session;
pub mod xml;
mod zip_util;

pub use context::MergeContext;
pub use error::{MergeError, MergeWarning};
pub use merge::{ImportedSheet, MergeSteps};
pub use options::{MergeOptions, FIRST_CUSTOM_NUM_FMT_ID};
pub use package::{Package, PackageLimits, WorkbookKind};
pub use session::{
    Download, MergeReport, MergedSheet, WorkbookMerger, DEFAULT_DOWNLOAD_STEM,
    DOWNLOAD_CONTENT_TYPE,
};
pub use xml::XmlDomError;
