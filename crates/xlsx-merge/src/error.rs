use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::xml::XmlDomError;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("unsupported input {}: only .xlsx and .xlsm packages can be merged", path.display())]
    UnsupportedFormat { path: PathBuf },
    #[error("malformed part {part} in {package}: {source}")]
    MalformedPart {
        package: String,
        part: String,
        #[source]
        source: XmlDomError,
    },
    #[error("missing required part {part} in {package}")]
    MissingPart { package: String, part: String },
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid part pattern: {0}")]
    Pattern(#[from] globset::Error),
    #[error("part '{part}' is too large ({size} bytes, max {max})")]
    PartTooLarge { part: String, size: u64, max: u64 },
    #[error("package is too large ({total} bytes inflated, max {max})")]
    PackageTooLarge { total: u64, max: u64 },
    #[error("no workbook has been added to the merge")]
    NoInput,
    #[error("an earlier merge step failed; the merged workbook is no longer usable")]
    Poisoned,
}

/// Non-fatal conditions collected while merging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeWarning {
    /// Input skipped because its extension is not `.xlsx`/`.xlsm`.
    UnsupportedFormat { path: PathBuf },
    /// A worksheet part enumerated from the donor could not be read back.
    MissingWorksheetPart { package: String, part: String },
    /// An element in an imported worksheet referenced a relationship that was not carried over.
    DanglingSheetRelationship {
        package: String,
        part: String,
        rel_id: String,
    },
}

impl fmt::Display for MergeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeWarning::UnsupportedFormat { path } => {
                write!(f, "skipped {}: not an .xlsx/.xlsm workbook", path.display())
            }
            MergeWarning::MissingWorksheetPart { package, part } => {
                write!(f, "{package}: worksheet part {part} is missing")
            }
            MergeWarning::DanglingSheetRelationship {
                package,
                part,
                rel_id,
            } => write!(
                f,
                "{package}: dropped reference to relationship {rel_id} from {part}"
            ),
        }
    }
}
