use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::context::MergeContext;
use crate::merge::worksheet::declared_sheet_name;
use crate::merge::{worksheet_parts, ImportedSheet, MergeSteps};
use crate::options::MergeOptions;
use crate::package::{Package, WorkbookKind};
use crate::path::sheet_number_from_part;
use crate::{MergeError, MergeWarning};

/// MIME type announced for downloads, whatever the workbook flavour.
pub const DOWNLOAD_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// File stem used by [`WorkbookMerger::download`] when the caller does not suggest one.
pub const DEFAULT_DOWNLOAD_STEM: &str = "merged-excel-file";

/// One worksheet of the merged workbook and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedSheet {
    pub source: String,
    pub source_part: String,
    pub number: u32,
    pub name: String,
}

/// Summary of a merge session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Accepted inputs in the order they were merged; the first one is the base workbook.
    pub inputs: Vec<String>,
    /// Inputs skipped because they are not `.xlsx`/`.xlsm` files.
    pub skipped: Vec<PathBuf>,
    pub sheets: Vec<MergedSheet>,
    pub warnings: Vec<MergeWarning>,
}

/// A merged workbook ready to hand to a browser or another process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Merges workbooks one after another into the first accepted one.
///
/// ```no_run
/// use xlsx_merge::WorkbookMerger;
///
/// # fn main() -> Result<(), xlsx_merge::MergeError> {
/// let mut merger = WorkbookMerger::new();
/// merger.add_file("q1.xlsx")?;
/// merger.add_file("q2.xlsm")?;
/// let written = merger.save("out/merged.xlsx")?; // `out/merged.xlsm`: q2 carries macros
/// # let _ = written;
/// # Ok(())
/// # }
/// ```
///
/// Once a merge step fails the accumulated workbook is inconsistent, so every later call returns
/// [`MergeError::Poisoned`].
#[derive(Debug)]
pub struct WorkbookMerger {
    options: MergeOptions,
    steps: MergeSteps,
    ctx: Option<MergeContext>,
    report: MergeReport,
    poisoned: bool,
}

impl Default for WorkbookMerger {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkbookMerger {
    pub fn new() -> Self {
        Self::with_options(MergeOptions::default())
    }

    pub fn with_options(options: MergeOptions) -> Self {
        Self {
            steps: MergeSteps::new(&options),
            options,
            ctx: None,
            report: MergeReport::default(),
            poisoned: false,
        }
    }

    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    pub fn report(&self) -> &MergeReport {
        &self.report
    }

    /// Opens `path` and merges it. Returns `Ok(false)` when the file was skipped because its
    /// extension is not a workbook extension.
    pub fn add_file(&mut self, path: impl AsRef<Path>) -> Result<bool, MergeError> {
        let path = path.as_ref();
        self.check_usable()?;
        if WorkbookKind::from_path(path).is_none() {
            self.skip(path);
            return Ok(false);
        }

        let package = Package::open(path, self.options.limits)?;
        self.add_package(package)?;
        Ok(true)
    }

    /// Merges an archive held in memory. `name` is checked for a workbook extension like a path.
    pub fn add_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<bool, MergeError> {
        self.check_usable()?;
        if WorkbookKind::from_path(Path::new(name)).is_none() {
            self.skip(Path::new(name));
            return Ok(false);
        }

        let package = Package::from_bytes(name, bytes, self.options.limits)?;
        self.add_package(package)?;
        Ok(true)
    }

    /// Adopts `package` as the base workbook, or merges its worksheets into the base.
    pub fn add_package(&mut self, package: Package) -> Result<(), MergeError> {
        self.check_usable()?;

        let Some(ctx) = self.ctx.as_mut() else {
            let sheets = own_sheets(&package)?;
            log::info!(
                "{}: adopted as base workbook ({} sheet(s))",
                package.name(),
                sheets.len()
            );
            self.report.inputs.push(package.name().to_string());
            self.report.sheets.extend(sheets);
            self.ctx = Some(MergeContext::new(package, self.options.clone()));
            return Ok(());
        };

        let result = self.steps.merge_donor(ctx, &package);
        self.report.warnings.extend(ctx.take_warnings());
        let imported = match result {
            Ok(imported) => imported,
            Err(err) => {
                log::error!("{}: merge failed: {err}", package.name());
                self.poisoned = true;
                return Err(err);
            }
        };

        log::info!(
            "{}: merged {} sheet(s)",
            package.name(),
            imported.len()
        );
        self.report.inputs.push(package.name().to_string());
        self.report.sheets.extend(
            imported
                .into_iter()
                .map(|sheet| merged_sheet(package.name(), sheet)),
        );
        Ok(())
    }

    /// The merged package, as it stands.
    pub fn package(&self) -> Result<&Package, MergeError> {
        self.check_usable()?;
        self.ctx
            .as_ref()
            .map(MergeContext::accumulator)
            .ok_or(MergeError::NoInput)
    }

    /// `.xlsm` when the merged package carries a VBA project, `.xlsx` otherwise.
    pub fn output_kind(&self) -> Result<WorkbookKind, MergeError> {
        Ok(self.package()?.kind())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MergeError> {
        self.package()?.to_bytes()
    }

    /// Writes the merged workbook next to `dest`, with its workbook extension matched to the
    /// content, and returns the path actually written.
    pub fn save(&self, dest: impl AsRef<Path>) -> Result<PathBuf, MergeError> {
        let package = self.package()?;
        let dest = with_workbook_extension(dest.as_ref(), package.kind());
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        package.write_to(tmp.as_file_mut())?;
        tmp.as_file_mut().flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|err| MergeError::Io(err.error))?;

        log::info!("wrote {}", dest.display());
        Ok(dest)
    }

    /// Archive bytes plus a suggested file name whose extension matches the content.
    pub fn download(&self, name: Option<&str>) -> Result<Download, MergeError> {
        let package = self.package()?;
        let base = name
            .and_then(|name| Path::new(name).file_name())
            .map(|base| base.to_string_lossy().into_owned())
            .filter(|base| !base.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DOWNLOAD_STEM.to_string());
        let file_name = with_workbook_extension(Path::new(&base), package.kind());

        Ok(Download {
            file_name: file_name.to_string_lossy().into_owned(),
            content_type: DOWNLOAD_CONTENT_TYPE,
            bytes: package.to_bytes()?,
        })
    }

    /// Writes the merged parts as plain files below `dir`.
    pub fn extract_to_dir(&self, dir: impl AsRef<Path>) -> Result<(), MergeError> {
        self.package()?.extract_to_dir(dir.as_ref())
    }

    pub fn into_package(self) -> Result<Package, MergeError> {
        if self.poisoned {
            return Err(MergeError::Poisoned);
        }
        self.ctx
            .map(MergeContext::into_package)
            .ok_or(MergeError::NoInput)
    }

    fn check_usable(&self) -> Result<(), MergeError> {
        if self.poisoned {
            return Err(MergeError::Poisoned);
        }
        Ok(())
    }

    fn skip(&mut self, path: &Path) {
        let warning = MergeWarning::UnsupportedFormat {
            path: path.to_path_buf(),
        };
        log::warn!("{warning}");
        self.report.skipped.push(path.to_path_buf());
        self.report.warnings.push(warning);
    }
}

/// Swaps an `.xlsx`/`.xlsm` extension for the one `kind` needs; any other suffix is part of the
/// name and the extension is appended.
fn with_workbook_extension(path: &Path, kind: WorkbookKind) -> PathBuf {
    if WorkbookKind::from_path(path).is_some() {
        return path.with_extension(kind.extension());
    }
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(kind.extension());
    PathBuf::from(name)
}

fn merged_sheet(source: &str, sheet: ImportedSheet) -> MergedSheet {
    MergedSheet {
        source: source.to_string(),
        source_part: sheet.source_part,
        number: sheet.number,
        name: sheet.name,
    }
}

fn own_sheets(package: &Package) -> Result<Vec<MergedSheet>, MergeError> {
    let mut sheets = Vec::new();
    for part in worksheet_parts(package)? {
        let Some(number) = sheet_number_from_part(&part) else {
            continue;
        };
        sheets.push(MergedSheet {
            source: package.name().to_string(),
            name: declared_sheet_name(package, &part)?,
            source_part: part,
            number,
        });
    }
    Ok(sheets)
}
