use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Component, Path};

use globset::GlobBuilder;

use crate::path::{normalize_part_name, CONTENT_TYPES_PART};
use crate::xml::XmlElement;
use crate::zip_util::{
    read_zip_file_bytes_with_budget, zip_part_names_equivalent, ZipInflateBudget,
    DEFAULT_MAX_ZIP_PART_BYTES, DEFAULT_MAX_ZIP_TOTAL_BYTES,
};
use crate::MergeError;

pub const VBA_PROJECT_PART: &str = "xl/vbaProject.bin";

/// Size limits enforced while inflating a package into memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageLimits {
    /// Maximum allowed uncompressed bytes for any single part.
    pub max_part_bytes: u64,
    /// Maximum allowed uncompressed bytes across the whole package.
    pub max_total_bytes: u64,
}

impl Default for PackageLimits {
    fn default() -> Self {
        Self {
            max_part_bytes: DEFAULT_MAX_ZIP_PART_BYTES,
            max_total_bytes: DEFAULT_MAX_ZIP_TOTAL_BYTES,
        }
    }
}

/// Workbook flavour, which decides the output extension and the `/xl/workbook.xml` content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkbookKind {
    /// Standard workbook (`.xlsx`).
    Workbook,
    /// Macro-enabled workbook (`.xlsm`).
    MacroEnabledWorkbook,
}

impl WorkbookKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        if ext.eq_ignore_ascii_case("xlsx") {
            return Some(Self::Workbook);
        }
        if ext.eq_ignore_ascii_case("xlsm") {
            return Some(Self::MacroEnabledWorkbook);
        }
        None
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn extension(self) -> &'static str {
        match self {
            WorkbookKind::Workbook => "xlsx",
            WorkbookKind::MacroEnabledWorkbook => "xlsm",
        }
    }

    pub fn workbook_content_type(self) -> &'static str {
        match self {
            WorkbookKind::Workbook => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"
            }
            WorkbookKind::MacroEnabledWorkbook => {
                "application/vnd.ms-excel.sheet.macroEnabled.main+xml"
            }
        }
    }
}

/// In-memory OPC package: every ZIP entry inflated and keyed by its canonical part name.
#[derive(Debug, Clone)]
pub struct Package {
    name: String,
    parts: BTreeMap<String, Vec<u8>>,
}

impl Package {
    pub fn open(path: &Path, limits: PackageLimits) -> Result<Self, MergeError> {
        let bytes = fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_bytes(name, &bytes, limits)
    }

    /// Inflate a ZIP archive held in memory. `name` only labels diagnostics.
    pub fn from_bytes(
        name: impl Into<String>,
        bytes: &[u8],
        limits: PackageLimits,
    ) -> Result<Self, MergeError> {
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes))?;

        let mut parts = BTreeMap::new();
        let mut budget = ZipInflateBudget::new(limits.max_total_bytes);
        for i in 0..zip.len() {
            let mut file = zip.by_index(i)?;
            if !file.is_file() {
                continue;
            }

            let part_name = normalize_part_name(file.name());
            let buf = read_zip_file_bytes_with_budget(
                &mut file,
                &part_name,
                limits.max_part_bytes,
                &mut budget,
            )?;
            parts.insert(part_name, buf);
        }

        Ok(Self {
            name: name.into(),
            parts,
        })
    }

    /// Construct a package from already-inflated parts.
    pub fn from_parts(name: impl Into<String>, parts: BTreeMap<String, Vec<u8>>) -> Self {
        let parts = parts
            .into_iter()
            .map(|(k, v)| (normalize_part_name(&k), v))
            .collect();
        Self {
            name: name.into(),
            parts,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn part(&self, name: &str) -> Option<&[u8]> {
        let canonical = normalize_part_name(name);
        if let Some(bytes) = self.parts.get(&canonical) {
            return Some(bytes.as_slice());
        }
        self.parts
            .iter()
            .find(|(key, _)| zip_part_names_equivalent(key, &canonical))
            .map(|(_, bytes)| bytes.as_slice())
    }

    pub fn contains_part(&self, name: &str) -> bool {
        self.part(name).is_some()
    }

    pub fn set_part(&mut self, name: &str, bytes: Vec<u8>) {
        let canonical = normalize_part_name(name);
        // Replace a differently-cased spelling of the same entry rather than adding a twin.
        if !self.parts.contains_key(&canonical) {
            if let Some(existing) = self
                .parts
                .keys()
                .find(|key| zip_part_names_equivalent(key, &canonical))
                .cloned()
            {
                self.parts.insert(existing, bytes);
                return;
            }
        }
        self.parts.insert(canonical, bytes);
    }

    pub fn remove_part(&mut self, name: &str) -> Option<Vec<u8>> {
        self.parts.remove(&normalize_part_name(name))
    }

    /// Part names matching a glob such as `xl/worksheets/sheet*.xml`, in lexicographic order.
    ///
    /// `*` does not cross `/`.
    pub fn list_parts(&self, pattern: &str) -> Result<Vec<String>, MergeError> {
        let matcher = GlobBuilder::new(&normalize_part_name(pattern))
            .literal_separator(true)
            .build()?
            .compile_matcher();
        Ok(self
            .parts
            .keys()
            .filter(|name| matcher.is_match(name.as_str()))
            .cloned()
            .collect())
    }

    pub fn read_xml(&self, part: &str) -> Result<XmlElement, MergeError> {
        self.read_xml_optional(part)?
            .ok_or_else(|| MergeError::MissingPart {
                package: self.name.clone(),
                part: part.to_string(),
            })
    }

    pub fn read_xml_optional(&self, part: &str) -> Result<Option<XmlElement>, MergeError> {
        let Some(bytes) = self.part(part) else {
            return Ok(None);
        };
        XmlElement::parse(bytes)
            .map(Some)
            .map_err(|source| MergeError::MalformedPart {
                package: self.name.clone(),
                part: part.to_string(),
                source,
            })
    }

    pub fn write_xml(&mut self, part: &str, root: &XmlElement) {
        self.set_part(part, root.to_xml_bytes());
    }

    pub fn vba_project_bin(&self) -> Option<&[u8]> {
        self.part(VBA_PROJECT_PART)
    }

    pub fn kind(&self) -> WorkbookKind {
        if self.vba_project_bin().is_some() {
            WorkbookKind::MacroEnabledWorkbook
        } else {
            WorkbookKind::Workbook
        }
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<(), MergeError> {
        let cursor = Cursor::new(Vec::new());
        let mut zip = zip::ZipWriter::new(cursor);
        let options = zip::write::FileOptions::<()>::default()
            .compression_method(zip::CompressionMethod::Deflated);

        // Readers that sniff the first entry expect the content-types stream up front.
        let ordered = self
            .parts
            .iter()
            .filter(|(name, _)| name.as_str() == CONTENT_TYPES_PART)
            .chain(
                self.parts
                    .iter()
                    .filter(|(name, _)| name.as_str() != CONTENT_TYPES_PART),
            );
        for (name, bytes) in ordered {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }

        let cursor = zip.finish()?;
        w.write_all(&cursor.into_inner())?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MergeError> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(out)
    }

    /// Write every part as a plain file below `dir`, mirroring the package layout.
    pub fn extract_to_dir(&self, dir: &Path) -> Result<(), MergeError> {
        for (name, bytes) in &self.parts {
            let relative = Path::new(name);
            if relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
            {
                log::warn!("{}: not extracting suspicious part name {name}", self.name);
                continue;
            }
            let dest = dir.join(relative);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&dest, bytes)?;
        }
        Ok(())
    }
}
