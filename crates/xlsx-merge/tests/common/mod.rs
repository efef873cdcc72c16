#![allow(dead_code)]

use std::collections::HashSet;
use std::io::{Cursor, Write};

use xlsx_merge::merge::shared_strings::{visible_text, SHARED_STRINGS_PART};
use xlsx_merge::merge::styles::STYLES_PART;
use xlsx_merge::merge::workbook::parse_workbook_sheets;
use xlsx_merge::merge::worksheet_parts;
use xlsx_merge::path::{resolve_target, CONTENT_TYPES_PART, WORKBOOK_PART, WORKBOOK_RELS_PART};
use xlsx_merge::relationships::parse_relationships;
use xlsx_merge::xml::XmlElement;
use xlsx_merge::Package;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
  <numFmts count="1"><numFmt numFmtId="164" formatCode="0.000"/></numFmts>
  <fonts count="2">
    <font><sz val="11"/><name val="Calibri"/></font>
    <font><b/><sz val="11"/><name val="Calibri"/></font>
  </fonts>
  <fills count="2">
    <fill><patternFill patternType="none"/></fill>
    <fill><patternFill patternType="gray125"/></fill>
  </fills>
  <borders count="1"><border><left/><right/><top/><bottom/><diagonal/></border></borders>
  <cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>
  <cellXfs count="3">
    <xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/>
    <xf numFmtId="0" fontId="1" fillId="0" borderId="0" xfId="0" applyFont="1"/>
    <xf numFmtId="164" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"/>
  </cellXfs>
  <cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles>
  <dxfs count="0"/>
</styleSheet>"#;

const NS_MAIN: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const NS_R: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const REL_BASE: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

pub fn zip_bytes(parts: &[(&str, &[u8])]) -> Vec<u8> {
    let cursor = Cursor::new(Vec::new());
    let mut writer = ZipWriter::new(cursor);
    let options = FileOptions::<()>::default().compression_method(CompressionMethod::Stored);

    for (name, bytes) in parts {
        writer.start_file(*name, options).unwrap();
        writer.write_all(bytes).unwrap();
    }

    writer.finish().unwrap().into_inner()
}

/// Builds a small but complete workbook archive.
#[derive(Debug, Clone, Default)]
pub struct WorkbookFixture {
    sheets: Vec<(String, String)>,
    strings: Option<Vec<String>>,
    styles: Option<String>,
    vba: Option<Vec<u8>>,
    app_properties: bool,
}

impl WorkbookFixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// `body` is everything inside `<worksheet>`, e.g. `<sheetData>...</sheetData>`.
    pub fn sheet(mut self, name: &str, body: &str) -> Self {
        self.sheets.push((name.to_string(), body.to_string()));
        self
    }

    pub fn shared_strings(mut self, strings: &[&str]) -> Self {
        self.strings = Some(strings.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn styles(mut self, xml: &str) -> Self {
        self.styles = Some(xml.to_string());
        self
    }

    pub fn vba(mut self, bin: &[u8]) -> Self {
        self.vba = Some(bin.to_vec());
        self
    }

    pub fn app_properties(mut self) -> Self {
        self.app_properties = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut parts: Vec<(String, Vec<u8>)> = Vec::new();
        let mut overrides = String::new();
        let mut rels = String::new();
        let mut sheet_entries = String::new();

        for (i, (name, body)) in self.sheets.iter().enumerate() {
            let n = i + 1;
            sheet_entries.push_str(&format!(
                r#"<sheet name="{name}" sheetId="{n}" r:id="rId{n}"/>"#
            ));
            rels.push_str(&format!(
                r#"<Relationship Id="rId{n}" Type="{REL_BASE}/worksheet" Target="worksheets/sheet{n}.xml"/>"#
            ));
            overrides.push_str(&format!(
                r#"<Override PartName="/xl/worksheets/sheet{n}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
            ));
            parts.push((
                format!("xl/worksheets/sheet{n}.xml"),
                format!(r#"<worksheet xmlns="{NS_MAIN}" xmlns:r="{NS_R}">{body}</worksheet>"#)
                    .into_bytes(),
            ));
        }

        let mut next_rel = self.sheets.len() + 1;
        if let Some(styles) = &self.styles {
            rels.push_str(&format!(
                r#"<Relationship Id="rId{next_rel}" Type="{REL_BASE}/styles" Target="styles.xml"/>"#
            ));
            next_rel += 1;
            overrides.push_str(r#"<Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>"#);
            parts.push(("xl/styles.xml".to_string(), styles.clone().into_bytes()));
        }
        if let Some(strings) = &self.strings {
            rels.push_str(&format!(
                r#"<Relationship Id="rId{next_rel}" Type="{REL_BASE}/sharedStrings" Target="sharedStrings.xml"/>"#
            ));
            next_rel += 1;
            overrides.push_str(r#"<Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/>"#);
            let items: String = strings
                .iter()
                .map(|s| format!("<si><t>{s}</t></si>"))
                .collect();
            parts.push((
                "xl/sharedStrings.xml".to_string(),
                format!(
                    r#"<sst xmlns="{NS_MAIN}" count="{n}" uniqueCount="{n}">{items}</sst>"#,
                    n = strings.len()
                )
                .into_bytes(),
            ));
        }

        let (main_type, bin_default) = match &self.vba {
            Some(bin) => {
                rels.push_str(&format!(
                    r#"<Relationship Id="rId{next_rel}" Type="http://schemas.microsoft.com/office/2006/relationships/vbaProject" Target="vbaProject.bin"/>"#
                ));
                parts.push(("xl/vbaProject.bin".to_string(), bin.clone()));
                (
                    "application/vnd.ms-excel.sheet.macroEnabled.main+xml",
                    r#"<Default Extension="bin" ContentType="application/vnd.ms-office.vbaProject"/>"#,
                )
            }
            None => (
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml",
                "",
            ),
        };

        if self.app_properties {
            overrides.push_str(r#"<Override PartName="/docProps/app.xml" ContentType="application/vnd.openxmlformats-officedocument.extended-properties+xml"/>"#);
            let titles: String = self
                .sheets
                .iter()
                .map(|(name, _)| format!("<vt:lpstr>{name}</vt:lpstr>"))
                .collect();
            parts.push((
                "docProps/app.xml".to_string(),
                format!(
                    r#"<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/extended-properties" xmlns:vt="http://schemas.openxmlformats.org/officeDocument/2006/docPropsVTypes"><Application>Microsoft Excel</Application><HeadingPairs><vt:vector size="2" baseType="variant"><vt:variant><vt:lpstr>Worksheets</vt:lpstr></vt:variant><vt:variant><vt:i4>{n}</vt:i4></vt:variant></vt:vector></HeadingPairs><TitlesOfParts><vt:vector size="{n}" baseType="lpstr">{titles}</vt:vector></TitlesOfParts></Properties>"#,
                    n = self.sheets.len()
                )
                .into_bytes(),
            ));
        }

        parts.push((
            "[Content_Types].xml".to_string(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/>{bin_default}<Override PartName="/xl/workbook.xml" ContentType="{main_type}"/>{overrides}</Types>"#
            )
            .into_bytes(),
        ));
        parts.push((
            "_rels/.rels".to_string(),
            format!(
                r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="{REL_BASE}/officeDocument" Target="xl/workbook.xml"/></Relationships>"#
            )
            .into_bytes(),
        ));
        parts.push((
            "xl/workbook.xml".to_string(),
            format!(
                r#"<workbook xmlns="{NS_MAIN}" xmlns:r="{NS_R}"><bookViews><workbookView activeTab="0"/></bookViews><sheets>{sheet_entries}</sheets><calcPr calcId="191029"/></workbook>"#
            )
            .into_bytes(),
        ));
        parts.push((
            "xl/_rels/workbook.xml.rels".to_string(),
            format!(
                r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">{rels}</Relationships>"#
            )
            .into_bytes(),
        ));

        let borrowed: Vec<(&str, &[u8])> = parts
            .iter()
            .map(|(name, bytes)| (name.as_str(), bytes.as_slice()))
            .collect();
        zip_bytes(&borrowed)
    }
}

pub fn reopen(bytes: &[u8]) -> Package {
    Package::from_bytes("merged.xlsx", bytes, Default::default()).expect("reopen merged package")
}

pub fn xml(package: &Package, part: &str) -> XmlElement {
    package.read_xml(part).expect("read part")
}

pub fn shared_strings(package: &Package) -> Vec<String> {
    xml(package, SHARED_STRINGS_PART)
        .children_by_local("si")
        .map(visible_text)
        .collect()
}

/// `(ref, type, style, value)` of every cell in `part`, in document order.
pub fn cells(
    package: &Package,
    part: &str,
) -> Vec<(String, Option<String>, Option<String>, String)> {
    let sheet = xml(package, part);
    let mut out = Vec::new();
    let Some(data) = sheet.child("sheetData") else {
        return out;
    };
    for row in data.children_by_local("row") {
        for c in row.children_by_local("c") {
            out.push((
                c.attr("r").unwrap_or_default().to_string(),
                c.attr("t").map(str::to_string),
                c.attr("s").map(str::to_string),
                c.child("v").map(|v| v.text()).unwrap_or_default(),
            ));
        }
    }
    out
}

pub fn sheet_names(package: &Package) -> Vec<String> {
    parse_workbook_sheets(package.part(WORKBOOK_PART).expect("workbook.xml"))
        .expect("parse workbook.xml")
        .into_iter()
        .map(|s| s.name)
        .collect()
}

fn descendants<'a>(el: &'a XmlElement, out: &mut Vec<&'a XmlElement>) {
    out.push(el);
    for child in el.element_children() {
        descendants(child, out);
    }
}

fn index_in_range(el: &XmlElement, attr: &str, len: usize, part: &str, table: &str) {
    if let Some(value) = el.attr(attr) {
        let local = &el.name.local;
        let id: usize = value
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{part}: {local}/@{attr}={value:?} is not an index"));
        assert!(id < len, "{part}: {local}/@{attr}={id} but {table} has {len} entries");
    }
}

/// Every string, cell-format and conditional-format index used by a worksheet points inside the
/// corresponding table.
pub fn assert_references_in_range(package: &Package) {
    let strings = package
        .read_xml_optional(SHARED_STRINGS_PART)
        .expect("read shared strings")
        .map_or(0, |sst| sst.children_by_local("si").count());
    let styles = package.read_xml_optional(STYLES_PART).expect("read styles");
    let table_len = |name: &str, item: &str| {
        styles
            .as_ref()
            .and_then(|root| root.child(name))
            .map_or(0, |table| table.children_by_local(item).count())
    };
    let cell_xfs = table_len("cellXfs", "xf");
    let dxfs = table_len("dxfs", "dxf");

    for part in worksheet_parts(package).expect("list worksheet parts") {
        let sheet = xml(package, &part);
        let mut all = Vec::new();
        descendants(&sheet, &mut all);
        for el in all {
            match el.name.local.as_str() {
                "c" => {
                    if el.attr("t") == Some("s") {
                        let v = el.child("v").map(|v| v.text()).unwrap_or_default();
                        let id: usize = v.trim().parse().expect("shared string index");
                        assert!(id < strings, "{part}: string {id} but the table has {strings}");
                    }
                    if styles.is_some() {
                        index_in_range(el, "s", cell_xfs, &part, "cellXfs");
                    }
                }
                "row" if styles.is_some() => index_in_range(el, "s", cell_xfs, &part, "cellXfs"),
                "col" if styles.is_some() => {
                    index_in_range(el, "style", cell_xfs, &part, "cellXfs")
                }
                "cfRule" => index_in_range(el, "dxfId", dxfs, &part, "dxfs"),
                _ => {}
            }
        }
    }
}

/// Every sheet in `xl/workbook.xml` resolves to a worksheet relationship whose target part exists
/// and has a content-type override, every worksheet part is listed exactly once, and worksheet
/// indices stay inside their tables.
pub fn assert_consistent(package: &Package) {
    let sheets = parse_workbook_sheets(package.part(WORKBOOK_PART).expect("workbook.xml"))
        .expect("parse workbook.xml");
    let rels = parse_relationships(package.part(WORKBOOK_RELS_PART).expect("workbook rels"))
        .expect("parse workbook rels");
    let types = xml(package, CONTENT_TYPES_PART);
    let overrides: HashSet<&str> = types
        .children_by_local("Override")
        .filter_map(|el| el.attr("PartName"))
        .collect();

    let ids: HashSet<&str> = rels.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids.len(), rels.len(), "duplicate relationship ids: {rels:#?}");

    let mut names = HashSet::new();
    let mut targets = HashSet::new();
    for sheet in &sheets {
        assert!(
            names.insert(sheet.name.to_lowercase()),
            "duplicate sheet name {:?}",
            sheet.name
        );
        let rel_id = sheet.rel_id.as_deref().expect("sheet r:id");
        let rel = rels
            .iter()
            .find(|r| r.id == rel_id)
            .unwrap_or_else(|| panic!("sheet {:?} points at missing {rel_id}", sheet.name));
        assert!(rel.is_worksheet(), "{rel_id} is not a worksheet relationship");
        let part = resolve_target(WORKBOOK_PART, &rel.target);
        assert!(package.contains_part(&part), "missing part {part}");
        assert!(
            overrides.contains(format!("/{part}").as_str()),
            "no content type override for {part}"
        );
        assert!(targets.insert(part.clone()), "{part} listed twice");
    }

    let parts = worksheet_parts(package).expect("list worksheet parts");
    assert_eq!(parts.len(), sheets.len(), "worksheet parts vs sheet list");

    assert_references_in_range(package);
}
