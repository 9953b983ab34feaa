use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use rust_xlsxwriter::Workbook;
use serde::Deserialize;

/// File written by [`export_results`]
pub const DEFAULT_OUTPUT: &str = "graded_results.xlsx";

/// A single spreadsheet value, kept as text, number or boolean the way it
/// was graded. JSON `null` is a blank cell.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Blank,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct IdField {
    pub bubbled: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AnswerField {
    pub bubbled: Vec<CellValue>,
    #[serde(default)]
    pub unsure: Vec<CellValue>,
    #[serde(default)]
    pub error: Vec<CellValue>,
}

/// Grading output for one answer sheet
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResultRecord {
    pub id: IdField,
    pub answer: AnswerField,
}

impl ResultRecord {
    /// Student identifier: bubbled id characters joined, hyphens removed
    pub fn student_id(&self) -> String {
        self.id.bubbled.concat().replace('-', "")
    }
}

/// First row of each band written per column.
///
/// The defaults fit a 52-question answer key followed by 17 unsure slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetLayout {
    pub id_row: u32,
    pub answer_row: u32,
    pub unsure_row: u32,
    pub error_row: u32,
}

impl Default for SheetLayout {
    fn default() -> Self {
        Self {
            id_row: 0,
            answer_row: 1,
            unsure_row: 53,
            error_row: 70,
        }
    }
}

impl SheetLayout {
    /// Bands whose entries run into the start of the next band, with the
    /// row where the overrun begins
    fn overlapping_bands(&self, record: &ResultRecord) -> Vec<(&'static str, &'static str, u32)> {
        let mut bands = [
            ("id", self.id_row, 1usize),
            ("answer", self.answer_row, record.answer.bubbled.len()),
            ("unsure", self.unsure_row, record.answer.unsure.len()),
            ("error", self.error_row, record.answer.error.len()),
        ];
        bands.sort_by_key(|band| band.1);

        bands
            .windows(2)
            .filter(|pair| pair[0].1 as u64 + pair[0].2 as u64 > pair[1].1 as u64)
            .map(|pair| (pair[0].0, pair[1].0, pair[1].1))
            .collect()
    }
}

/// One cell of the planned worksheet
#[derive(Debug, Clone, PartialEq)]
pub struct SheetCell {
    pub row: u32,
    pub col: u32,
    pub value: CellValue,
}

fn band<'a>(
    col: u32,
    start: u32,
    values: &'a [CellValue],
) -> impl Iterator<Item = SheetCell> + 'a {
    values.iter().enumerate().map(move |(i, value)| SheetCell {
        row: start + i as u32,
        col,
        value: value.clone(),
    })
}

/// Lay the records out as cells: one column per record, in order, with the
/// id and each answer band starting at the rows given by `layout`.
pub fn plan_cells(records: &[ResultRecord], layout: &SheetLayout) -> Vec<SheetCell> {
    let mut cells = Vec::new();

    for (col, record) in records.iter().enumerate() {
        let col = col as u32;

        for (from, into, row) in layout.overlapping_bands(record) {
            warn!(
                "Column {}: {} entries run into the {} band at row {}",
                col, from, into, row
            );
        }

        cells.push(SheetCell {
            row: layout.id_row,
            col,
            value: CellValue::Text(record.student_id()),
        });
        cells.extend(band(col, layout.answer_row, &record.answer.bubbled));
        cells.extend(band(col, layout.unsure_row, &record.answer.unsure));
        cells.extend(band(col, layout.error_row, &record.answer.error));
    }

    cells
}

/// Write the graded results to `path` as a single-worksheet workbook.
///
/// The file is created or overwritten and fully written before returning.
pub fn export_results_to(
    path: impl AsRef<Path>,
    records: &[ResultRecord],
    layout: &SheetLayout,
) -> Result<()> {
    let path = path.as_ref();
    info!("Processing results to xlsx");

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    for cell in plan_cells(records, layout) {
        let col = u16::try_from(cell.col)
            .with_context(|| format!("Too many result columns: {}", cell.col + 1))?;

        match &cell.value {
            // An unformatted blank cell is not stored in the sheet.
            CellValue::Blank => continue,
            CellValue::Bool(flag) => worksheet.write_boolean(cell.row, col, *flag),
            CellValue::Text(text) => worksheet.write_string(cell.row, col, text.as_str()),
            CellValue::Number(number) => worksheet.write_number(cell.row, col, *number),
        }
        .with_context(|| format!("Failed to write cell (row {}, col {})", cell.row, col))?;
    }

    workbook
        .save(path)
        .with_context(|| format!("Failed to save workbook: {:?}", path))?;

    debug!("Wrote {} records to {:?}", records.len(), path);
    Ok(())
}

/// Write the graded results to `graded_results.xlsx` in the working
/// directory using the default row layout.
pub fn export_results(records: &[ResultRecord]) -> Result<()> {
    export_results_to(DEFAULT_OUTPUT, records, &SheetLayout::default())
}

/// Read a JSON array of result records
pub fn load_results(path: impl AsRef<Path>) -> Result<Vec<ResultRecord>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open results: {:?}", path))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse results: {:?}", path))
}
