//! XLSX rendering of [`SheetLayout`]s with `rust_xlsxwriter`.

use rust_xlsxwriter::{
    Color, ColNum, Format, FormatAlign, FormatBorder, FormatPattern, RowNum, Workbook, Worksheet,
};

use crate::ReportError;
use crate::layout::SheetLayout;

const TITLE_ROW: RowNum = 0;
const HEADER_ROW: RowNum = 2;
const FIRST_CYCLE_ROW: RowNum = 3;

const NAME_COLUMN_WIDTH: f64 = 22.0;
const DATE_COLUMN_WIDTH: f64 = 12.0;

const HEADER_FILL: u32 = 0x00D9_D9D9;
const BORDER_COLOR: u32 = 0x00BF_BFBF;

struct Formats {
    title: Format,
    header: Format,
    cell: Format,
}

impl Formats {
    fn new() -> Self {
        let base = Format::new()
            .set_font_name("Calibri")
            .set_font_size(10)
            .set_font_color(Color::Black)
            .set_align(FormatAlign::Center)
            .set_align(FormatAlign::VerticalCenter)
            .set_border(FormatBorder::Thin)
            .set_border_color(Color::RGB(BORDER_COLOR));
        Self {
            title: Format::new()
                .set_font_name("Calibri")
                .set_font_size(12)
                .set_bold()
                .set_font_color(Color::Black)
                .set_align(FormatAlign::Left)
                .set_align(FormatAlign::VerticalCenter),
            header: base
                .clone()
                .set_bold()
                .set_pattern(FormatPattern::Solid)
                .set_background_color(Color::RGB(HEADER_FILL)),
            cell: base,
        }
    }
}

/// Render the sheets into an XLSX workbook.
///
/// # Errors
///
/// Returns [`ReportError::Xlsx`] if the writer rejects a cell or name, or
/// [`ReportError::TooLarge`] if a sheet does not fit the grid.
pub fn render(sheets: &[SheetLayout]) -> Result<Vec<u8>, ReportError> {
    let formats = Formats::new();
    let mut workbook = Workbook::new();
    for layout in sheets {
        let sheet = workbook.add_worksheet();
        write_sheet(sheet, layout, &formats)?;
    }
    Ok(workbook.save_to_buffer()?)
}

fn write_sheet(
    sheet: &mut Worksheet,
    layout: &SheetLayout,
    formats: &Formats,
) -> Result<(), ReportError> {
    sheet.set_name(&layout.name)?;
    sheet.set_default_row_height(18);
    sheet.set_row_height(TITLE_ROW, 25)?;
    sheet.set_row_height(1, 5)?;
    sheet.set_row_height(HEADER_ROW, 20)?;
    sheet.write_string_with_format(TITLE_ROW, 0, &layout.title, &formats.title)?;

    let depth = RowNum::try_from(layout.depth())
        .ok()
        .ok_or_else(|| too_large(layout))?;
    for (offset, column) in layout.columns.iter().enumerate() {
        let left = ColNum::try_from(offset)
            .ok()
            .and_then(|o| o.checked_mul(2))
            .ok_or_else(|| too_large(layout))?;
        let right = left.checked_add(1).ok_or_else(|| too_large(layout))?;

        sheet.set_column_width(left, NAME_COLUMN_WIDTH)?;
        sheet.set_column_width(right, DATE_COLUMN_WIDTH)?;
        sheet.merge_range(
            HEADER_ROW,
            left,
            HEADER_ROW,
            right,
            &format!("Num. {}", column.number),
            &formats.header,
        )?;

        // Every territory gets the same number of bordered rows so the grid
        // stays rectangular.
        for index in 0..depth {
            let name_row = index
                .checked_mul(2)
                .and_then(|r| r.checked_add(FIRST_CYCLE_ROW))
                .ok_or_else(|| too_large(layout))?;
            let date_row = name_row.checked_add(1).ok_or_else(|| too_large(layout))?;
            let cycle = usize::try_from(index)
                .ok()
                .and_then(|i| column.cycles.get(i));

            let name = cycle.map_or("", |c| c.name.as_str());
            sheet.merge_range(name_row, left, name_row, right, name, &formats.cell)?;
            match cycle {
                Some(c) => {
                    sheet.write_string_with_format(date_row, left, &c.delivered_on, &formats.cell)?;
                    sheet.write_string_with_format(date_row, right, &c.returned_on, &formats.cell)?;
                }
                None => {
                    sheet.write_blank(date_row, left, &formats.cell)?;
                    sheet.write_blank(date_row, right, &formats.cell)?;
                }
            }
        }
    }
    Ok(())
}

fn too_large(layout: &SheetLayout) -> ReportError {
    ReportError::TooLarge {
        sheet: layout.name.clone(),
    }
}
