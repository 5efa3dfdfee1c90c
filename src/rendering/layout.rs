/// Table layout for grid captures.
///
/// Cells are laid out on a fixed-advance text metric: every column is as
/// wide as its longest cell text plus padding, every row one line high.

use super::raster::{GLYPH_ADVANCE, LINE_HEIGHT};
use scraper::{ElementRef, Html, Selector};

pub const CELL_PADDING: u32 = 6;
pub const BORDER: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxModel {
    pub border: u32,
    pub padding: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutBox {
    pub rect: Rect,
    pub box_model: BoxModel,
}

impl LayoutBox {
    pub fn content_width(&self) -> u32 {
        let total = 2 * (self.box_model.border + self.box_model.padding);
        self.rect.width.saturating_sub(total)
    }

    /// Top-left corner of the content area
    pub fn content_origin(&self) -> (i32, i32) {
        let inset = (self.box_model.border + self.box_model.padding) as i32;
        (self.rect.x + inset, self.rect.y + inset)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellBox {
    pub lb: LayoutBox,
    pub text: String,
    pub header: bool,
    pub row: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridLayout {
    pub width: u32,
    /// Height of the whole table
    pub natural_height: u32,
    /// Height actually rendered (clipped in live mode)
    pub height: u32,
    pub rows: usize,
    pub columns: usize,
    pub cells: Vec<CellBox>,
}

impl GridLayout {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Lay out the first table in `document`. With `clip`, rendering stops at that height.
pub fn layout_grid(document: &Html, clip: Option<u32>) -> GridLayout {
    let rows = table_rows(document);
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);

    let mut col_widths = vec![2 * CELL_PADDING + BORDER; columns];
    for row in &rows {
        for (c, (text, _)) in row.iter().enumerate() {
            let w = text.chars().count() as u32 * GLYPH_ADVANCE as u32 + 2 * CELL_PADDING + BORDER;
            col_widths[c] = col_widths[c].max(w);
        }
    }
    let row_h = LINE_HEIGHT as u32 + 2 * CELL_PADDING + BORDER;

    let mut cells = Vec::new();
    let mut y = 0u32;
    for (r, row) in rows.iter().enumerate() {
        if let Some(limit) = clip {
            if y >= limit {
                break;
            }
        }
        let mut x = 0u32;
        for (c, (text, header)) in row.iter().enumerate() {
            cells.push(CellBox {
                lb: LayoutBox {
                    rect: Rect { x: x as i32, y: y as i32, width: col_widths[c], height: row_h },
                    box_model: BoxModel { border: BORDER, padding: CELL_PADDING },
                },
                text: text.clone(),
                header: *header,
                row: r,
                col: c,
            });
            x += col_widths[c];
        }
        y += row_h;
    }

    let width = if columns == 0 { 0 } else { col_widths.iter().sum::<u32>() + BORDER };
    let natural_height = if rows.is_empty() { 0 } else { rows.len() as u32 * row_h + BORDER };
    let height = clip.map_or(natural_height, |c| c.min(natural_height));

    GridLayout { width, natural_height, height, rows: rows.len(), columns, cells }
}

// (text, is_header) per cell, per row
fn table_rows(document: &Html) -> Vec<Vec<(String, bool)>> {
    let (Ok(table_sel), Ok(row_sel), Ok(cell_sel)) =
        (Selector::parse("table"), Selector::parse("tr"), Selector::parse("th, td"))
    else {
        return Vec::new();
    };
    let Some(table) = document.select(&table_sel).next() else {
        return Vec::new();
    };
    table
        .select(&row_sel)
        .map(|tr| {
            tr.select(&cell_sel)
                .filter(|cell| parent_row(cell).map(|p| p.id()) == Some(tr.id()))
                .map(|cell| {
                    let text = cell.text().collect::<Vec<_>>().join(" ");
                    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
                    (text, cell.value().name() == "th")
                })
                .collect()
        })
        .collect()
}

fn parent_row<'a>(cell: &ElementRef<'a>) -> Option<ElementRef<'a>> {
    cell.ancestors().filter_map(ElementRef::wrap).find(|e| e.value().name() == "tr")
}

/// Height at which a live grid container clips its content, from its inline style.
///
/// Only a scrolling or hidden overflow with a pixel `max-height`/`height` clips.
pub fn live_clip(root_style: Option<&str>) -> Option<u32> {
    let style = root_style?;
    let mut overflow_clips = false;
    let mut limit = None;
    for decl in style.split(';') {
        let Some((prop, value)) = decl.split_once(':') else { continue };
        let (prop, value) = (prop.trim().to_ascii_lowercase(), value.trim().to_ascii_lowercase());
        match prop.as_str() {
            "overflow" | "overflow-y" => {
                overflow_clips = matches!(value.as_str(), "auto" | "scroll" | "hidden")
            }
            "max-height" | "height" => {
                if let Some(px) = value.strip_suffix("px").and_then(|v| v.trim().parse::<f64>().ok()) {
                    limit = Some(px.max(0.0) as u32);
                }
            }
            _ => {}
        }
    }
    if overflow_clips {
        limit
    } else {
        None
    }
}

/// Inline `style` attribute of the first element in a fragment
pub fn root_style(fragment: &Html) -> Option<String> {
    fragment
        .root_element()
        .children()
        .find_map(ElementRef::wrap)
        .and_then(|el| el.value().attr("style").map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRID: &str = r#"<div class="grid" style="max-height: 40px; overflow: auto">
        <table>
          <thead><tr><th>Case</th><th>Status</th></tr></thead>
          <tbody>
            <tr><td>C-1</td><td>open</td></tr>
            <tr><td>C-22</td><td>closed</td></tr>
            <tr><td>C-333</td><td>open</td></tr>
          </tbody>
        </table></div>"#;

    #[test]
    fn columns_fit_the_longest_text() {
        let doc = Html::parse_fragment(GRID);
        let layout = layout_grid(&doc, None);
        assert_eq!(layout.rows, 4);
        assert_eq!(layout.columns, 2);
        // "C-333" = 5 chars, "closed"/"Status" = 6 chars
        assert_eq!(layout.cells[0].lb.rect.width, 5 * 8 + 13);
        assert_eq!(layout.cells[1].lb.rect.width, 6 * 8 + 13);
        assert_eq!(layout.width, 53 + 61 + 1);
        assert_eq!(layout.natural_height, 4 * 21 + 1);
        assert!(layout.cells[0].header);
        assert!(!layout.cells[2].header);
    }

    #[test]
    fn clip_limits_rendered_rows() {
        let doc = Html::parse_fragment(GRID);
        let layout = layout_grid(&doc, Some(40));
        assert_eq!(layout.height, 40);
        // rows start at 0 and 21; the third starts at 42, past the clip
        assert_eq!(layout.cells.len(), 4);
        assert_eq!(layout.natural_height, 85);
    }

    #[test]
    fn live_clip_needs_overflow_and_pixel_height() {
        assert_eq!(live_clip(Some("max-height: 40px; overflow: auto")), Some(40));
        assert_eq!(live_clip(Some("max-height: 40px")), None);
        assert_eq!(live_clip(Some("overflow-y: scroll; height: 12.5px")), Some(12));
        assert_eq!(live_clip(Some("overflow: visible; max-height: 40px")), None);
        assert_eq!(live_clip(None), None);
    }

    #[test]
    fn root_style_reads_container_attribute() {
        let doc = Html::parse_fragment(GRID);
        assert_eq!(root_style(&doc).as_deref(), Some("max-height: 40px; overflow: auto"));
    }

    #[test]
    fn no_table_means_empty_layout() {
        let doc = Html::parse_fragment("<div>No rows</div>");
        let layout = layout_grid(&doc, None);
        assert!(layout.is_empty());
        assert_eq!(layout.width, 0);
    }
}
