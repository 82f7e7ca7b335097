use std::{
    fs,
    path::{Path, PathBuf},
};

use lopdf::{
    content::{Content, Operation},
    dictionary, Document, Object, ObjectId, Stream, StringFormat,
};
use tracing::info;

pub const DEFAULT_EXPORT_FILENAME: &str = "Generated_Movie_Script_Summary.pdf";

const MM: f32 = 72.0 / 25.4;
const FONT_NAME: &str = "F1";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("pdf error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("failed to serialize pdf: {0}")]
    Serialize(String),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Page geometry, in points. Defaults: A4, 10 mm margins, 15 mm automatic
/// page-break margin, Helvetica 12 pt on 10 mm lines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfLayout {
    pub page_width: f32,
    pub page_height: f32,
    pub margin: f32,
    pub break_margin: f32,
    pub line_height: f32,
    pub font_size: f32,
    pub cell_padding: f32,
}

impl Default for PdfLayout {
    fn default() -> Self {
        Self {
            page_width: 210.0 * MM,
            page_height: 297.0 * MM,
            margin: 10.0 * MM,
            break_margin: 15.0 * MM,
            line_height: 10.0 * MM,
            font_size: 12.0,
            cell_padding: 1.0 * MM,
        }
    }
}

/// One multi-line cell (or the part of it that fits on one page).
#[derive(Debug, Clone, PartialEq)]
struct TextBlock<'a> {
    x: f32,
    baseline: f32,
    rows: Vec<&'a str>,
}

impl PdfLayout {
    fn text_width(&self) -> f32 {
        self.page_width - 2.0 * self.margin - 2.0 * self.cell_padding
    }

    fn string_width(&self, text: &str) -> f32 {
        text.chars().map(|c| glyph_width(c) as f32).sum::<f32>() * self.font_size / 1000.0
    }

    /// Splits a line into rows no wider than the cell. Rows are contiguous
    /// slices of `line`; a break lands after the last space that fits, or
    /// mid-word when a single word is wider than the cell.
    fn wrap<'a>(&self, line: &'a str) -> Vec<&'a str> {
        let max = self.text_width();
        let mut rows = Vec::new();
        let mut start = 0;
        let mut width = 0.0;
        let mut last_break: Option<usize> = None;

        for (index, c) in line.char_indices() {
            let w = glyph_width(c) as f32 * self.font_size / 1000.0;
            if width + w > max && index > start {
                let end = last_break.take().unwrap_or(index);
                rows.push(&line[start..end]);
                width = self.string_width(&line[end..index]);
                start = end;

                if width + w > max && index > start {
                    rows.push(&line[start..index]);
                    width = 0.0;
                    start = index;
                }
            }
            width += w;
            if c == ' ' {
                last_break = Some(index + c.len_utf8());
            }
        }

        rows.push(&line[start..]);
        rows
    }

    /// Lays content out as pages of text blocks, one block per source line
    /// per page it occupies.
    fn paginate<'a>(&self, content: &'a str) -> Vec<Vec<TextBlock<'a>>> {
        let top = self.margin;
        let limit = self.page_height - self.break_margin;
        let x = self.margin + self.cell_padding;
        let baseline_offset = 0.5 * self.line_height + 0.3 * self.font_size;

        let mut pages: Vec<Vec<TextBlock<'a>>> = vec![Vec::new()];
        let mut y = top;

        for line in content.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            let mut block: Option<TextBlock<'a>> = None;

            for row in self.wrap(line) {
                if y + self.line_height > limit {
                    if let Some(done) = block.take() {
                        push_block(&mut pages, done);
                    }
                    pages.push(Vec::new());
                    y = top;
                }

                let current = block.get_or_insert_with(|| TextBlock {
                    x,
                    baseline: self.page_height - (y + baseline_offset),
                    rows: Vec::new(),
                });
                current.rows.push(row);
                y += self.line_height;
            }

            if let Some(done) = block {
                push_block(&mut pages, done);
            }
        }

        pages
    }
}

fn push_block<'a>(pages: &mut [Vec<TextBlock<'a>>], block: TextBlock<'a>) {
    if let Some(page) = pages.last_mut() {
        page.push(block);
    }
}

/// Renders `content` as a PDF, one multi-line cell per `\n`-separated line.
pub fn render_pdf(content: &str) -> Result<Vec<u8>, ExportError> {
    render_pdf_with_layout(content, &PdfLayout::default())
}

pub fn render_pdf_with_layout(content: &str, layout: &PdfLayout) -> Result<Vec<u8>, ExportError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            FONT_NAME => font_id,
        },
    });

    let mut page_ids: Vec<ObjectId> = Vec::new();
    for blocks in layout.paginate(content) {
        let content = Content {
            operations: page_operations(&blocks, layout),
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        page_ids.push(page_id);
    }

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => page_ids.iter().map(|id| Object::from(*id)).collect::<Vec<Object>>(),
        "Count" => page_ids.len() as i64,
        "Resources" => resources_id,
        "MediaBox" => vec![
            Object::from(0),
            Object::from(0),
            Object::from(layout.page_width),
            Object::from(layout.page_height),
        ],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|err| ExportError::Serialize(err.to_string()))?;
    Ok(bytes)
}

fn page_operations(blocks: &[TextBlock<'_>], layout: &PdfLayout) -> Vec<Operation> {
    let mut operations = Vec::new();

    for block in blocks {
        operations.push(Operation::new("BT", vec![]));
        operations.push(Operation::new(
            "Tf",
            vec![FONT_NAME.into(), layout.font_size.into()],
        ));
        operations.push(Operation::new("Td", vec![block.x.into(), block.baseline.into()]));

        for (index, row) in block.rows.iter().enumerate() {
            if index > 0 {
                operations.push(Operation::new(
                    "Td",
                    vec![0.into(), (-layout.line_height).into()],
                ));
            }
            operations.push(Operation::new(
                "Tj",
                vec![Object::String(encode_latin1(row), StringFormat::Literal)],
            ));
        }

        operations.push(Operation::new("ET", vec![]));
    }

    operations
}

/// Core fonts only cover Latin-1; anything else becomes `?`.
fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7E | 0xA0..=0xFF => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

/// Writes the PDF to `path`, or to [`DEFAULT_EXPORT_FILENAME`] in the
/// working directory, and returns where it went.
pub fn save_as_pdf(content: &str, path: Option<&Path>) -> Result<PathBuf, ExportError> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT_FILENAME));
    let bytes = render_pdf(content)?;

    fs::write(&path, &bytes).map_err(|source| ExportError::Io {
        path: path.clone(),
        source,
    })?;

    info!(path = %path.display(), bytes = bytes.len(), "exported summary pdf");
    Ok(path)
}

// Helvetica advance widths (1/1000 em) for printable ASCII.
#[rustfmt::skip]
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

fn glyph_width(c: char) -> u16 {
    match c as u32 {
        code @ 0x20..=0x7E => HELVETICA_WIDTHS[(code - 0x20) as usize],
        _ => 556,
    }
}
