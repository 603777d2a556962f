//! Line protocol spoken with the terrain host
//!
//! A request is a run of lines terminated by `finish`. Inside it, blocks are
//! framed by `begin_training_instance`/`end_training_instance` (or the
//! `inference` pair) and carry `plants` and `heights` sections, each followed
//! by one line of whitespace-separated floats per raster row.

use std::io::{BufRead, Write};

use ndarray::{Array2, ArrayView2};
use tracing::debug;

use crate::error::{ProtocolError, Result};

/// Rows per raster section used by the terrain host
pub const DEFAULT_RASTER_ROWS: usize = 256;

/// Terminates a request
pub const FINISH: &str = "finish";

/// Kind of a delimited block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// Paired heights/plants example
    Training,
    /// Heights to be mapped by the generator
    Inference,
}

impl BlockKind {
    /// Opening sentinel
    pub fn begin(&self) -> &'static str {
        match self {
            BlockKind::Training => "begin_training_instance",
            BlockKind::Inference => "begin_inference_instance",
        }
    }

    /// Closing sentinel
    pub fn end(&self) -> &'static str {
        match self {
            BlockKind::Training => "end_training_instance",
            BlockKind::Inference => "end_inference_instance",
        }
    }

    fn from_begin(line: &str) -> Option<Self> {
        [BlockKind::Training, BlockKind::Inference]
            .into_iter()
            .find(|kind| kind.begin() == line)
    }

    fn from_end(line: &str) -> Option<Self> {
        [BlockKind::Training, BlockKind::Inference]
            .into_iter()
            .find(|kind| kind.end() == line)
    }
}

/// Raster section inside a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// Vegetation density
    Plants,
    /// Terrain height
    Heights,
}

impl Section {
    /// Header line introducing the section
    pub fn header(&self) -> &'static str {
        match self {
            Section::Plants => "plants",
            Section::Heights => "heights",
        }
    }

    fn from_header(line: &str) -> Option<Self> {
        match line {
            "plants" => Some(Section::Plants),
            "heights" => Some(Section::Heights),
            _ => None,
        }
    }
}

/// Sections of one delimited block, in stream order
#[derive(Debug, Clone, PartialEq)]
pub struct RawBlock {
    /// Training or inference framing
    pub kind: BlockKind,
    /// Line number of the opening sentinel (1-based)
    pub line: usize,
    /// Parsed sections; duplicates are kept, the assembler resolves them
    pub sections: Vec<(Section, Array2<f32>)>,
}

/// Reads requests from a line-oriented stream
pub struct StreamParser<R> {
    reader: R,
    rows: usize,
    line_no: usize,
    exhausted: bool,
    buf: Vec<u8>,
}

impl<R: BufRead> StreamParser<R> {
    /// Create a parser expecting 256 rows per section
    pub fn new(reader: R) -> Self {
        Self::with_rows(reader, DEFAULT_RASTER_ROWS)
    }

    /// Create a parser with a custom number of rows per section
    pub fn with_rows(reader: R, rows: usize) -> Self {
        Self {
            reader,
            rows,
            line_no: 0,
            exhausted: false,
            buf: Vec::new(),
        }
    }

    /// Rows expected after each section header
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Whether the underlying stream has reached end of input
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Number of lines consumed so far
    pub fn line_number(&self) -> usize {
        self.line_no
    }

    /// Read one request: every block up to `finish` or end of input.
    ///
    /// The whole request is consumed before any block is parsed, so a
    /// malformed block never leaves the stream mid-request.
    pub fn read_request(&mut self) -> Result<Vec<RawBlock>> {
        let lines = self.read_request_lines()?;
        let blocks = parse_blocks(&lines, self.rows)?;
        debug!(
            "parsed request with {} block(s), ending at line {}",
            blocks.len(),
            self.line_number()
        );
        Ok(blocks)
    }

    fn read_request_lines(&mut self) -> Result<Vec<(usize, String)>> {
        let mut lines = Vec::new();
        let mut invalid = None;
        while self.next_line()? {
            let line_no = self.line_no;
            match std::str::from_utf8(&self.buf) {
                Ok(text) => {
                    let text = text.trim_end();
                    if text == FINISH {
                        break;
                    }
                    lines.push((line_no, text.to_string()));
                }
                Err(_) => {
                    // keep reading so the next request starts after `finish`
                    invalid.get_or_insert(line_no);
                }
            }
        }
        if let Some(line) = invalid {
            return Err(ProtocolError::InvalidEncoding { line }.into());
        }
        Ok(lines)
    }

    /// Load the next raw line into `buf`; false at end of input
    fn next_line(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
            self.exhausted = true;
            return Ok(false);
        }
        self.line_no += 1;
        Ok(true)
    }
}

fn parse_blocks(
    lines: &[(usize, String)],
    rows: usize,
) -> std::result::Result<Vec<RawBlock>, ProtocolError> {
    let mut blocks = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let (line_no, text) = &lines[i];
        if let Some(kind) = BlockKind::from_begin(text) {
            let (block, next) = parse_block(lines, i, kind, rows)?;
            blocks.push(block);
            i = next;
            continue;
        }
        if BlockKind::from_end(text).is_some() {
            return Err(ProtocolError::UnexpectedSentinel {
                line: *line_no,
                sentinel: text.clone(),
            });
        }
        i += 1;
    }
    Ok(blocks)
}

/// Parse the block opened at `start`; returns the block and the index after its end sentinel
fn parse_block(
    lines: &[(usize, String)],
    start: usize,
    kind: BlockKind,
    rows: usize,
) -> std::result::Result<(RawBlock, usize), ProtocolError> {
    let open_line = lines[start].0;
    let mut block = RawBlock {
        kind,
        line: open_line,
        sections: Vec::new(),
    };

    let mut i = start + 1;
    loop {
        let Some((line_no, text)) = lines.get(i) else {
            return Err(ProtocolError::UnterminatedBlock {
                line: open_line,
                expected: kind.end(),
            });
        };

        if text == kind.end() {
            return Ok((block, i + 1));
        }
        if is_sentinel(text) {
            return Err(ProtocolError::UnexpectedSentinel {
                line: *line_no,
                sentinel: text.clone(),
            });
        }
        if let Some(section) = Section::from_header(text) {
            let raster = parse_section(lines, i + 1, rows, section, *line_no)?;
            block.sections.push((section, raster));
            i += 1 + rows;
            continue;
        }
        if !text.is_empty() {
            debug!("ignoring unrecognised line {} inside block", line_no);
        }
        i += 1;
    }
}

fn parse_section(
    lines: &[(usize, String)],
    start: usize,
    rows: usize,
    section: Section,
    header_line: usize,
) -> std::result::Result<Array2<f32>, ProtocolError> {
    let mut values = Vec::new();
    let mut width = None;

    for k in 0..rows {
        let row = lines
            .get(start + k)
            .filter(|(_, text)| !is_sentinel(text) && Section::from_header(text).is_none());
        let Some((line_no, text)) = row else {
            return Err(ProtocolError::TruncatedSection {
                section: section.header(),
                line: header_line,
                expected: rows,
                found: k,
            });
        };

        let before = values.len();
        parse_row(text, *line_no, &mut values)?;
        let found = values.len() - before;
        if found == 0 {
            return Err(ProtocolError::EmptyRow { line: *line_no });
        }
        match width {
            None => width = Some(found),
            Some(expected) if expected != found => {
                return Err(ProtocolError::RaggedRow {
                    line: *line_no,
                    expected,
                    found,
                });
            }
            Some(_) => {}
        }
    }

    let width = width.unwrap_or(0);
    let found = values.len();
    Array2::from_shape_vec((rows, width), values).map_err(|_| ProtocolError::RaggedRow {
        line: header_line,
        expected: rows * width,
        found,
    })
}

fn parse_row(
    text: &str,
    line: usize,
    out: &mut Vec<f32>,
) -> std::result::Result<(), ProtocolError> {
    for token in text.split_whitespace() {
        let value = token.parse::<f32>().map_err(|_| ProtocolError::InvalidValue {
            line,
            token: token.to_string(),
        })?;
        out.push(value);
    }
    Ok(())
}

fn is_sentinel(text: &str) -> bool {
    text == FINISH || BlockKind::from_begin(text).is_some() || BlockKind::from_end(text).is_some()
}

/// Write a raster as protocol rows: one line per row, values separated by a space
pub fn write_raster<W: Write>(
    writer: &mut W,
    raster: ArrayView2<'_, f32>,
) -> std::io::Result<()> {
    for row in raster.rows() {
        let mut first = true;
        for value in row.iter() {
            if first {
                first = false;
            } else {
                writer.write_all(b" ")?;
            }
            write!(writer, "{}", value)?;
        }
        writer.write_all(b"\n")?;
    }
    Ok(())
}

/// Write a complete block the way the terrain host frames it
pub fn write_block<W: Write>(
    writer: &mut W,
    kind: BlockKind,
    sections: &[(Section, ArrayView2<'_, f32>)],
) -> std::io::Result<()> {
    writeln!(writer, "{}", kind.begin())?;
    for (section, raster) in sections {
        writeln!(writer, "{}", section.header())?;
        write_raster(writer, raster.view())?;
    }
    writeln!(writer, "{}", kind.end())
}
