//! Plain text PDF 1.4 documents: one Helvetica face, fixed leading, A4 pages.

use std::fmt::Write as _;

const PAGE_WIDTH: u32 = 595;
const PAGE_HEIGHT: u32 = 842;
const MARGIN: u32 = 50;
const TITLE_SIZE: u32 = 14;
const FONT_SIZE: u32 = 10;
const LEADING: u32 = 14;
/// Helvetica at 10pt fits roughly this many characters between the margins.
const WRAP_AT: usize = 95;

pub const LINES_PER_PAGE: usize = ((PAGE_HEIGHT - 2 * MARGIN) / LEADING) as usize;

#[derive(Debug, Clone)]
pub struct PdfDocument {
    title: String,
    lines: Vec<String>,
}

impl PdfDocument {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            lines: vec![],
        }
    }

    pub fn line(&mut self, text: impl AsRef<str>) {
        for raw in text.as_ref().lines() {
            self.lines.extend(wrap(raw, WRAP_AT));
        }
        if text.as_ref().is_empty() {
            self.lines.push(String::new());
        }
    }

    pub fn blank(&mut self) {
        self.lines.push(String::new());
    }

    fn pages(&self) -> Vec<&[String]> {
        // the title takes two lines on the first page
        let first = LINES_PER_PAGE - 2;
        let (head, rest) = self.lines.split_at(self.lines.len().min(first));

        let mut pages = vec![head];
        pages.extend(rest.chunks(LINES_PER_PAGE));
        pages
    }

    pub fn page_count(&self) -> usize {
        self.pages().len()
    }

    pub fn render(&self) -> Vec<u8> {
        let pages = self.pages();

        // 1: catalog, 2: page tree, 3: font, then a page and a content stream per page
        let page_ids: Vec<usize> = (0..pages.len()).map(|i| 4 + i * 2).collect();

        let mut objects: Vec<Vec<u8>> = vec![
            b"<< /Type /Catalog /Pages 2 0 R >>".to_vec(),
            format!(
                "<< /Type /Pages /Kids [{}] /Count {} >>",
                page_ids
                    .iter()
                    .map(|id| format!("{id} 0 R"))
                    .collect::<Vec<_>>()
                    .join(" "),
                pages.len()
            )
            .into_bytes(),
            b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
                .to_vec(),
        ];

        for (index, lines) in pages.iter().enumerate() {
            let content_id = page_ids[index] + 1;
            objects.push(
                format!(
                    "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
                     /Resources << /Font << /F1 3 0 R >> >> /Contents {content_id} 0 R >>"
                )
                .into_bytes(),
            );

            let stream = self.content_stream(index, lines);
            let mut object = format!("<< /Length {} >>\nstream\n", stream.len()).into_bytes();
            object.extend_from_slice(&stream);
            object.extend_from_slice(b"\nendstream");
            objects.push(object);
        }

        let mut out = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::with_capacity(objects.len());
        for (i, object) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
            out.extend_from_slice(object);
            out.extend_from_slice(b"\nendobj\n");
        }

        let xref_offset = out.len();
        let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
        for offset in offsets {
            let _ = write!(xref, "{offset:010} 00000 n \n");
        }
        let _ = write!(
            xref,
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
            objects.len() + 1
        );
        out.extend_from_slice(xref.as_bytes());

        out
    }

    fn content_stream(&self, page: usize, lines: &[String]) -> Vec<u8> {
        let top = PAGE_HEIGHT - MARGIN;
        let mut stream = Vec::new();

        stream.extend_from_slice(b"BT\n");
        if page == 0 {
            stream.extend_from_slice(
                format!("/F1 {TITLE_SIZE} Tf\n{MARGIN} {top} Td\n").as_bytes(),
            );
            push_text(&mut stream, &self.title);
            stream.extend_from_slice(
                format!("/F1 {FONT_SIZE} Tf\n0 -{} Td\n", LEADING * 2).as_bytes(),
            );
        } else {
            stream.extend_from_slice(format!("/F1 {FONT_SIZE} Tf\n{MARGIN} {top} Td\n").as_bytes());
        }

        for (i, line) in lines.iter().enumerate() {
            if i > 0 {
                stream.extend_from_slice(format!("0 -{LEADING} Td\n").as_bytes());
            }
            push_text(&mut stream, line);
        }
        stream.extend_from_slice(b"ET");

        stream
    }
}

/// Emits a `Tj` string operator, escaping delimiters and narrowing to single-byte encoding.
fn push_text(stream: &mut Vec<u8>, text: &str) {
    stream.push(b'(');
    for ch in text.chars() {
        match ch {
            '(' | ')' | '\\' => {
                stream.push(b'\\');
                stream.push(ch as u8);
            }
            '\t' => stream.push(b' '),
            c if (c as u32) < 0x20 => {}
            c => stream.push(u8::try_from(u32::from(c)).unwrap_or(b'?')),
        }
    }
    stream.extend_from_slice(b") Tj\n");
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = vec![];
    let mut current = String::new();

    for word in text.split(' ') {
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };

        if needed > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);

        while current.chars().count() > width {
            let split = current
                .char_indices()
                .nth(width)
                .map(|(i, _)| i)
                .unwrap_or(current.len());
            let tail = current.split_off(split);
            lines.push(std::mem::replace(&mut current, tail));
        }
    }
    lines.push(current);

    lines
}
