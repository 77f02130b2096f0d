//! Appendix PDF layout
//!
//! A4 pages: the original document as the cover, then one text section per
//! appendix, set in the standard Helvetica font so no font is embedded.

use image::RgbImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

/// A4 in points
pub const PAGE_WIDTH: f32 = 595.28;
pub const PAGE_HEIGHT: f32 = 841.89;

const COVER_MARGIN: f32 = 36.0;
const TEXT_MARGIN: f32 = 50.0;
const TITLE_SIZE: f32 = 16.0;
const BODY_SIZE: f32 = 11.0;
const LINE_HEIGHT: f32 = 14.0;
const TITLE_GAP: f32 = 26.0;
const NOTICE_SIZE: f32 = 12.0;

/// Helvetica advance widths for ' '..='~', in 1/1000 em
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // digits
    278, 278, 584, 584, 584, 556, 1015, // ':'..'@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, 667, 778, 722, 667,
    611, 722, 667, 944, 667, 667, 611, // 'A'..'Z'
    278, 278, 278, 469, 556, 333, // '['..'`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, 556, 556, 333, 500,
    278, 556, 500, 722, 500, 500, 500, // 'a'..'z'
    334, 260, 334, 584, // '{'..'~'
];

/// First page of the export
#[derive(Debug, Clone)]
pub enum CoverPage {
    /// The original, rendered to pixels
    Image(RgbImage),
    /// Explanation shown when the original cannot be rendered
    Notice(String),
}

#[derive(Debug, Clone)]
pub struct AppendixSection {
    pub title: String,
    pub body: String,
}

/// Lay out the cover and sections and serialize the PDF.
pub fn build(cover: &CoverPage, sections: &[AppendixSection]) -> Result<Vec<u8>, lopdf::Error> {
    let mut pdf = PdfBuilder::new();

    match cover {
        CoverPage::Image(image) => pdf.add_image_page(image)?,
        CoverPage::Notice(text) => pdf.add_notice_page(text)?,
    }
    for section in sections {
        pdf.add_text_section(&section.title, &section.body)?;
    }

    pdf.finish()
}

/// Map text onto what Helvetica with WinAnsiEncoding can show.
///
/// Common typographic characters get ASCII stand-ins; anything outside
/// Latin-1 is dropped. Newlines are kept.
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{2192}' => out.push_str("->"),
            '\u{2190}' => out.push_str("<-"),
            '\u{2194}' => out.push_str("<->"),
            '\u{201C}' | '\u{201D}' => out.push('"'),
            '\u{2018}' | '\u{2019}' => out.push('\''),
            '\u{2013}' | '\u{2014}' | '\u{2022}' => out.push('-'),
            '\u{00A0}' | '\t' => out.push(' '),
            '\n' | ' '..='~' | '\u{00A1}'..='\u{00FF}' => out.push(c),
            _ => {}
        }
    }
    out
}

fn char_width(c: char) -> u32 {
    match c {
        ' '..='~' => HELVETICA_WIDTHS[(c as usize) - 0x20] as u32,
        _ => 556,
    }
}

/// Rendered width of `text` in points
pub fn text_width(text: &str, font_size: f32) -> f32 {
    let units: u32 = text.chars().map(char_width).sum();
    units as f32 * font_size / 1000.0
}

/// Greedy word wrap. Blank paragraphs stay as empty lines and words wider
/// than a line are broken by character.
pub fn wrap_text(text: &str, font_size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();

    for paragraph in text.split('\n') {
        if paragraph.trim().is_empty() {
            lines.push(String::new());
            continue;
        }

        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", current, word)
            };
            if text_width(&candidate, font_size) <= max_width {
                current = candidate;
                continue;
            }

            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if text_width(word, font_size) <= max_width {
                current = word.to_string();
            } else {
                for c in word.chars() {
                    current.push(c);
                    if text_width(&current, font_size) > max_width {
                        current.pop();
                        lines.push(std::mem::replace(&mut current, c.to_string()));
                    }
                }
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }

    lines
}

/// WinAnsi bytes of already sanitized text
fn encode(text: &str) -> Vec<u8> {
    text.chars()
        .filter_map(|c| u8::try_from(c as u32).ok())
        .collect()
}

fn show_text(x: f32, y: f32, size: f32, text: &str) -> Vec<Operation> {
    vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), size.into()]),
        Operation::new("Td", vec![x.into(), y.into()]),
        Operation::new("Tj", vec![Object::string_literal(encode(text))]),
        Operation::new("ET", vec![]),
    ]
}

struct PdfBuilder {
    doc: Document,
    pages_id: ObjectId,
    font_id: ObjectId,
    kids: Vec<Object>,
}

impl PdfBuilder {
    fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });

        Self {
            doc,
            pages_id,
            font_id,
            kids: Vec::new(),
        }
    }

    fn add_page(&mut self, operations: Vec<Operation>, xobjects: Dictionary) -> Result<(), lopdf::Error> {
        let content = Content { operations }.encode()?;
        let content_id = self.doc.add_object(Stream::new(dictionary! {}, content));

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => self.font_id },
                "XObject" => xobjects,
            },
        });
        self.kids.push(page_id.into());
        Ok(())
    }

    /// Image centred on the page, scaled to fit inside the margins
    fn add_image_page(&mut self, image: &RgbImage) -> Result<(), lopdf::Error> {
        let (width, height) = (image.width().max(1) as f32, image.height().max(1) as f32);
        let image_id = self.doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => image.width() as i64,
                "Height" => image.height() as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            image.as_raw().clone(),
        ));

        let scale = ((PAGE_WIDTH - COVER_MARGIN * 2.0) / width)
            .min((PAGE_HEIGHT - COVER_MARGIN * 2.0) / height);
        let (draw_w, draw_h) = (width * scale, height * scale);
        let x = (PAGE_WIDTH - draw_w) / 2.0;
        let y = (PAGE_HEIGHT - draw_h) / 2.0;

        let operations = vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![draw_w.into(), 0.into(), 0.into(), draw_h.into(), x.into(), y.into()],
            ),
            Operation::new("Do", vec!["Im1".into()]),
            Operation::new("Q", vec![]),
        ];
        self.add_page(operations, dictionary! { "Im1" => image_id })
    }

    fn add_notice_page(&mut self, text: &str) -> Result<(), lopdf::Error> {
        let mut operations = Vec::new();
        let mut y = PAGE_HEIGHT - 62.0;
        for line in wrap_text(&sanitize(text), NOTICE_SIZE, PAGE_WIDTH - 100.0) {
            operations.extend(show_text(50.0, y, NOTICE_SIZE, &line));
            y -= NOTICE_SIZE + 4.0;
        }
        self.add_page(operations, Dictionary::new())
    }

    /// Title then wrapped body, continuing onto as many pages as needed
    fn add_text_section(&mut self, title: &str, body: &str) -> Result<(), lopdf::Error> {
        let max_width = PAGE_WIDTH - TEXT_MARGIN * 2.0;

        let mut y = PAGE_HEIGHT - TEXT_MARGIN;
        let mut operations = show_text(TEXT_MARGIN, y, TITLE_SIZE, &sanitize(title));
        y -= TITLE_GAP;

        for line in wrap_text(&sanitize(body), BODY_SIZE, max_width) {
            if y <= TEXT_MARGIN {
                self.add_page(std::mem::take(&mut operations), Dictionary::new())?;
                y = PAGE_HEIGHT - TEXT_MARGIN;
            }
            if !line.is_empty() {
                operations.extend(show_text(TEXT_MARGIN, y, BODY_SIZE, &line));
            }
            y -= LINE_HEIGHT;
        }

        self.add_page(operations, Dictionary::new())
    }

    fn finish(mut self) -> Result<Vec<u8>, lopdf::Error> {
        let count = self.kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => self.kids,
                "Count" => count,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc.compress();

        let mut bytes = Vec::new();
        self.doc.save_to(&mut bytes)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_text(doc: &Document, page_no: u32) -> String {
        let pages = doc.get_pages();
        let content = doc.get_page_content(pages[&page_no]).unwrap();
        String::from_utf8_lossy(&content).into_owned()
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("a \u{2192} b"), "a -> b");
        assert_eq!(sanitize("\u{201C}total\u{201D} \u{2014} 10"), "\"total\" - 10");
        assert_eq!(sanitize("Nota fiscal n\u{00BA} 5, S\u{00E3}o Paulo"), "Nota fiscal n\u{00BA} 5, S\u{00E3}o Paulo");
        assert_eq!(sanitize("ok \u{1F600}\tdone\n"), "ok  done\n");
    }

    #[test]
    fn test_encode_is_latin1() {
        assert_eq!(encode("S\u{00E3}o"), vec![b'S', 0xE3, b'o']);
    }

    #[test]
    fn test_text_width() {
        // "Hi" = 722 + 222
        assert!((text_width("Hi", 10.0) - 9.44).abs() < 0.001);
    }

    #[test]
    fn test_wrap_text() {
        let lines = wrap_text("alpha beta gamma\n\ndelta", BODY_SIZE, text_width("alpha beta", BODY_SIZE));
        assert_eq!(lines, vec!["alpha beta", "gamma", "", "delta"]);

        let long = "x".repeat(30);
        let lines = wrap_text(&long, 10.0, text_width(&"x".repeat(10), 10.0));
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l.chars().count() == 10));
    }

    #[test]
    fn test_build_image_cover_and_sections() {
        let cover = CoverPage::Image(RgbImage::from_pixel(40, 20, image::Rgb([200, 10, 10])));
        let sections = vec![
            AppendixSection {
                title: "OCR - Extracted text".to_string(),
                body: "TOTAL R$ 10,00".to_string(),
            },
            AppendixSection {
                title: "Chat - LLM interactions".to_string(),
                body: "[2026-01-02 03:04:05] USER: What is the total?".to_string(),
            },
        ];

        let bytes = build(&cover, &sections).unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));

        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
        assert!(page_text(&doc, 1).contains("/Im1 Do"));
        assert!(page_text(&doc, 2).contains("(TOTAL R$ 10,00)"));
        assert!(page_text(&doc, 3).contains("USER: What is the total?"));
    }

    #[test]
    fn test_long_section_spans_pages() {
        let body = (1..=120).map(|i| format!("line {}", i)).collect::<Vec<_>>().join("\n");
        let bytes = build(
            &CoverPage::Notice("Original unavailable".to_string()),
            &[AppendixSection {
                title: "OCR".to_string(),
                body,
            }],
        )
        .unwrap();

        let doc = Document::load_mem(&bytes).unwrap();
        // cover plus a body of 120 lines at about 52 lines per page
        assert_eq!(doc.get_pages().len(), 4);
        assert!(page_text(&doc, 1).contains("(Original unavailable)"));
        assert!(page_text(&doc, 4).contains("(line 120)"));
    }
}
