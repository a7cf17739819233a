//! PDF fixtures for integration tests
//!
//! Coordinates passed to the builders are PDF user space (origin bottom-left),
//! the same numbers a content stream would carry.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use unmark_core::{LopdfBackend, PdfBackend, PdfDocument};

pub const LETTER: (f64, f64) = (612.0, 792.0);

/// Rectangle given as `x, y, width, height`
pub type Area = (f64, f64, f64, f64);

/// Corner spot on a Letter page, inside the bottom-right 30% region
pub const CORNER_IMAGE: Area = (500.0, 20.0, 80.0, 30.0);
pub const CORNER_LINK: Area = (495.0, 15.0, 90.0, 40.0);
/// A second corner spot that no link covers
pub const CORNER_BACKGROUND: Area = (450.0, 60.0, 40.0, 20.0);
/// Top-left of the page, nowhere near the corner
pub const HEADER_IMAGE: Area = (40.0, 700.0, 120.0, 60.0);

/// Text plus an inline image with binary data, written ahead of the XObject draws
pub const TEXT_AND_INLINE_IMAGE: &[u8] = b"BT /F1 12 Tf 72 700 Td (Keep me) Tj ET\n\
q 12.5 0 0 12.5 300.0625 400 cm BI /W 2 /H 1 /CS /G /BPC 8 ID \x80\xff EI Q\n";

pub struct TestPage {
    width: f64,
    height: f64,
    xobjects: Vec<(String, ObjectId)>,
    draws: Vec<(String, Area)>,
    links: Vec<(Area, Option<String>)>,
    raw: Vec<u8>,
}

impl TestPage {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            xobjects: Vec::new(),
            draws: Vec::new(),
            links: Vec::new(),
            raw: Vec::new(),
        }
    }

    pub fn letter() -> Self {
        Self::new(LETTER.0, LETTER.1)
    }

    /// Register `image` under resource `name` and paint it at each area
    pub fn image(mut self, name: &str, image: ObjectId, areas: &[Area]) -> Self {
        self.xobjects.push((name.to_string(), image));
        for area in areas {
            self.draws.push((name.to_string(), *area));
        }
        self
    }

    /// Register `form` under resource `name` and paint it untransformed;
    /// the form's own `/Matrix` places its content
    pub fn form(mut self, name: &str, form: ObjectId) -> Self {
        self.xobjects.push((name.to_string(), form));
        self.draws.push((name.to_string(), (0.0, 0.0, 1.0, 1.0)));
        self
    }

    /// Content bytes inserted verbatim before the XObject draws
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.raw.extend_from_slice(bytes);
        self
    }

    pub fn link(mut self, area: Area, uri: &str) -> Self {
        self.links.push((area, Some(uri.to_string())));
        self
    }

    /// Link annotation without any URI action
    pub fn bare_link(mut self, area: Area) -> Self {
        self.links.push((area, None));
        self
    }
}

pub struct TestPdf {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<ObjectId>,
}

impl Default for TestPdf {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPdf {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    /// 1x1 grey image XObject
    pub fn add_image(&mut self) -> ObjectId {
        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 1,
                "Height" => 1,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            vec![0x80],
        );
        self.doc.add_object(stream)
    }

    /// Form XObject painting `image` over `area` through its `/Matrix`
    pub fn add_form(&mut self, image: ObjectId, area: Area) -> ObjectId {
        let (x, y, w, h) = area;
        let stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![0.into(), 0.into(), 1.into(), 1.into()],
                "Matrix" => vec![real(w), 0.into(), 0.into(), real(h), real(x), real(y)],
                "Resources" => dictionary! {
                    "XObject" => dictionary! { "Im0" => Object::Reference(image) },
                },
            },
            b"q /Im0 Do Q".to_vec(),
        );
        self.doc.add_object(stream)
    }

    pub fn add_page(&mut self, page: TestPage) -> &mut Self {
        // some ordinary page content that must survive cleaning
        let background = Content {
            operations: vec![
                Operation::new("re", vec![real(36.0), real(36.0), real(100.0), real(20.0)]),
                Operation::new("f", vec![]),
            ],
        };
        let mut draws = Vec::new();
        for (name, (x, y, w, h)) in &page.draws {
            draws.push(Operation::new("q", vec![]));
            draws.push(Operation::new(
                "cm",
                vec![real(*w), 0.into(), 0.into(), real(*h), real(*x), real(*y)],
            ));
            draws.push(Operation::new(
                "Do",
                vec![Object::Name(name.as_bytes().to_vec())],
            ));
            draws.push(Operation::new("Q", vec![]));
        }

        let mut content = background.encode().unwrap();
        content.push(b'\n');
        content.extend_from_slice(&page.raw);
        content.extend(Content { operations: draws }.encode().unwrap());
        let content_id = self
            .doc
            .add_object(Stream::new(Dictionary::new(), content));

        let mut xobjects = Dictionary::new();
        for (name, id) in &page.xobjects {
            xobjects.set(name.as_bytes().to_vec(), Object::Reference(*id));
        }

        let mut annots = Vec::new();
        for ((x, y, w, h), uri) in &page.links {
            let mut annot = dictionary! {
                "Type" => "Annot",
                "Subtype" => "Link",
                "Rect" => vec![real(*x), real(*y), real(x + w), real(y + h)],
                "Border" => vec![0.into(), 0.into(), 0.into()],
            };
            if let Some(uri) = uri {
                annot.set(
                    "A",
                    dictionary! {
                        "S" => "URI",
                        "URI" => Object::string_literal(uri.as_str()),
                    },
                );
            }
            annots.push(Object::Reference(self.doc.add_object(annot)));
        }

        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(self.pages_id),
            "MediaBox" => vec![0.into(), 0.into(), real(page.width), real(page.height)],
            "Contents" => Object::Reference(content_id),
            "Resources" => dictionary! { "XObject" => xobjects },
            "Annots" => annots,
        });
        self.kids.push(page_id);
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut doc = self.doc.clone();
        let kids: Vec<Object> = self.kids.iter().map(|id| Object::Reference(*id)).collect();
        doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => self.kids.len() as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(self.pages_id),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.to_bytes()).unwrap();
        path
    }
}

fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

/// Page 0 carries a linked corner logo; page 1 is plain content
pub fn two_page_watermarked(dir: &Path) -> PathBuf {
    let mut pdf = TestPdf::new();
    let logo = pdf.add_image();
    let photo = pdf.add_image();
    pdf.add_page(
        TestPage::letter()
            .image("Im0", logo, &[CORNER_IMAGE])
            .link(CORNER_LINK, "https://gamma.app/foo"),
    );
    pdf.add_page(TestPage::letter().image("Im0", photo, &[HEADER_IMAGE]));
    pdf.write(dir, "input.pdf")
}

/// Decoded content of one page
pub fn page_content(path: &Path, page: usize) -> Vec<u8> {
    let doc = Document::load(path).unwrap();
    let page_id = doc.get_pages().into_values().nth(page).unwrap();
    doc.get_page_content(page_id).unwrap()
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

/// Snapshot of what the capability interface reports for a file
#[derive(Debug, PartialEq)]
pub struct Inventory {
    pub pages: usize,
    /// Placements per page
    pub images: Vec<usize>,
    /// Link URIs per page, in annotation order
    pub links: Vec<Vec<String>>,
}

impl Inventory {
    pub fn of(path: &Path) -> Self {
        let doc = LopdfBackend.open(path).unwrap();
        let pages = doc.page_count();
        let images = (0..pages)
            .map(|p| {
                doc.images(p)
                    .unwrap()
                    .iter()
                    .map(|image| image.placements.len())
                    .sum::<usize>()
            })
            .collect();
        let links = (0..pages)
            .map(|p| doc.links(p).unwrap().into_iter().map(|l| l.uri).collect())
            .collect();
        Self {
            pages,
            images,
            links,
        }
    }

    pub fn total_images(&self) -> usize {
        self.images.iter().sum()
    }

    pub fn total_links(&self) -> usize {
        self.links.iter().map(Vec::len).sum()
    }
}
