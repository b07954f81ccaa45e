//! Small PDF builder for tests.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use std::path::Path;

pub(crate) struct FixturePage {
    operations: Vec<Operation>,
    images: usize,
}

impl FixturePage {
    pub(crate) fn new(operations: Vec<Operation>) -> Self {
        Self {
            operations,
            images: 0,
        }
    }

    pub(crate) fn with_images(mut self, images: usize) -> Self {
        self.images = images;
        self
    }
}

/// One positioned `Tj` in its own text object. `F1` is Helvetica, `F2` Helvetica-Bold.
pub(crate) fn text_line(font: &str, size: i64, x: i64, y: i64, text: &str) -> Vec<Operation> {
    vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![font.into(), size.into()]),
        Operation::new("Td", vec![x.into(), y.into()]),
        Operation::new("Tj", vec![Object::string_literal(text)]),
        Operation::new("ET", vec![]),
    ]
}

pub(crate) fn write_pdf(path: &Path, pages: Vec<FixturePage>) {
    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();

    let regular = document.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold = document.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut kids = Vec::new();
    for page in pages {
        let mut resources = dictionary! {
            "Font" => dictionary! {
                "F1" => regular,
                "F2" => bold,
            },
        };

        if page.images > 0 {
            let mut xobjects = Dictionary::new();
            for index in 0..page.images {
                let image = document.add_object(Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "Width" => 1,
                        "Height" => 1,
                        "ColorSpace" => "DeviceGray",
                        "BitsPerComponent" => 8,
                    },
                    vec![0u8],
                ));
                xobjects.set(format!("Im{}", index + 1), image);
            }
            resources.set("XObject", xobjects);
        }

        let content = Content {
            operations: page.operations,
        };
        let content_id = document.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("fixture content should encode"),
        ));
        let page_id = document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources,
        });
        kids.push(Object::from(page_id));
    }

    let count = kids.len() as i64;
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );

    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);
    document.save(path).expect("fixture pdf should save");
}

/// Three pages: a size-18 "Scope" heading, a 2x2 table, and a bold line with
/// two image XObjects.
pub(crate) fn write_sample_sop(path: &Path) {
    let mut first = text_line("F1", 18, 72, 760, "Scope");
    first.extend(text_line("F1", 10, 72, 740, "This procedure applies to all batches."));

    let mut table = text_line("F1", 10, 72, 700, "Parameter");
    table.extend(text_line("F1", 10, 300, 700, "Limit"));
    table.extend(text_line("F1", 10, 72, 686, "Temperature"));
    table.extend(text_line("F1", 10, 300, 686, "25C"));

    write_pdf(
        path,
        vec![
            FixturePage::new(first),
            FixturePage::new(table),
            FixturePage::new(text_line("F2", 10, 72, 700, "Approval")).with_images(2),
        ],
    );
}
