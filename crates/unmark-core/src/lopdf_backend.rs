//! lopdf implementation of the capability interface
//!
//! Image placements come from walking the page content stream and tracking
//! the current transformation matrix through `q`/`Q`/`cm` up to each `Do`.
//! Form XObjects are walked too, with their `/Matrix` applied, so an image
//! wrapped in a form is seen where the form puts it. Inline images are not
//! objects and are left alone.
//!
//! Deleting an image cuts its `Do` operators out of the raw content bytes
//! (see [`crate::content`]); the rest of each stream is kept byte for byte.

use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use crate::backend::{ImageId, LinkAnnotation, PageImage, PdfBackend, PdfDocument};
use crate::content::{self, ContentOp};
use crate::error::UnmarkError;
use crate::geometry::{Matrix, Rect};

/// Depth limit when following `/Parent` for inherited page attributes
const MAX_INHERITANCE_DEPTH: usize = 32;

/// Nesting limit for forms drawing forms
const MAX_FORM_DEPTH: usize = 8;

/// US Letter, used when a page has neither CropBox nor MediaBox
const FALLBACK_PAGE_BOX: Rect = Rect {
    x0: 0.0,
    y0: 0.0,
    x1: 612.0,
    y1: 792.0,
};

/// Opens documents from disk with [`lopdf::Document::load`]
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfBackend;

impl PdfBackend for LopdfBackend {
    type Document = LopdfDocument;

    fn open(&self, path: &Path) -> Result<LopdfDocument, UnmarkError> {
        let doc = Document::load(path)
            .map_err(|e| UnmarkError::Open(format!("{}: {}", path.display(), e)))?;
        Ok(LopdfDocument::new(doc))
    }
}

pub struct LopdfDocument {
    doc: Document,
    pages: Vec<ObjectId>,
}

impl LopdfDocument {
    pub fn new(doc: Document) -> Self {
        let pages = doc.get_pages().into_values().collect();
        Self { doc, pages }
    }

    pub fn load_mem(bytes: &[u8]) -> Result<Self, UnmarkError> {
        let doc = Document::load_mem(bytes).map_err(|e| UnmarkError::Open(e.to_string()))?;
        Ok(Self::new(doc))
    }

    fn page_id(&self, page: usize) -> Result<ObjectId, UnmarkError> {
        self.pages.get(page).copied().ok_or_else(|| {
            UnmarkError::Page(format!(
                "page {} does not exist (document has {} pages)",
                page,
                self.pages.len()
            ))
        })
    }

    fn page_dict(&self, page_id: ObjectId) -> Result<&Dictionary, UnmarkError> {
        self.doc
            .get_dictionary(page_id)
            .map_err(|e| UnmarkError::Page(e.to_string()))
    }

    fn page_space(&self, page_id: ObjectId) -> PageSpace {
        PageSpace {
            user_box: page_box(&self.doc, page_id),
        }
    }

    /// Drops every `Do` of `target` from `bytes`, drawn with `resources`,
    /// and from the forms those resources name. Changed forms are replaced by
    /// new objects referenced only from the edited resources.
    ///
    /// Returns the new content bytes, or `None` when `target` is not
    /// reachable from here.
    fn strip_image(
        &mut self,
        bytes: &[u8],
        resources: &mut Dictionary,
        target: ObjectId,
        depth: usize,
    ) -> Result<Option<Vec<u8>>, UnmarkError> {
        let mut xobjects = match xobject_dict(&self.doc, resources) {
            Some(dict) => dict.clone(),
            None => return Ok(None),
        };

        let image_names: Vec<Vec<u8>> = xobjects
            .iter()
            .filter(|(_, obj)| matches!(obj, Object::Reference(id) if *id == target))
            .map(|(name, _)| name.clone())
            .collect();
        let mut changed = !image_names.is_empty();
        for name in &image_names {
            xobjects.remove(name);
        }

        if depth < MAX_FORM_DEPTH {
            let forms: Vec<(Vec<u8>, ObjectId)> = xobjects
                .iter()
                .filter_map(|(name, obj)| {
                    let id = obj.as_reference().ok()?;
                    let stream = self.doc.get_object(id).ok()?.as_stream().ok()?;
                    (subtype(stream) == Some(b"Form".as_slice())).then(|| (name.clone(), id))
                })
                .collect();

            for (name, form_id) in forms {
                let form = self
                    .doc
                    .get_object(form_id)
                    .and_then(Object::as_stream)
                    .map_err(|e| UnmarkError::Delete(e.to_string()))?
                    .clone();
                let form_bytes = stream_bytes(&form)?;
                let mut form_resources = own_resources(&self.doc, &form)
                    .cloned()
                    .unwrap_or_else(|| resources.clone());

                if let Some(stripped) =
                    self.strip_image(&form_bytes, &mut form_resources, target, depth + 1)?
                {
                    let mut copy = form;
                    copy.dict.set("Resources", Object::Dictionary(form_resources));
                    copy.set_plain_content(stripped);
                    let copy_id = self.doc.add_object(copy);
                    xobjects.set(name, Object::Reference(copy_id));
                    changed = true;
                }
            }
        }

        if !changed {
            return Ok(None);
        }
        resources.set("XObject", Object::Dictionary(xobjects));

        let ops = content::parse(bytes)?;
        let before = ops.len();
        let stripped = content::remove_ops(bytes, &ops, |op| draws_any(op, &image_names));
        debug!(
            "dropped Do operations for {:?} at depth {} ({} operators scanned)",
            target, depth, before
        );
        Ok(Some(stripped))
    }
}

impl PdfDocument for LopdfDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_rect(&self, page: usize) -> Result<Rect, UnmarkError> {
        let user_box = page_box(&self.doc, self.page_id(page)?);
        Ok(Rect::new(0.0, 0.0, user_box.width(), user_box.height()))
    }

    fn images(&self, page: usize) -> Result<Vec<PageImage>, UnmarkError> {
        let page_id = self.page_id(page)?;
        let resources = match resources(&self.doc, page_id) {
            Some(resources) => resources,
            None => return Ok(Vec::new()),
        };

        let mut images: Vec<PageImage> = Vec::new();
        for id in image_ids(&self.doc, resources) {
            if !images.iter().any(|image| image.id == id) {
                images.push(PageImage {
                    id,
                    placements: Vec::new(),
                });
            }
        }
        if xobject_dict(&self.doc, resources).map_or(true, |dict| dict.len() == 0) {
            return Ok(images);
        }

        let bytes = page_content(&self.doc, page_id)?;
        let mut placements = Vec::new();
        collect_placements(
            &self.doc,
            &bytes,
            resources,
            Matrix::IDENTITY,
            0,
            &mut placements,
        )?;

        let space = self.page_space(page_id);
        for (id, user_rect) in placements {
            let rect = space.to_page(&user_rect);
            match images.iter_mut().find(|image| image.id == id) {
                Some(image) => image.placements.push(rect),
                None => images.push(PageImage {
                    id,
                    placements: vec![rect],
                }),
            }
        }

        Ok(images)
    }

    fn links(&self, page: usize) -> Result<Vec<LinkAnnotation>, UnmarkError> {
        let page_id = self.page_id(page)?;
        let page_dict = self.page_dict(page_id)?;

        let annots = match page_dict.get(b"Annots") {
            Ok(obj) => match resolve(&self.doc, obj).and_then(|o| o.as_array().ok()) {
                Some(arr) => arr,
                None => return Err(UnmarkError::Page("/Annots is not an array".into())),
            },
            Err(_) => return Ok(Vec::new()),
        };

        let space = self.page_space(page_id);
        let mut links = Vec::new();
        for (index, entry) in annots.iter().enumerate() {
            let dict = match resolve(&self.doc, entry).and_then(|o| o.as_dict().ok()) {
                Some(dict) => dict,
                None => continue,
            };
            if !matches!(dict.get(b"Subtype"), Ok(Object::Name(name)) if name.as_slice() == b"Link")
            {
                continue;
            }

            // A link without a usable /Rect can still be matched by URI
            let rect = dict
                .get(b"Rect")
                .ok()
                .and_then(|obj| rect_from_object(&self.doc, obj))
                .map(|user_rect| space.to_page(&user_rect))
                .unwrap_or(Rect::new(0.0, 0.0, 0.0, 0.0));

            links.push(LinkAnnotation {
                index,
                rect,
                uri: link_uri(&self.doc, dict),
            });
        }

        Ok(links)
    }

    fn delete_image(&mut self, page: usize, image: ImageId) -> Result<(), UnmarkError> {
        let page_id = self.page_id(page)?;
        let target: ObjectId = (image.number, image.generation);

        // Work on a page-local copy so pages sharing these resources keep the image
        let mut resources = resources(&self.doc, page_id)
            .cloned()
            .ok_or_else(|| UnmarkError::Delete(format!("page {} has no resources", page)))?;
        let bytes = page_content(&self.doc, page_id).map_err(into_delete)?;

        let stripped = self
            .strip_image(&bytes, &mut resources, target, 0)
            .map_err(into_delete)?
            .ok_or_else(|| {
                UnmarkError::Delete(format!("image {} is not drawn on page {}", image, page))
            })?;

        let contents_id = self.doc.add_object(Stream::new(Dictionary::new(), stripped));
        let page_dict = self
            .doc
            .get_object_mut(page_id)
            .and_then(|obj| obj.as_dict_mut())
            .map_err(|e| UnmarkError::Delete(e.to_string()))?;
        page_dict.set("Contents", Object::Reference(contents_id));
        page_dict.set("Resources", Object::Dictionary(resources));

        Ok(())
    }

    fn delete_link(&mut self, page: usize, link: &LinkAnnotation) -> Result<(), UnmarkError> {
        let page_id = self.page_id(page)?;

        let annots_ref = match self.page_dict(page_id)?.get(b"Annots") {
            Ok(Object::Reference(id)) => Some(*id),
            Ok(_) => None,
            Err(_) => {
                return Err(UnmarkError::Delete(format!(
                    "page {} has no annotations",
                    page
                )))
            }
        };

        let annots = match annots_ref {
            Some(id) => self.doc.get_object_mut(id),
            None => self
                .doc
                .get_object_mut(page_id)
                .and_then(|obj| obj.as_dict_mut())
                .and_then(|dict| dict.get_mut(b"Annots")),
        }
        .and_then(|obj| obj.as_array_mut())
        .map_err(|e| UnmarkError::Delete(e.to_string()))?;

        if link.index >= annots.len() {
            return Err(UnmarkError::Delete(format!(
                "annotation {} out of range on page {} ({} annotations)",
                link.index,
                page,
                annots.len()
            )));
        }
        annots.remove(link.index);

        Ok(())
    }

    fn save(&mut self, path: &Path) -> Result<(), UnmarkError> {
        let pruned = self.doc.prune_objects();
        debug!("pruned {} unreferenced objects", pruned.len());
        self.doc.compress();

        let mut buffer = Vec::new();
        self.doc
            .save_to(&mut buffer)
            .map_err(|e| UnmarkError::Save(e.to_string()))?;

        if let Err(e) = std::fs::write(path, &buffer) {
            let _ = std::fs::remove_file(path);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Maps PDF user space onto page space for one page
struct PageSpace {
    user_box: Rect,
}

impl PageSpace {
    fn to_page(&self, user: &Rect) -> Rect {
        Rect::new(
            user.x0 - self.user_box.x0,
            self.user_box.y1 - user.y1,
            user.x1 - self.user_box.x0,
            self.user_box.y1 - user.y0,
        )
    }
}

/// Follow a reference one level
fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

/// Page attribute looked up through the page tree (`/Resources`, `/MediaBox`, ...)
fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut dict = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_INHERITANCE_DEPTH {
        if let Ok(obj) = dict.get(key) {
            return resolve(doc, obj);
        }
        let parent = dict.get(b"Parent").ok()?.as_reference().ok()?;
        dict = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn rect_from_object(doc: &Document, obj: &Object) -> Option<Rect> {
    let arr = resolve(doc, obj)?.as_array().ok()?;
    if arr.len() != 4 {
        return None;
    }
    let mut values = [0.0; 4];
    for (slot, item) in values.iter_mut().zip(arr) {
        *slot = number(resolve(doc, item)?)?;
    }
    let [ax, ay, bx, by] = values;
    Some(Rect::new(ax.min(bx), ay.min(by), ax.max(bx), ay.max(by)))
}

/// Visible page box in user space: CropBox, else MediaBox
fn page_box(doc: &Document, page_id: ObjectId) -> Rect {
    [b"CropBox".as_slice(), b"MediaBox".as_slice()]
        .iter()
        .find_map(|key| {
            inherited(doc, page_id, key)
                .and_then(|obj| rect_from_object(doc, obj))
                .filter(|rect| !rect.is_empty())
        })
        .unwrap_or(FALLBACK_PAGE_BOX)
}

fn resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    inherited(doc, page_id, b"Resources")?.as_dict().ok()
}

/// `/Resources` of a form, if it carries its own
fn own_resources<'a>(doc: &'a Document, form: &'a Stream) -> Option<&'a Dictionary> {
    let obj = form.dict.get(b"Resources").ok()?;
    resolve(doc, obj)?.as_dict().ok()
}

fn xobject_dict<'a>(doc: &'a Document, resources: &'a Dictionary) -> Option<&'a Dictionary> {
    let obj = resources.get(b"XObject").ok()?;
    resolve(doc, obj)?.as_dict().ok()
}

fn subtype(stream: &Stream) -> Option<&[u8]> {
    match stream.dict.get(b"Subtype") {
        Ok(Object::Name(name)) => Some(name.as_slice()),
        _ => None,
    }
}

/// Image XObjects named directly in `resources`
fn image_ids(doc: &Document, resources: &Dictionary) -> Vec<ImageId> {
    let xobjects = match xobject_dict(doc, resources) {
        Some(dict) => dict,
        None => return Vec::new(),
    };

    xobjects
        .iter()
        .filter_map(|(_, obj)| {
            let id = obj.as_reference().ok()?;
            let stream = doc.get_object(id).ok()?.as_stream().ok()?;
            (subtype(stream) == Some(b"Image".as_slice())).then(|| ImageId::new(id.0, id.1))
        })
        .collect()
}

/// Decoded bytes of a content or form stream
fn stream_bytes(stream: &Stream) -> Result<Vec<u8>, UnmarkError> {
    if stream.dict.get(b"Filter").is_err() {
        return Ok(stream.content.clone());
    }
    stream
        .decompressed_content()
        .map_err(|e| UnmarkError::Page(format!("content stream: {}", e)))
}

/// All content streams of a page, joined so tokens never run together
fn page_content(doc: &Document, page_id: ObjectId) -> Result<Vec<u8>, UnmarkError> {
    let mut bytes = Vec::new();
    for id in doc.get_page_contents(page_id) {
        let stream = doc
            .get_object(id)
            .and_then(Object::as_stream)
            .map_err(|e| UnmarkError::Page(format!("content stream {:?}: {}", id, e)))?;
        bytes.extend(stream_bytes(stream)?);
        bytes.push(b'\n');
    }
    Ok(bytes)
}

fn matrix_from_object(doc: &Document, obj: &Object) -> Option<Matrix> {
    let arr = resolve(doc, obj)?.as_array().ok()?;
    let values: Vec<f64> = arr
        .iter()
        .map(|item| resolve(doc, item).and_then(number))
        .collect::<Option<_>>()?;
    match values[..] {
        [a, b, c, d, e, f] => Some(Matrix::new(a, b, c, d, e, f)),
        _ => None,
    }
}

/// Walks `bytes` tracking the CTM and records the user-space bounds of
/// every image XObject painted, descending into forms.
fn collect_placements(
    doc: &Document,
    bytes: &[u8],
    resources: &Dictionary,
    base: Matrix,
    depth: usize,
    placements: &mut Vec<(ImageId, Rect)>,
) -> Result<(), UnmarkError> {
    let xobjects = xobject_dict(doc, resources);
    let mut ctm = base;
    let mut saved = Vec::new();

    for op in content::parse(bytes)? {
        match op.operator.as_str() {
            "q" => saved.push(ctm),
            "Q" => {
                if let Some(previous) = saved.pop() {
                    ctm = previous;
                }
            }
            "cm" => {
                if let Some(matrix) = op.matrix() {
                    ctm = matrix.multiply(&ctm);
                }
            }
            "Do" => {
                let id = match op
                    .name_operand()
                    .zip(xobjects)
                    .and_then(|(name, dict)| dict.get(name).ok())
                    .and_then(|obj| obj.as_reference().ok())
                {
                    Some(id) => id,
                    None => continue,
                };
                let stream = match doc.get_object(id).and_then(Object::as_stream) {
                    Ok(stream) => stream,
                    Err(_) => continue,
                };

                match subtype(stream) {
                    Some(b"Image") => {
                        placements.push((ImageId::new(id.0, id.1), ctm.unit_square_bounds()))
                    }
                    Some(b"Form") if depth < MAX_FORM_DEPTH => {
                        let form_matrix = stream
                            .dict
                            .get(b"Matrix")
                            .ok()
                            .and_then(|obj| matrix_from_object(doc, obj))
                            .unwrap_or(Matrix::IDENTITY);
                        let form_resources = own_resources(doc, stream).unwrap_or(resources);
                        collect_placements(
                            doc,
                            &stream_bytes(stream)?,
                            form_resources,
                            form_matrix.multiply(&ctm),
                            depth + 1,
                            placements,
                        )?;
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    Ok(())
}

fn into_delete(err: UnmarkError) -> UnmarkError {
    match err {
        UnmarkError::Page(msg) => UnmarkError::Delete(msg),
        other => other,
    }
}

fn draws_any(op: &ContentOp, names: &[Vec<u8>]) -> bool {
    op.operator == "Do"
        && op
            .name_operand()
            .map_or(false, |name| names.iter().any(|n| n.as_slice() == name))
}

/// URI of a link's `/A` action, empty when there is none
fn link_uri(doc: &Document, annot: &Dictionary) -> String {
    let action = match annot
        .get(b"A")
        .ok()
        .and_then(|obj| resolve(doc, obj))
        .and_then(|obj| obj.as_dict().ok())
    {
        Some(action) => action,
        None => return String::new(),
    };
    if !matches!(action.get(b"S"), Ok(Object::Name(kind)) if kind.as_slice() == b"URI") {
        return String::new();
    }
    match action.get(b"URI").ok().and_then(|obj| resolve(doc, obj)) {
        Some(Object::String(bytes, _)) => decode_text(bytes),
        _ => String::new(),
    }
}

/// UTF-16BE when it carries a byte order mark, otherwise lossy UTF-8
fn decode_text(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
            char::decode_utf16(units)
                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}
