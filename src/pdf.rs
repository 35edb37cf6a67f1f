use image::RgbaImage;
use lopdf::{dictionary, Dictionary, Object, ObjectId, StringFormat};
use std::{io::BufWriter, mem};
use time::OffsetDateTime;

use crate::configuration::{decode_base64_text, SignaturePlacement};
use crate::error::{ContextError, ErrorKind};
use crate::fields::{FormFieldSet, CONSENT_FIELD, PERIOD_FIELD, TEXT_FIELDS};

/// Name under which the signature image is registered in the page resources.
const SIGNATURE_XOBJECT_NAME: &str = "Formular230Signature";
/// Name under which the opacity of the signature is registered in the page resources.
const SIGNATURE_GRAPHICS_STATE_NAME: &str = "Formular230SignatureState";
/// Upper bound on the depth of the field and page trees, so that malformed documents with
/// cyclic references cannot make the traversal loop forever.
const MAXIMUM_TREE_DEPTH: usize = 32;

/// A terminal field of the interactive form together with its fully qualified name.
#[derive(Debug, Clone)]
struct FormField {
    full_name: String,
    object_id: ObjectId,
}

impl FormField {
    /// A field matches either by its fully qualified name or by its last name segment.
    fn matches(&self, name: &str) -> bool {
        self.full_name == name || self.full_name.rsplit('.').next() == Some(name)
    }
}

/// A PDF document with an interactive form (AcroForm) whose fields can be read and filled,
/// and on whose pages an image can be stamped.
///
/// The underlying `lopdf::Document` is exposed for whoever needs to reach further than
/// what is offered here.
#[derive(Debug, Clone)]
pub struct PdfForm {
    pub inner_document: lopdf::Document,
}

impl PdfForm {
    /// Load the form from the raw bytes of a PDF document.
    pub fn load_from_bytes(pdf_bytes: &[u8]) -> Result<Self, ContextError> {
        let inner_document = lopdf::Document::load_mem(pdf_bytes).map_err(|error| {
            ContextError::with_error("Failed to load the PDF template", &error)
                .of_kind(ErrorKind::Configuration)
        })?;

        Ok(PdfForm { inner_document })
    }

    /// Load the form from the base64 text it is distributed as.
    pub fn load_from_base64(base64_text: &str) -> Result<Self, ContextError> {
        let pdf_bytes = decode_base64_text(base64_text)?;
        PdfForm::load_from_bytes(&pdf_bytes)
    }

    /// The fully qualified names of all the terminal fields of the form.
    pub fn field_names(&self) -> Vec<String> {
        self.form_fields()
            .into_iter()
            .map(|field| field.full_name)
            .collect()
    }

    /// Read the value of a field: the text of a text field, or the state name of a checkbox.
    pub fn field_value(&self, name: &str) -> Option<String> {
        let field = self.find_field(name)?;
        let dictionary = self.dictionary(field.object_id).ok()?;
        match dictionary.get(b"V").ok()? {
            Object::String(bytes, _) => Some(decode_text_string(bytes)),
            Object::Name(name) => Some(String::from_utf8_lossy(name).into_owned()),
            _ => None,
        }
    }

    /// Fill the text fields and check the checkboxes matching the given field set. Fields which
    /// are not present in the template are skipped.
    pub fn fill(&mut self, fields: &FormFieldSet) -> Result<(), ContextError> {
        for field_name in TEXT_FIELDS {
            let value = fields.value(field_name);
            if value.is_empty() {
                continue;
            }
            if !self.set_text_field(field_name, value)? {
                log::warn!("Could not fill the field {:?}, skipping it", field_name);
            }
        }

        let period = fields.value(PERIOD_FIELD);
        if !period.is_empty() {
            let checkbox_name = format!("perioada{}", period);
            if !self.check_checkbox(&checkbox_name)? {
                log::warn!("Could not check the box {:?}, skipping it", checkbox_name);
            }
        }
        if fields.is_checked(CONSENT_FIELD) && !self.check_checkbox(CONSENT_FIELD)? {
            log::warn!("Could not check the box {:?}, skipping it", CONSENT_FIELD);
        }

        Ok(())
    }

    /// Set the value of a text field. Returns `false` if there is no such text field.
    pub fn set_text_field(&mut self, name: &str, value: &str) -> Result<bool, ContextError> {
        let Some(field) = self.find_field(name) else {
            return Ok(false);
        };
        if !self.has_field_type(field.object_id, b"Tx") {
            return Ok(false);
        }

        // Viewers regenerate the appearance of the field from its value since the stale
        // appearance streams are dropped and `NeedAppearances` is set
        let widget_ids = self.widget_ids(field.object_id)?;
        for widget_id in widget_ids {
            self.dictionary_mut(widget_id)?.remove(b"AP");
        }
        self.dictionary_mut(field.object_id)?
            .set("V", encode_text_string(value));
        self.set_need_appearances()?;

        Ok(true)
    }

    /// Check a checkbox by setting both its value and the appearance state of its widgets to
    /// the "on" state. Returns `false` if there is no such checkbox.
    pub fn check_checkbox(&mut self, name: &str) -> Result<bool, ContextError> {
        let Some(field) = self.find_field(name) else {
            return Ok(false);
        };
        if !self.has_field_type(field.object_id, b"Btn") {
            return Ok(false);
        }

        let widget_ids = self.widget_ids(field.object_id)?;
        let mut field_on_state = None;
        for widget_id in widget_ids {
            let on_state = self.on_state(widget_id);
            field_on_state.get_or_insert_with(|| on_state.clone());
            self.dictionary_mut(widget_id)?
                .set("AS", Object::Name(on_state.into_bytes()));
        }
        let field_on_state = field_on_state.unwrap_or_else(|| "Yes".to_string());
        self.dictionary_mut(field.object_id)?
            .set("V", Object::Name(field_on_state.into_bytes()));

        Ok(true)
    }

    /// Draw an image onto a page at the given placement, keeping its transparency through a
    /// soft mask.
    pub fn stamp_image(
        &mut self,
        image: &RgbaImage,
        placement: &SignaturePlacement,
    ) -> Result<(), ContextError> {
        let page_id = *self
            .inner_document
            .get_pages()
            .get(&placement.page)
            .ok_or_else(|| {
                ContextError::with_context(format!(
                    "Failed to find the page {} for the signature",
                    placement.page
                ))
            })?;

        let image_id = self.add_image_xobject(image);
        self.register_page_resource(page_id, "XObject", SIGNATURE_XOBJECT_NAME, image_id)?;

        use lopdf::content::Operation;
        let mut operations = vec![Operation::new("q", vec![])];
        if placement.opacity < 1.0 {
            let opacity = placement.opacity.clamp(0.0, 1.0);
            let graphics_state_id = self.inner_document.add_object(dictionary! {
                "Type" => "ExtGState",
                "CA" => Object::Real(opacity),
                "ca" => Object::Real(opacity),
            });
            self.register_page_resource(
                page_id,
                "ExtGState",
                SIGNATURE_GRAPHICS_STATE_NAME,
                graphics_state_id,
            )?;
            operations.push(Operation::new(
                "gs",
                vec![Object::Name(SIGNATURE_GRAPHICS_STATE_NAME.into())],
            ));
        }
        // Scale the unit square of the image to the placement rectangle
        operations.push(Operation::new(
            "cm",
            vec![
                placement.width.into(),
                0.into(),
                0.into(),
                placement.height.into(),
                placement.x.into(),
                placement.y.into(),
            ],
        ));
        operations.push(Operation::new(
            "Do",
            vec![Object::Name(SIGNATURE_XOBJECT_NAME.into())],
        ));
        operations.push(Operation::new("Q", vec![]));

        let content = lopdf::content::Content { operations }
            .encode()
            .map_err(|error| {
                ContextError::with_error("Failed to encode the signature content", &error)
            })?;
        self.append_page_content(page_id, content)?;
        log::debug!(
            "Stamped a {}x{} signature on page {}",
            image.width(),
            image.height(),
            placement.page
        );

        Ok(())
    }

    /// Save the `PdfForm` to bytes in order for it to be written to a file or sent away.
    pub fn save_to_bytes(&mut self) -> Result<Vec<u8>, ContextError> {
        self.set_modification_date(&OffsetDateTime::now_utc())?;
        self.inner_document.compress();

        let mut pdf_document_bytes = Vec::new();
        let mut writer = BufWriter::new(&mut pdf_document_bytes);
        self.inner_document.save_to(&mut writer).map_err(|error| {
            ContextError::with_error("Error while saving the PDF document to bytes", &error)
        })?;
        mem::drop(writer);

        Ok(pdf_document_bytes)
    }

    fn dictionary(&self, object_id: ObjectId) -> Result<&Dictionary, ContextError> {
        self.inner_document
            .get_object(object_id)
            .and_then(Object::as_dict)
            .map_err(|error| {
                ContextError::with_error(
                    format!("Failed to find the dictionary {:?}", object_id),
                    &error,
                )
            })
    }

    fn dictionary_mut(&mut self, object_id: ObjectId) -> Result<&mut Dictionary, ContextError> {
        self.inner_document
            .get_object_mut(object_id)
            .and_then(Object::as_dict_mut)
            .map_err(|error| {
                ContextError::with_error(
                    format!("Failed to find the dictionary {:?}", object_id),
                    &error,
                )
            })
    }

    fn catalog_id(&self) -> Result<ObjectId, ContextError> {
        self.inner_document
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .map_err(|error| {
                ContextError::with_error("Failed to find the document catalog", &error)
            })
    }

    /// Collect the terminal fields by walking the field tree of the interactive form.
    fn form_fields(&self) -> Vec<FormField> {
        let Ok(catalog) = self.catalog_id().and_then(|id| self.dictionary(id)) else {
            return Vec::new();
        };
        let acro_form = match catalog.get(b"AcroForm") {
            Ok(Object::Reference(id)) => self.dictionary(*id).ok(),
            Ok(Object::Dictionary(dictionary)) => Some(dictionary),
            _ => None,
        };
        let Some(root_fields) = acro_form
            .and_then(|acro_form| acro_form.get(b"Fields").ok())
            .and_then(|fields| self.resolve(fields).as_array().ok())
        else {
            return Vec::new();
        };

        let mut form_fields = Vec::new();
        for field_reference in root_fields {
            if let Ok(field_id) = field_reference.as_reference() {
                self.collect_fields(field_id, None, 0, &mut form_fields);
            }
        }

        form_fields
    }

    fn collect_fields(
        &self,
        field_id: ObjectId,
        parent_name: Option<&str>,
        depth: usize,
        form_fields: &mut Vec<FormField>,
    ) {
        if depth > MAXIMUM_TREE_DEPTH {
            log::warn!("The field tree is too deep, stopping at {:?}", field_id);
            return;
        }
        let Ok(dictionary) = self.dictionary(field_id) else {
            return;
        };
        let partial_name = match dictionary.get(b"T") {
            Ok(Object::String(bytes, _)) => Some(decode_text_string(bytes)),
            _ => None,
        };
        let full_name = match (parent_name, partial_name) {
            (Some(parent_name), Some(partial_name)) => format!("{}.{}", parent_name, partial_name),
            (None, Some(partial_name)) => partial_name,
            (Some(parent_name), None) => parent_name.to_string(),
            (None, None) => return,
        };

        // Kids carrying a name are fields on their own, while the others are just widgets
        let field_kids: Vec<ObjectId> = self
            .kid_ids(dictionary)
            .into_iter()
            .filter(|kid_id| {
                self.dictionary(*kid_id)
                    .map(|kid| kid.has(b"T"))
                    .unwrap_or(false)
            })
            .collect();
        if field_kids.is_empty() {
            form_fields.push(FormField {
                full_name,
                object_id: field_id,
            });
        } else {
            for kid_id in field_kids {
                self.collect_fields(kid_id, Some(&full_name), depth + 1, form_fields);
            }
        }
    }

    fn find_field(&self, name: &str) -> Option<FormField> {
        let form_fields = self.form_fields();
        // Prefer an exact match on the fully qualified name over a partial one
        form_fields
            .iter()
            .find(|field| field.full_name == name)
            .or_else(|| form_fields.iter().find(|field| field.matches(name)))
            .cloned()
    }

    fn kid_ids(&self, dictionary: &Dictionary) -> Vec<ObjectId> {
        dictionary
            .get(b"Kids")
            .map(|kids| self.resolve(kids))
            .and_then(Object::as_array)
            .map(|kids| {
                kids.iter()
                    .filter_map(|kid| kid.as_reference().ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The widgets of a terminal field: its kids, or the field itself when the two are merged.
    fn widget_ids(&self, field_id: ObjectId) -> Result<Vec<ObjectId>, ContextError> {
        let kid_ids = self.kid_ids(self.dictionary(field_id)?);
        if kid_ids.is_empty() {
            Ok(vec![field_id])
        } else {
            Ok(kid_ids)
        }
    }

    /// Whether the field type, which may be inherited from the parent fields, is the given one.
    /// A field without any type is accepted.
    fn has_field_type(&self, field_id: ObjectId, field_type: &[u8]) -> bool {
        let mut current = Some(field_id);
        for _ in 0..MAXIMUM_TREE_DEPTH {
            let Some(id) = current else {
                break;
            };
            let Ok(dictionary) = self.dictionary(id) else {
                break;
            };
            if let Ok(Object::Name(name)) = dictionary.get(b"FT") {
                return name.as_slice() == field_type;
            }
            current = dictionary
                .get(b"Parent")
                .and_then(Object::as_reference)
                .ok();
        }

        true
    }

    /// The name of the "on" appearance state of a checkbox widget, which is any state but `Off`.
    fn on_state(&self, widget_id: ObjectId) -> String {
        self.dictionary(widget_id)
            .ok()
            .and_then(|widget| widget.get(b"AP").ok())
            .and_then(|appearance| self.resolve(appearance).as_dict().ok())
            .and_then(|appearance| appearance.get(b"N").ok())
            .and_then(|normal| self.resolve(normal).as_dict().ok())
            .and_then(|normal| {
                normal
                    .iter()
                    .map(|(state, _)| String::from_utf8_lossy(state).into_owned())
                    .find(|state| state != "Off")
            })
            .unwrap_or_else(|| "Yes".to_string())
    }

    fn set_need_appearances(&mut self) -> Result<(), ContextError> {
        let catalog_id = self.catalog_id()?;
        let acro_form_reference = match self.dictionary(catalog_id)?.get(b"AcroForm") {
            Ok(Object::Reference(id)) => Some(*id),
            Ok(Object::Dictionary(_)) => None,
            _ => return Err(ContextError::with_context("The document has no interactive form")),
        };

        let acro_form = match acro_form_reference {
            Some(acro_form_id) => self.dictionary_mut(acro_form_id)?,
            None => self
                .dictionary_mut(catalog_id)?
                .get_mut(b"AcroForm")
                .and_then(Object::as_dict_mut)
                .map_err(|error| {
                    ContextError::with_error("Failed to find the interactive form", &error)
                })?,
        };
        acro_form.set("NeedAppearances", Object::Boolean(true));

        Ok(())
    }

    /// Convert the image into an RGB image XObject, with a grayscale soft mask carrying the
    /// alpha channel unless the image is fully opaque.
    fn add_image_xobject(&mut self, image: &RgbaImage) -> ObjectId {
        let (width, height) = image.dimensions();
        let mut rgb = Vec::with_capacity((width * height * 3) as usize);
        let mut alpha = Vec::with_capacity((width * height) as usize);
        for pixel in image.pixels() {
            rgb.extend_from_slice(&pixel.0[..3]);
            alpha.push(pixel[3]);
        }

        let mut image_dictionary = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Interpolate" => true,
        };
        if alpha.iter().any(|value| *value < u8::MAX) {
            let soft_mask_id = self.inner_document.add_object(lopdf::Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => width as i64,
                    "Height" => height as i64,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8,
                },
                alpha,
            ));
            image_dictionary.set("SMask", Object::Reference(soft_mask_id));
        }

        self.inner_document
            .add_object(lopdf::Stream::new(image_dictionary, rgb))
    }

    /// Register an object under a name in a category (such as `XObject`) of the page resources.
    /// Inherited or indirect resource dictionaries are copied into the page before being changed.
    fn register_page_resource(
        &mut self,
        page_id: ObjectId,
        category: &str,
        name: &str,
        object_id: ObjectId,
    ) -> Result<(), ContextError> {
        let (resources_id, mut resources) = self.page_resources(page_id)?;

        let mut category_dictionary = match resources.get(category.as_bytes()) {
            Ok(Object::Reference(id)) => self.dictionary(*id)?.clone(),
            Ok(Object::Dictionary(dictionary)) => dictionary.clone(),
            _ => Dictionary::new(),
        };
        category_dictionary.set(name, Object::Reference(object_id));
        resources.set(category, Object::Dictionary(category_dictionary));

        match resources_id {
            Some(resources_id) => {
                *self.dictionary_mut(resources_id)? = resources;
            }
            None => {
                self.dictionary_mut(page_id)?
                    .set("Resources", Object::Dictionary(resources));
            }
        }

        Ok(())
    }

    /// Retrieve a copy of the resources of a page, together with the identifier of the object
    /// holding them if they are stored indirectly. Inherited resources are returned as a copy
    /// without identifier, since they need to be stored into the page itself.
    fn page_resources(
        &self,
        page_id: ObjectId,
    ) -> Result<(Option<ObjectId>, Dictionary), ContextError> {
        let page = self.dictionary(page_id)?;
        match page.get(b"Resources") {
            Ok(Object::Reference(id)) => return Ok((Some(*id), self.dictionary(*id)?.clone())),
            Ok(Object::Dictionary(dictionary)) => return Ok((None, dictionary.clone())),
            _ => {}
        }

        let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
        for _ in 0..MAXIMUM_TREE_DEPTH {
            let Some(parent_id) = parent else {
                break;
            };
            let parent_dictionary = self.dictionary(parent_id)?;
            if let Ok(resources) = parent_dictionary.get(b"Resources") {
                if let Ok(resources) = self.resolve(resources).as_dict() {
                    return Ok((None, resources.clone()));
                }
            }
            parent = parent_dictionary
                .get(b"Parent")
                .and_then(Object::as_reference)
                .ok();
        }

        Ok((None, Dictionary::new()))
    }

    /// Append a content stream to a page. The existing contents are wrapped into a saved
    /// graphics state so that whatever transformation they leave behind does not leak.
    fn append_page_content(
        &mut self,
        page_id: ObjectId,
        content: Vec<u8>,
    ) -> Result<(), ContextError> {
        let existing_contents: Vec<Object> = match self.dictionary(page_id)?.get(b"Contents") {
            Ok(Object::Reference(id)) => match self.inner_document.get_object(*id) {
                Ok(Object::Array(streams)) => streams.clone(),
                _ => vec![Object::Reference(*id)],
            },
            Ok(Object::Array(streams)) => streams.clone(),
            _ => Vec::new(),
        };

        let mut contents = Vec::with_capacity(existing_contents.len() + 2);
        if !existing_contents.is_empty() {
            let save_state_id = self
                .inner_document
                .add_object(lopdf::Stream::new(Dictionary::new(), b"q\n".to_vec()));
            contents.push(Object::Reference(save_state_id));
            contents.extend(existing_contents);
        }

        let mut appended_content = if contents.is_empty() {
            Vec::new()
        } else {
            b"\nQ\n".to_vec()
        };
        appended_content.extend(content);
        let appended_content_id = self
            .inner_document
            .add_object(lopdf::Stream::new(Dictionary::new(), appended_content));
        contents.push(Object::Reference(appended_content_id));

        self.dictionary_mut(page_id)?
            .set("Contents", Object::Array(contents));

        Ok(())
    }

    fn set_modification_date(&mut self, date: &OffsetDateTime) -> Result<(), ContextError> {
        let modification_date = Object::String(
            to_pdf_timestamp_format(date).into_bytes(),
            StringFormat::Literal,
        );
        match self
            .inner_document
            .trailer
            .get(b"Info")
            .and_then(Object::as_reference)
        {
            Ok(info_id) => {
                self.dictionary_mut(info_id)?
                    .set("ModDate", modification_date);
            }
            Err(_) => {
                let info_id = self
                    .inner_document
                    .add_object(dictionary! { "ModDate" => modification_date });
                self.inner_document
                    .trailer
                    .set("Info", Object::Reference(info_id));
            }
        }

        Ok(())
    }

    fn resolve<'a>(&'a self, object: &'a Object) -> &'a Object {
        match object {
            Object::Reference(id) => self.inner_document.get_object(*id).unwrap_or(object),
            other => other,
        }
    }
}

/// Produce the filled form from a template: the template itself is left untouched.
pub fn generate_pdf(
    template: &PdfForm,
    fields: &FormFieldSet,
    signature: Option<&RgbaImage>,
    placement: &SignaturePlacement,
) -> Result<Vec<u8>, ContextError> {
    let mut pdf_form = template.clone();
    pdf_form.fill(fields)?;
    if let Some(signature) = signature {
        pdf_form.stamp_image(signature, placement)?;
    }
    let pdf_bytes = pdf_form.save_to_bytes()?;
    log::info!("Generated a filled form of {} bytes", pdf_bytes.len());

    Ok(pdf_bytes)
}

/// Encode a PDF text string: literal when it is plain ASCII, UTF-16BE with a byte order
/// mark otherwise (Romanian diacritics are not part of PDFDocEncoding).
pub fn encode_text_string(text: &str) -> Object {
    if text.is_ascii() {
        Object::String(text.as_bytes().to_vec(), StringFormat::Literal)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}

/// Decode a PDF text string, either UTF-16BE with a byte order mark or PDFDocEncoding, which
/// coincides with Latin-1 for the characters that matter here.
pub fn decode_text_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => bytes.iter().map(|byte| char::from(*byte)).collect(),
    }
}

/// Formats the given time so that it matches what the PDF specification expects.
/// An example of it is the following: D:20170505150224+02'00'.
fn to_pdf_timestamp_format(date: &OffsetDateTime) -> String {
    let offset = date.offset();
    let offset_sign = if offset.is_negative() { '-' } else { '+' };
    format!(
        "D:{:04}{:02}{:02}{:02}{:02}{:02}{offset_sign}{:02}'{:02}'",
        date.year(),
        u8::from(date.month()),
        date.day(),
        date.hour(),
        date.minute(),
        date.second(),
        offset.whole_hours().abs(),
        offset.minutes_past_hour().abs(),
    )
}
