use formular230::{
    configuration::FormularConfiguration,
    error::ContextError,
    input::{stroke_to_events, PointerEvent, PointerEventKind},
    locations::{Collation, LocalityMatching, LocationIndex},
    pdf::PdfForm,
    session::FormularSession,
    signature::Point,
    submission::{SubmissionPayload, SubmissionTransport},
};
use lopdf::{dictionary, Object, StringFormat};
use similar_asserts::assert_eq;

const TEXT_FIELDS: [&str; 9] = [
    "nume",
    "prenume",
    "cnp",
    "strada",
    "numar",
    "judet",
    "localitate",
    "email",
    "telefon",
];

/// A single page template whose fields are nested under a `formular` parent, as exported by
/// most form editors.
fn template_bytes() -> Vec<u8> {
    let mut document = lopdf::Document::with_version("1.7");
    let pages_id = document.new_object_id();
    let page_id = document.new_object_id();
    let parent_id = document.new_object_id();
    let font_id = document.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let content_id = document.add_object(lopdf::Stream::new(
        dictionary! {},
        b"BT /F1 18 Tf 72 780 Td (Formular 230) Tj ET".to_vec(),
    ));

    let mut kids = Vec::new();
    for (index, name) in TEXT_FIELDS.iter().enumerate() {
        let top = 740 - 30 * index as i64;
        let field_id = document.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Widget",
            "FT" => "Tx",
            "T" => Object::String(name.as_bytes().to_vec(), StringFormat::Literal),
            "Parent" => Object::Reference(parent_id),
            "P" => Object::Reference(page_id),
            "Rect" => vec![200.into(), (top - 20).into(), 500.into(), top.into()],
        });
        kids.push(Object::Reference(field_id));
    }
    document.objects.insert(
        parent_id,
        Object::Dictionary(dictionary! {
            "T" => Object::String(b"formular".to_vec(), StringFormat::Literal),
            "Kids" => kids.clone(),
        }),
    );
    document.objects.insert(
        page_id,
        Object::Dictionary(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => Object::Reference(font_id) },
            },
            "Contents" => Object::Reference(content_id),
            "Annots" => kids,
        }),
    );
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
        "AcroForm" => dictionary! {
            "Fields" => vec![Object::Reference(parent_id)],
        },
    });
    document.trailer.set("Root", Object::Reference(catalog_id));

    let mut bytes = Vec::new();
    document.save_to(&mut bytes).unwrap();
    bytes
}

#[derive(Default)]
struct RecordingTransport {
    payloads: Vec<SubmissionPayload>,
}

impl SubmissionTransport for RecordingTransport {
    fn submit(&mut self, payload: &SubmissionPayload) -> Result<(), ContextError> {
        self.payloads.push(payload.clone());
        Ok(())
    }
}

fn new_session() -> FormularSession {
    let locations = LocationIndex::from_json(
        r#"[
            { "judet": "Brașov", "nume": "Făgăraș" },
            { "judet": "Brașov", "nume": "Brașov" },
            { "judet": "Cluj", "nume": "Turda" }
        ]"#
        .as_bytes(),
        Collation::Romanian,
        LocalityMatching::Folded,
    );
    FormularSession::with_resources(
        FormularConfiguration::default(),
        PdfForm::load_from_bytes(&template_bytes()),
        locations,
    )
    .unwrap()
}

#[test]
fn filled_and_signed_form_is_submitted() {
    let mut session = new_session();
    session.surface_mut().set_offset(20.0, 300.0);

    std::assert_eq!(session.localities("brasov").unwrap(), vec!["Brașov", "Făgăraș"]);
    for (name, value) in [
        ("nume", "Ștefănescu"),
        ("prenume", "Ioana-Maria"),
        ("cnp", "2850615123458"),
        ("strada", "Republicii"),
        ("numar", "12A"),
        ("judet", "Brașov"),
        ("localitate", "Făgăraș"),
        ("email", "ioana@example.ro"),
        ("telefon", "0721234567"),
        ("perioadaRedirectionare", "2"),
    ] {
        assert_eq!(session.set_field(name, value), None, "{}", name);
    }

    // A touch stroke followed by a mouse stroke
    let touch_points = [Point { x: 40.0, y: 340.0 }, Point { x: 90.0, y: 360.0 }];
    session
        .surface_mut()
        .dispatch(&PointerEvent::touch(PointerEventKind::TouchStart, &touch_points[..1]));
    session
        .surface_mut()
        .dispatch(&PointerEvent::touch(PointerEventKind::TouchMove, &touch_points[1..]));
    session
        .surface_mut()
        .dispatch(&PointerEvent::touch(PointerEventKind::TouchEnd, &[]));
    for event in stroke_to_events(&[
        Point { x: 100.0, y: 350.0 },
        Point { x: 150.0, y: 330.0 },
        Point { x: 200.0, y: 370.0 },
    ]) {
        session.surface_mut().dispatch(&event);
    }
    assert_eq!(session.surface().strokes().len(), 2);

    let mut transport = RecordingTransport::default();
    let receipt = session.submit(&mut transport).unwrap();
    assert_eq!(receipt.filename.as_str(), "Brașov_Ștefănescu_Ioana-Maria_formular230.pdf");
    assert!(!receipt.email_copy_requested);

    let payload = &transport.payloads[0];
    assert_eq!(payload.filename, receipt.filename);
    assert_eq!(payload.form_data.get("cnp"), Some("2850615123458"));

    let pdf_bytes = formular230::configuration::decode_base64_text(&payload.pdf).unwrap();
    let filled = PdfForm::load_from_bytes(&pdf_bytes).unwrap();
    assert_eq!(filled.field_value("cnp").as_deref(), Some("2850615123458"));
    assert_eq!(filled.field_value("formular.nume").as_deref(), Some("Ștefănescu"));
    assert_eq!(filled.field_value("localitate").as_deref(), Some("Făgăraș"));

    // The session is ready for the next form
    assert!(session.fields().is_empty());
    assert!(!session.surface().has_content());
}

#[test]
fn unsigned_form_is_rejected_and_kept() {
    let mut session = new_session();
    session.set_field("nume", "Pop");
    session.set_field("cnp", "0000000000000");

    let mut transport = RecordingTransport::default();
    let error = session.submit(&mut transport).unwrap_err();
    assert!(error.is_validation());
    assert!(transport.payloads.is_empty());
    assert_eq!(session.fields().get("nume"), Some("Pop"));
}
