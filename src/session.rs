use crate::configuration::{fetch_resource, FormularConfiguration};
use crate::error::{ContextError, ErrorKind};
use crate::fields::{self, FieldViolation, FormFieldSet};
use crate::locations::LocationIndex;
use crate::pdf::{self, PdfForm};
use crate::signature::SignatureSurface;
use crate::submission::{SubmissionPayload, SubmissionReceipt, SubmissionTransport};

/// Everything a single filling of the form needs: the static resources, the signature
/// surface and the values typed so far.
///
/// The template and the locations are loaded once. When one of them is unavailable the
/// failure is logged when the session is initialized, and afterwards only the features
/// depending on it keep returning the same error; the rest of the form stays usable.
#[derive(Debug)]
pub struct FormularSession {
    configuration: FormularConfiguration,
    template: Result<PdfForm, ContextError>,
    locations: Result<LocationIndex, ContextError>,
    surface: SignatureSurface,
    fields: FormFieldSet,
}

impl FormularSession {
    /// Create the session by loading the template and the locations from the configured
    /// endpoints. Only an unusable signature surface makes the initialization fail.
    pub fn initialize(configuration: FormularConfiguration) -> Result<Self, ContextError> {
        let template =
            fetch_resource(&configuration.endpoints.template, &configuration.base_directory)
                .and_then(|template_bytes| {
                    PdfForm::load_from_base64(&String::from_utf8_lossy(&template_bytes))
                });
        let locations =
            fetch_resource(&configuration.endpoints.locations, &configuration.base_directory)
                .and_then(|locations_bytes| {
                    LocationIndex::from_json(
                        &locations_bytes,
                        configuration.collation,
                        configuration.locality_matching,
                    )
                });

        FormularSession::with_resources(configuration, template, locations)
    }

    /// Create the session from resources which were already loaded (or failed to).
    pub fn with_resources(
        configuration: FormularConfiguration,
        template: Result<PdfForm, ContextError>,
        locations: Result<LocationIndex, ContextError>,
    ) -> Result<Self, ContextError> {
        let surface = SignatureSurface::new(&configuration.surface)?;
        if let Err(error) = &template {
            log::error!("The PDF template is unavailable: {}", error);
        }
        if let Err(error) = &locations {
            log::error!("The location data is unavailable: {}", error);
        }

        Ok(FormularSession {
            configuration,
            template,
            locations,
            surface,
            fields: FormFieldSet::new(),
        })
    }

    pub fn configuration(&self) -> &FormularConfiguration {
        &self.configuration
    }

    pub fn fields(&self) -> &FormFieldSet {
        &self.fields
    }

    /// Record the value of a field and return its live validation result. Selecting another
    /// county drops the selected locality, since it belonged to the previous county.
    pub fn set_field(&mut self, name: &str, value: &str) -> Option<FieldViolation> {
        if name == "judet" && self.fields.value("judet") != value {
            self.fields.remove("localitate");
        }
        self.fields.set(name, value);

        self.check_field(name)
    }

    /// Validate the current value of a single field.
    pub fn check_field(&self, name: &str) -> Option<FieldViolation> {
        fields::check_field(
            name,
            self.fields.value(name),
            self.configuration.is_required(name),
        )
    }

    pub fn counties(&self) -> Result<Vec<String>, ContextError> {
        self.locations
            .as_ref()
            .map(LocationIndex::counties)
            .map_err(Clone::clone)
    }

    pub fn localities(&self, county: &str) -> Result<Vec<String>, ContextError> {
        self.locations
            .as_ref()
            .map(|locations| locations.localities(county))
            .map_err(Clone::clone)
    }

    pub fn surface(&self) -> &SignatureSurface {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut SignatureSurface {
        &mut self.surface
    }

    /// Check the form and generate the filled PDF without sending it anywhere.
    pub fn preview(&self) -> Result<Vec<u8>, ContextError> {
        fields::gate(
            &self.fields,
            &self.configuration.required_fields,
            self.surface.has_content(),
        )?;
        let template = self.template.as_ref().map_err(Clone::clone)?;

        pdf::generate_pdf(
            template,
            &self.fields,
            Some(&self.surface.snapshot()),
            &self.configuration.signature_placement,
        )
    }

    /// Check the form, generate the filled PDF and hand it to the transport. The form is only
    /// reset once the transport accepted it, so a failed submission can be retried as is.
    pub fn submit(
        &mut self,
        transport: &mut dyn SubmissionTransport,
    ) -> Result<SubmissionReceipt, ContextError> {
        let pdf_bytes = self.preview()?;
        let payload = SubmissionPayload::new(self.fields.clone(), &pdf_bytes);
        transport.submit(&payload).map_err(|error| {
            log::error!("Failed to submit {}: {}", payload.filename, error);
            error.of_kind(ErrorKind::Generation)
        })?;

        let receipt = SubmissionReceipt::for_payload(&payload);
        log::info!("The form {} was submitted", receipt.filename);
        self.reset();

        Ok(receipt)
    }

    /// Forget the typed values and clear the signature.
    pub fn reset(&mut self) {
        self.fields.clear();
        self.surface.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{CONSENT_FIELD, EMAIL_COPY_FIELD};
    use crate::input::stroke_to_events;
    use crate::locations::{Collation, LocalityMatching};
    use crate::pdf::test_templates::template_bytes;
    use crate::signature::Point;

    struct RecordingTransport {
        payloads: Vec<SubmissionPayload>,
        refuse: bool,
    }

    impl SubmissionTransport for RecordingTransport {
        fn submit(&mut self, payload: &SubmissionPayload) -> Result<(), ContextError> {
            if self.refuse {
                return Err(ContextError::with_context("The receiver is down"));
            }
            self.payloads.push(payload.clone());
            Ok(())
        }
    }

    fn session() -> FormularSession {
        let template = PdfForm::load_from_bytes(&template_bytes(&[
            "nume", "prenume", "cnp", "strada", "numar", "judet", "localitate",
        ]));
        let locations = LocationIndex::from_json(
            br#"[{ "judet": "Cluj", "nume": "Turda" }, { "judet": "Cluj", "nume": "Dej" }]"#,
            Collation::Romanian,
            LocalityMatching::Folded,
        );
        FormularSession::with_resources(FormularConfiguration::default(), template, locations)
            .unwrap()
    }

    fn fill_valid_fields(session: &mut FormularSession) {
        for (name, value) in [
            ("nume", "Pop"),
            ("prenume", "Ana"),
            ("cnp", "1800101221144"),
            ("strada", "Memorandumului"),
            ("numar", "28"),
            ("judet", "Cluj"),
            ("localitate", "Turda"),
        ] {
            assert_eq!(session.set_field(name, value), None);
        }
    }

    fn sign(session: &mut FormularSession) {
        let points = [Point { x: 10.0, y: 10.0 }, Point { x: 80.0, y: 40.0 }];
        for event in stroke_to_events(&points) {
            session.surface_mut().dispatch(&event);
        }
    }

    #[test]
    fn live_validation_reports_the_field() {
        let mut session = session();
        let violation = session.set_field("cnp", "1800101221145").unwrap();
        assert_eq!(violation.field, "cnp");
        assert_eq!(session.set_field("email", ""), None);
        assert!(session.set_field("nume", "").is_some());
    }

    #[test]
    fn changing_the_county_drops_the_locality() {
        let mut session = session();
        session.set_field("judet", "Cluj");
        session.set_field("localitate", "Turda");
        session.set_field("judet", "Cluj");
        assert_eq!(session.fields().get("localitate"), Some("Turda"));
        session.set_field("judet", "Alba");
        assert_eq!(session.fields().get("localitate"), None);
    }

    #[test]
    fn dropdowns_come_from_the_locations() {
        let session = session();
        assert_eq!(session.counties().unwrap(), vec!["Cluj"]);
        assert_eq!(session.localities("cluj").unwrap(), vec!["Dej", "Turda"]);
    }

    #[test]
    fn preview_needs_a_signature() {
        let mut session = session();
        fill_valid_fields(&mut session);
        let error = session.preview().unwrap_err();
        assert!(error.is_validation());

        sign(&mut session);
        let pdf_bytes = session.preview().unwrap();
        let filled = PdfForm::load_from_bytes(&pdf_bytes).unwrap();
        assert_eq!(filled.field_value("localitate").as_deref(), Some("Turda"));
    }

    #[test]
    fn successful_submission_resets_the_form() {
        let mut session = session();
        fill_valid_fields(&mut session);
        session.set_field(CONSENT_FIELD, "on");
        session.set_field(EMAIL_COPY_FIELD, "on");
        sign(&mut session);

        let mut transport = RecordingTransport {
            payloads: Vec::new(),
            refuse: false,
        };
        let receipt = session.submit(&mut transport).unwrap();
        assert_eq!(receipt.filename, "Cluj_Pop_Ana_formular230.pdf");
        assert!(receipt.email_copy_requested);
        assert_eq!(transport.payloads.len(), 1);
        assert!(session.fields().is_empty());
        assert!(!session.surface().has_content());
    }

    #[test]
    fn failed_submission_keeps_the_form() {
        let mut session = session();
        fill_valid_fields(&mut session);
        sign(&mut session);

        let mut transport = RecordingTransport {
            payloads: Vec::new(),
            refuse: true,
        };
        let error = session.submit(&mut transport).unwrap_err();
        assert_eq!(error.kind, ErrorKind::Generation);
        assert_eq!(session.fields().get("cnp"), Some("1800101221144"));
        assert!(session.surface().has_content());
    }

    #[test]
    fn invalid_fields_are_never_submitted() {
        let mut session = session();
        fill_valid_fields(&mut session);
        session.set_field("cnp", "1800101221145");
        sign(&mut session);

        let mut transport = RecordingTransport {
            payloads: Vec::new(),
            refuse: false,
        };
        assert!(session.submit(&mut transport).unwrap_err().is_validation());
        assert!(transport.payloads.is_empty());
    }

    #[test]
    fn unavailable_resources_only_disable_their_features() {
        let missing = || ContextError::with_context("Missing").of_kind(ErrorKind::Configuration);
        let mut session = FormularSession::with_resources(
            FormularConfiguration::default(),
            Err(missing()),
            Err(missing()),
        )
        .unwrap();
        assert_eq!(session.counties().unwrap_err().kind, ErrorKind::Configuration);

        fill_valid_fields(&mut session);
        sign(&mut session);
        assert_eq!(session.preview().unwrap_err().kind, ErrorKind::Configuration);
    }
}
