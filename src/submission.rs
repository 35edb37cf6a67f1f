use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{ContextError, ErrorKind};
use crate::fields::{FormFieldSet, EMAIL_COPY_FIELD};

/// What is sent to the receiver of the forms: the raw field values, the filled PDF encoded
/// as base64 and the name under which the PDF should be stored.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub form_data: FormFieldSet,
    pub pdf: String,
    pub filename: String,
}

impl SubmissionPayload {
    pub fn new(form_data: FormFieldSet, pdf_bytes: &[u8]) -> Self {
        let filename = filename_for(&form_data);
        SubmissionPayload {
            form_data,
            pdf: base64::engine::general_purpose::STANDARD.encode(pdf_bytes),
            filename,
        }
    }

    pub fn to_json(&self) -> Result<String, ContextError> {
        serde_json::to_string(self).map_err(|error| {
            ContextError::with_error("Failed to serialize the submission", &error)
        })
    }
}

/// The name of the submitted PDF: `{judet}_{nume}_{prenume}_formular230.pdf`.
pub fn filename_for(fields: &FormFieldSet) -> String {
    format!(
        "{}_{}_{}_formular230.pdf",
        fields.value("judet"),
        fields.value("nume"),
        fields.value("prenume")
    )
}

/// What the user is told after a successful submission.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub filename: String,
    pub email_copy_requested: bool,
}

impl SubmissionReceipt {
    pub fn for_payload(payload: &SubmissionPayload) -> Self {
        SubmissionReceipt {
            filename: payload.filename.clone(),
            email_copy_requested: payload.form_data.is_checked(EMAIL_COPY_FIELD),
        }
    }

    /// The confirmation shown to the user.
    pub fn message(&self) -> &'static str {
        if self.email_copy_requested {
            "Formularul a fost trimis cu succes! Veți primi o copie pe email."
        } else {
            "Formularul a fost trimis cu succes!"
        }
    }
}

/// Delivers a payload to the receiver of the forms. A returned error means the receiver did
/// not accept the payload and nothing should be considered submitted.
pub trait SubmissionTransport {
    fn submit(&mut self, payload: &SubmissionPayload) -> Result<(), ContextError>;
}

/// Posts the payload as the `payload` field of a form-encoded request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ContextError> {
        let endpoint = endpoint.into();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ContextError::with_context(format!(
                "The submission endpoint {:?} is not an HTTP URL",
                endpoint
            ))
            .of_kind(ErrorKind::Configuration));
        }

        Ok(HttpTransport {
            endpoint,
            client: reqwest::blocking::Client::new(),
        })
    }
}

impl SubmissionTransport for HttpTransport {
    fn submit(&mut self, payload: &SubmissionPayload) -> Result<(), ContextError> {
        let payload_json = payload.to_json()?;
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("payload", payload_json)])
            .send()
            .map_err(|error| {
                ContextError::with_error(
                    format!("Failed to send the form to {}", self.endpoint),
                    &error,
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ContextError::with_context(format!(
                "The form was refused by {} with the status {}",
                self.endpoint, status
            )));
        }
        log::info!("Submitted {} to {}", payload.filename, self.endpoint);

        Ok(())
    }
}
