use std::path::{Path, PathBuf};

use base64::Engine as _;
use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::error::{ContextError, ErrorKind};
use crate::locations::{Collation, LocalityMatching};

/// The full configuration of a form session. Every key is optional in the JSON file and
/// falls back to the values the form is published with.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct FormularConfiguration {
    pub endpoints: Endpoints,
    pub signature_placement: SignaturePlacement,
    pub surface: SurfaceConfiguration,
    pub required_fields: Vec<String>,
    pub collation: Collation,
    pub locality_matching: LocalityMatching,
    /// The directory against which relative endpoint paths are resolved.
    #[serde(skip)]
    pub base_directory: PathBuf,
}

/// Where the static files are read from and where the filled form is sent. Each endpoint is
/// either an `http(s)://` URL or a filesystem path.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct Endpoints {
    pub locations: String,
    pub template: String,
    pub submission: String,
}

/// The rectangle, in PDF points, where the signature is stamped.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SignaturePlacement {
    /// One-based page number.
    pub page: u32,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub opacity: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SurfaceConfiguration {
    /// Logical width of the drawing surface.
    pub width: f32,
    /// Logical height of the drawing surface.
    pub height: f32,
    pub device_pixel_ratio: f32,
    /// Logical width of the strokes.
    pub stroke_width: f32,
    /// `#RRGGBB` or `#RRGGBBAA`.
    pub stroke_color: String,
    /// When absent the surface is exported with a transparent background.
    pub background: Option<String>,
}

impl Default for FormularConfiguration {
    fn default() -> Self {
        FormularConfiguration {
            endpoints: Endpoints::default(),
            signature_placement: SignaturePlacement::default(),
            surface: SurfaceConfiguration::default(),
            required_fields: [
                "nume",
                "prenume",
                "cnp",
                "strada",
                "numar",
                "judet",
                "localitate",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            collation: Collation::Romanian,
            locality_matching: LocalityMatching::Folded,
            base_directory: PathBuf::from("."),
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Endpoints {
            locations: "localitati.json".into(),
            template: "pdfbase64.txt".into(),
            submission: String::new(),
        }
    }
}

impl Default for SignaturePlacement {
    fn default() -> Self {
        SignaturePlacement {
            page: 1,
            x: 135.0,
            y: 95.0,
            width: 140.0,
            height: 30.0,
            opacity: 1.0,
        }
    }
}

impl Default for SurfaceConfiguration {
    fn default() -> Self {
        SurfaceConfiguration {
            width: 500.0,
            height: 150.0,
            device_pixel_ratio: 1.0,
            stroke_width: 2.0,
            stroke_color: "#0D47A1".into(),
            background: None,
        }
    }
}

impl FormularConfiguration {
    /// Read the configuration from a JSON file. Relative endpoints are later resolved against
    /// the directory containing the file.
    pub fn from_path(configuration_file_path: &Path) -> Result<Self, ContextError> {
        let configuration_file_contents = std::fs::read_to_string(configuration_file_path)
            .map_err(|error| {
                ContextError::with_error(
                    format!(
                        "Failed to read the configuration file {:?}",
                        configuration_file_path
                    ),
                    &error,
                )
                .of_kind(ErrorKind::Configuration)
            })?;
        let mut configuration: FormularConfiguration =
            serde_json::from_str(&configuration_file_contents).map_err(|error| {
                ContextError::with_error(
                    format!(
                        "Failed to parse the configuration file {:?}",
                        configuration_file_path
                    ),
                    &error,
                )
                .of_kind(ErrorKind::Configuration)
            })?;
        configuration.base_directory = configuration_file_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(configuration)
    }

    pub fn is_required(&self, field_name: &str) -> bool {
        self.required_fields.iter().any(|name| name == field_name)
    }
}

/// Fetch a static resource, either over HTTP or from the filesystem relative to the base directory.
pub fn fetch_resource(endpoint: &str, base_directory: &Path) -> Result<Vec<u8>, ContextError> {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        log::debug!("Fetching {}", endpoint);
        let response = reqwest::blocking::get(endpoint)
            .map_err(|error| {
                ContextError::with_error(format!("Unable to fetch {}", endpoint), &error)
                    .of_kind(ErrorKind::Configuration)
            })?
            .error_for_status()
            .map_err(|error| {
                ContextError::with_error(format!("Unable to fetch {}", endpoint), &error)
                    .of_kind(ErrorKind::Configuration)
            })?;
        let bytes = response.bytes().map_err(|error| {
            ContextError::with_error(format!("Unable to read the body of {}", endpoint), &error)
                .of_kind(ErrorKind::Configuration)
        })?;

        Ok(bytes.to_vec())
    } else {
        let path = base_directory.join(endpoint);
        log::debug!("Reading {:?}", path);
        std::fs::read(&path).map_err(|error| {
            ContextError::with_error(format!("Unable to read {:?}", path), &error)
                .of_kind(ErrorKind::Configuration)
        })
    }
}

/// Decode base64 text, tolerating a `data:...;base64,` prefix and embedded whitespace.
pub fn decode_base64_text(text: &str) -> Result<Vec<u8>, ContextError> {
    let payload = match text.find(";base64,") {
        Some(index) if text.trim_start().starts_with("data:") => &text[index + ";base64,".len()..],
        _ => text,
    };
    let cleaned: String = payload
        .chars()
        .filter(|character| !character.is_whitespace())
        .collect();

    base64::engine::general_purpose::STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|error| {
            ContextError::with_error("Failed to decode the base64 content", &error)
                .of_kind(ErrorKind::Configuration)
        })
}

/// Parse a `#RRGGBB` or `#RRGGBBAA` color.
pub fn parse_color(color: &str) -> Result<Rgba<u8>, ContextError> {
    let invalid_color = || {
        ContextError::with_context(format!("Invalid color {:?}", color))
            .of_kind(ErrorKind::Configuration)
    };
    let hex = color.strip_prefix('#').ok_or_else(invalid_color)?;
    if !(hex.len() == 6 || hex.len() == 8) || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid_color());
    }

    let channel = |index: usize| {
        u8::from_str_radix(&hex[index * 2..index * 2 + 2], 16).map_err(|_| invalid_color())
    };
    let alpha = if hex.len() == 8 { channel(3)? } else { 255 };

    Ok(Rgba([channel(0)?, channel(1)?, channel(2)?, alpha]))
}
