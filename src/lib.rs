//! Formular230 is the machinery behind the online filling of the Romanian "Formular 230", the form
//! through which a taxpayer redirects a share of their income tax to a non-profit organization.
//! It captures a handwritten signature, validates the personal numeric code (CNP) and the other
//! fields, fills the official PDF template and stamps the signature onto it, and finally sends the
//! filled document to whoever collects the forms.
//!
//! The entry point is the `FormularSession` struct, which owns everything a single filling of the
//! form needs. The pure pieces it is made of (the CNP validator, the signature surface, the field
//! rules and the PDF filler) are exposed as well, so that they can be used on their own.

/// This module contains the `ContextError` type which is the error type used throughout this library.
///
/// The reason why this type has been implemented is to uniform the error reporting without delving too deep
/// into specific error codes. Each error carries an `ErrorKind` which tells apart the three ways in which
/// an action can fail: a broken configuration or static resource, a rejected user input, or a failure while
/// generating or sending the document. Each of them calls for a different reaction from the caller.
///
/// The `ContextError` type implements `std::fmt::Display` and `Debug`, so it can be explicitly printed out,
/// and it is serializable so that it can be handed over as is to a front-end.
pub mod error;

/// The validation of the Romanian personal numeric code (CNP).
///
/// The thirteenth digit of a CNP is a check digit computed from the first twelve through a
/// weighted sum modulo 11. Only the format and the checksum are verified: the embedded birth
/// date and county code are not.
pub mod national_id;

/// The pointer events the signature surface reacts to, and the table binding each of them to
/// an operation of the surface.
pub mod input;

/// The module where the signature capture surface is presented.
///
/// # Introduction
///
/// The `SignatureSurface` struct is a raster buffer on which the user draws their signature with
/// the mouse or with a finger. The buffer is sized according to the device pixel ratio, so that the
/// signature stays crisp on high density displays, while the coordinates received from the events are
/// logical ones, relative to the viewport: the surface takes care of the mapping.
///
/// Strokes are drawn as anti-aliased segments with round caps. The surface tracks whether anything
/// was drawn since it was created or last cleared, which is what the form checks before accepting
/// a submission. The content can be exported as an image, as PNG bytes or as a data URL.
pub mod signature;

/// The configuration of a form session, read from a JSON file.
///
/// Every key is optional: the defaults are the ones the form is published with. Endpoints can be
/// either URLs or paths relative to the configuration file, and `fetch_resource` is the function
/// which reads them in both cases.
pub mod configuration;

/// The counties and localities of Romania, feeding the two dependent dropdowns of the address.
///
/// Localities are matched to the selected county either exactly or ignoring case and diacritics,
/// and both lists are sorted either by code point or following the Romanian alphabet.
pub mod locations;

/// The field set collected from the form, the validation rules of each field and the gate which
/// a preview or a submission has to pass.
pub mod fields;

/// The module where the PDF template of the form is filled.
///
/// # Introduction
///
/// The main component of this module is the struct `PdfForm`, which wraps a `lopdf::Document` holding an
/// interactive form. Fields are found by walking the field tree of the form, and can be addressed either by
/// their fully qualified name or by their last name segment. Text values which are not plain ASCII, as it is
/// the case for Romanian names, are stored as UTF-16 so that no diacritic is lost, and the viewers are asked
/// to regenerate the appearance of the fields.
///
/// The signature is stamped as an image with a soft mask carrying its transparency, on top of the existing
/// page content. The function `generate_pdf` puts all of this together, starting from an untouched template.
pub mod pdf;

/// The payload sent to the receiver of the forms and the transports delivering it.
pub mod submission;

/// The `FormularSession` struct, tying together the configuration, the static resources, the
/// signature surface and the fields of a single filling of the form.
pub mod session;

pub use error::{ContextError, ErrorKind};
pub use session::FormularSession;
