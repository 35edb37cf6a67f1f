use clap::{Parser, Subcommand};
use formular230::{
    configuration::FormularConfiguration,
    error::{ContextError, ErrorKind},
    fields::FormFieldSet,
    input::stroke_to_events,
    national_id,
    session::FormularSession,
    signature::Point,
    submission::HttpTransport,
};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct CliArguments {
    /// The JSON configuration file; the defaults are used when it is not given.
    #[arg(short = 'c', long = "configuration", value_name = "json_file", global = true)]
    configuration_path: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the format and the checksum of a CNP.
    ValidateCnp { cnp: String },
    /// Compute the check digit completing the first twelve digits of a CNP.
    CheckDigit { first_twelve: String },
    /// List the counties.
    Counties,
    /// List the localities of a county.
    Localities { judet: String },
    /// Fill the template and write the resulting PDF.
    Fill {
        #[arg(short = 'f', long = "fields", value_name = "json_file")]
        fields_path: PathBuf,
        #[arg(short = 's', long = "strokes", value_name = "json_file")]
        strokes_path: PathBuf,
        #[arg(short = 'o', long = "output", value_name = "file_path")]
        output_file_path: PathBuf,
    },
    /// Fill the template and send it to the submission endpoint.
    Submit {
        #[arg(short = 'f', long = "fields", value_name = "json_file")]
        fields_path: PathBuf,
        #[arg(short = 's', long = "strokes", value_name = "json_file")]
        strokes_path: PathBuf,
    },
}

fn main() {
    if let Err(error) = fallible_main() {
        log::error!("{}", error);
        std::process::exit(1);
    }
}

fn fallible_main() -> Result<(), ContextError> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
    let arguments = CliArguments::parse();
    log::debug!("{:?}", arguments);

    let configuration = match &arguments.configuration_path {
        Some(configuration_path) => FormularConfiguration::from_path(configuration_path)?,
        None => FormularConfiguration::default(),
    };

    match arguments.command {
        Command::ValidateCnp { cnp } => {
            if !national_id::validate(&cnp) {
                return Err(ContextError::with_context(format!("The CNP {} is not valid", cnp))
                    .of_kind(ErrorKind::Validation));
            }
            println!("The CNP {} is valid", cnp);
        }
        Command::CheckDigit { first_twelve } => {
            let check_digit = national_id::check_digit_for_prefix(&first_twelve).ok_or_else(|| {
                ContextError::with_context(format!(
                    "Expected exactly 12 digits, but got {:?}",
                    first_twelve
                ))
                .of_kind(ErrorKind::Validation)
            })?;
            println!("{}{}", first_twelve, check_digit);
        }
        Command::Counties => {
            let session = FormularSession::initialize(configuration)?;
            for county in session.counties()? {
                println!("{}", county);
            }
        }
        Command::Localities { judet } => {
            let session = FormularSession::initialize(configuration)?;
            for locality in session.localities(&judet)? {
                println!("{}", locality);
            }
        }
        Command::Fill {
            fields_path,
            strokes_path,
            output_file_path,
        } => {
            let mut session = prepared_session(configuration, &fields_path, &strokes_path)?;
            let pdf_bytes = session.preview()?;
            std::fs::write(&output_file_path, pdf_bytes).map_err(|error| {
                ContextError::with_error("Failed to write the output file", &error)
            })?;
            log::info!("Saved the filled form to the path: {:?}", output_file_path);
            session.reset();
        }
        Command::Submit {
            fields_path,
            strokes_path,
        } => {
            let mut transport = HttpTransport::new(configuration.endpoints.submission.clone())?;
            let mut session = prepared_session(configuration, &fields_path, &strokes_path)?;
            let receipt = session.submit(&mut transport)?;
            println!("{}", receipt.message());
        }
    }

    Ok(())
}

/// Create a session, fill its fields and replay the strokes of the signature onto its surface.
fn prepared_session(
    configuration: FormularConfiguration,
    fields_path: &Path,
    strokes_path: &Path,
) -> Result<FormularSession, ContextError> {
    let mut session = FormularSession::initialize(configuration)?;

    let fields = FormFieldSet::from_json(&read_file(fields_path)?)?;
    for (name, value) in fields.iter() {
        if let Some(violation) = session.set_field(name, value) {
            log::warn!("{}: {}", violation.field, violation.message);
        }
    }

    let strokes: Vec<Vec<[f32; 2]>> =
        serde_json::from_slice(&read_file(strokes_path)?).map_err(|error| {
            ContextError::with_error("Failed to parse the strokes", &error)
                .of_kind(ErrorKind::Validation)
        })?;
    for stroke in strokes {
        let points: Vec<Point> = stroke.into_iter().map(|[x, y]| Point { x, y }).collect();
        for event in stroke_to_events(&points) {
            session.surface_mut().dispatch(&event);
        }
    }
    log::debug!("Replayed {} strokes", session.surface().strokes().len());

    Ok(session)
}

fn read_file(path: &Path) -> Result<Vec<u8>, ContextError> {
    std::fs::read(path).map_err(|error| {
        ContextError::with_error(format!("Failed to read the file {:?}", path), &error)
            .of_kind(ErrorKind::Validation)
    })
}
