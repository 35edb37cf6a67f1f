use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization as _;

use crate::error::{ContextError, ErrorKind};

/// A locality together with the county it belongs to.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Location {
    pub judet: String,
    pub nume: String,
}

/// How the selected county is compared with the county of each record.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LocalityMatching {
    Exact,
    /// Ignore case and diacritics.
    Folded,
}

/// The order in which counties and localities are listed.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Collation {
    /// Code point order.
    Ordinal,
    /// The Romanian alphabet: a ă â b c d e f g h i î j k l m n o p q r s ș t ț u v w x y z.
    Romanian,
}

impl Collation {
    pub fn compare(&self, left: &str, right: &str) -> Ordering {
        match self {
            Collation::Ordinal => left.cmp(right),
            Collation::Romanian => romanian_key(left)
                .cmp(&romanian_key(right))
                .then_with(|| left.cmp(right)),
        }
    }
}

/// The county and locality lists behind the two dependent dropdowns.
#[derive(Debug, Clone)]
pub struct LocationIndex {
    locations: Vec<Location>,
    collation: Collation,
    matching: LocalityMatching,
}

impl LocationIndex {
    pub fn new(locations: Vec<Location>, collation: Collation, matching: LocalityMatching) -> Self {
        LocationIndex {
            locations,
            collation,
            matching,
        }
    }

    /// Parse the JSON array of location records. Keys other than `judet` and `nume` are ignored.
    pub fn from_json(
        json_bytes: &[u8],
        collation: Collation,
        matching: LocalityMatching,
    ) -> Result<Self, ContextError> {
        let locations: Vec<Location> = serde_json::from_slice(json_bytes).map_err(|error| {
            ContextError::with_error("Failed to parse the location data", &error)
                .of_kind(ErrorKind::Configuration)
        })?;
        log::debug!("Loaded {} locations", locations.len());

        Ok(LocationIndex::new(locations, collation, matching))
    }

    /// The distinct counties, sorted.
    pub fn counties(&self) -> Vec<String> {
        let distinct: BTreeSet<&str> = self
            .locations
            .iter()
            .map(|location| location.judet.as_str())
            .collect();
        let mut counties: Vec<String> = distinct.into_iter().map(String::from).collect();
        counties.sort_by(|left, right| self.collation.compare(left, right));

        counties
    }

    /// The localities of the given county, sorted. An empty selection yields no localities.
    pub fn localities(&self, county: &str) -> Vec<String> {
        if county.is_empty() {
            return Vec::new();
        }

        let folded_county = fold(county);
        let mut localities: Vec<String> = self
            .locations
            .iter()
            .filter(|location| match self.matching {
                LocalityMatching::Exact => location.judet == county,
                LocalityMatching::Folded => fold(&location.judet) == folded_county,
            })
            .map(|location| location.nume.clone())
            .collect();
        localities.sort_by(|left, right| self.collation.compare(left, right));

        localities
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

/// Lowercase the string and strip its diacritics.
pub fn fold(text: &str) -> String {
    text.nfd()
        .filter(|character| !unicode_normalization::char::is_combining_mark(*character))
        .flat_map(char::to_lowercase)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Each letter becomes its base letter paired with its rank among the Romanian variants of it.
fn romanian_key(text: &str) -> Vec<(char, u8)> {
    text.nfc()
        .flat_map(char::to_lowercase)
        .map(|character| match character {
            'ă' => ('a', 1),
            'â' => ('a', 2),
            'î' => ('i', 1),
            'ș' | 'ş' => ('s', 1),
            'ț' | 'ţ' => ('t', 1),
            other => {
                // Any other accented letter sorts right after its base letter
                let mut decomposed = std::iter::once(other).nfd();
                match (decomposed.next(), decomposed.next()) {
                    (Some(base), Some(_)) => (base, 3),
                    _ => (other, 0),
                }
            }
        })
        .collect()
}
