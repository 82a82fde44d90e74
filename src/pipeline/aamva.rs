//! AAMVA payload parsing: raw PDF417 text → named license fields.
//!
//! A license barcode carries one data element per line: a short uppercase tag
//! (`DAQ`, `DCS`, `DBB`, …) immediately followed by its value. This module
//! maps the tags it knows to [`Field`]s, reformats dates, and silently drops
//! everything else. Parsing never fails; a payload with nothing recognisable
//! yields an empty [`FieldMap`], which callers must tell apart from a decode
//! failure.
//!
//! ## Tag matching
//!
//! Most tags are three letters, a handful are four (`DCAC`, `DDEN`, `DADR`,
//! `DDGN`, `ZTZT`). The three-letter prefix is looked up first and the
//! four-letter prefix only when that misses, so `DADRICHARD` stays a middle
//! name rather than becoming a street address.
//!
//! ## Dates
//!
//! `YYMMDD` becomes `20YY-MM-DD` with no pivot-year windowing, so birth years
//! before 2000 come out a century late. This is a known limitation kept on
//! purpose until a windowing policy is decided.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Matches every line-ending convention: CRLF, LF, and bare CR.
static LINE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r\n|\r|\n").expect("valid regex"));

/// A data line must open with three uppercase ASCII letters.
static TAGGED_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{3}").expect("valid regex"));

/// Subfile designators that can be glued to the first element of a subfile.
const SUBFILE_TYPES: [&str; 2] = ["DL", "ID"];

macro_rules! fields {
    ($( $tag:literal => $variant:ident $( [$date:ident] )? ),+ $(,)?) => {
        /// A semantic license field, named after its AAMVA meaning.
        ///
        /// Serialises as its variant name (`"DateOfBirth"`), never as the raw tag.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub enum Field {
            $( $variant, )+
        }

        impl Field {
            /// Every field in table order.
            pub const ALL: &'static [Field] = &[ $( Field::$variant, )+ ];

            /// Look up the field for an exact AAMVA tag.
            pub fn from_tag(tag: &str) -> Option<Field> {
                match tag {
                    $( $tag => Some(Field::$variant), )+
                    _ => None,
                }
            }

            /// The AAMVA tag this field is read from.
            pub fn tag(self) -> &'static str {
                match self {
                    $( Field::$variant => $tag, )+
                }
            }

            /// Field name as it appears in serialised output.
            pub fn name(self) -> &'static str {
                match self {
                    $( Field::$variant => stringify!($variant), )+
                }
            }

            /// Whether values of this field are `YYMMDD` dates.
            pub fn is_date(self) -> bool {
                match self {
                    $( Field::$variant => fields!(@date $($date)?), )+
                }
            }
        }
    };
    (@date date) => { true };
    (@date) => { false };
}

fields! {
    "DAA" => FullName,
    "DCS" => CustomerFamilyName,
    "DAC" => CustomerFirstName,
    "DAD" => MiddleName,
    "DBA" => LicenseExpirationDate [date],
    "DBB" => DateOfBirth [date],
    "DBC" => Sex,
    "DBD" => IssueDate [date],
    "DBE" => Address,
    "DBF" => City,
    "DBG" => State,
    "DBH" => PostalCode,
    "DAJ" => LicenseNumber,
    "DCB" => CustomerSuffix,
    "DCD" => VehicleClass,
    "DCAC" => LicenseType,
    "DDEN" => DenominationCode,
    "DDF" => AlternateFirstName,
    "DADR" => ResidenceStreetAddress,
    "DDGN" => ResidenceStreetAddress2,
    "DAY" => Suffix,
    "DAU" => Height,
    "DAG" => ResidenceCity,
    "DAK" => AuditInformation,
    "DAQ" => DriverLicenseNumber,
    "DCF" => DocumentFilingNumber,
    "DCG" => Country,
    "DAZ" => EyeColor,
    "DCK" => CheckDigit,
    "DCL" => HairColor,
    "DDA" => DocumentDiscriminator,
    "DDB" => DocumentVersion,
    "DAW" => Weight,
    "DDK" => DocumentSecondaryID,
    "ZTZT" => Composite,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parsed license fields keyed by [`Field`].
///
/// Serialises as a flat JSON object (`{"DateOfBirth": "2080-01-15", …}`).
/// A map produced by one decode is never patched by another; each parse
/// returns a fresh value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMap(BTreeMap<Field, String>);

impl FieldMap {
    pub fn get(&self, field: Field) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0.contains_key(&field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Field, String> {
        self.0.iter()
    }

    /// Copy into a plain name → value map.
    pub fn to_named(&self) -> BTreeMap<&'static str, String> {
        self.0.iter().map(|(k, v)| (k.name(), v.clone())).collect()
    }

    fn insert(&mut self, field: Field, value: String) {
        self.0.insert(field, value);
    }
}

impl<'a> IntoIterator for &'a FieldMap {
    type Item = (&'a Field, &'a String);
    type IntoIter = btree_map::Iter<'a, Field, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Parse output plus the tags that had no mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseReport {
    pub fields: FieldMap,
    /// Tags seen on well-formed lines but absent from the table, in payload order.
    pub unmapped: Vec<String>,
}

/// Parse AAMVA text into a [`FieldMap`].
pub fn parse(raw: &str) -> FieldMap {
    parse_with_diagnostics(raw).fields
}

/// Parse AAMVA text, also reporting unmapped tags.
///
/// Later occurrences of a tag overwrite earlier ones.
pub fn parse_with_diagnostics(raw: &str) -> ParseReport {
    let mut report = ParseReport::default();

    for line in LINE_BREAK.split(raw) {
        if line.trim().is_empty() || !TAGGED_LINE.is_match(line) {
            continue;
        }

        match match_tag(line) {
            Some((field, rest)) => {
                let value = rest.trim();
                let value = if field.is_date() {
                    format_date(value)
                } else {
                    value.to_string()
                };
                report.fields.insert(field, value);
            }
            None => {
                let tag = &line[..3];
                debug!("Unmapped AAMVA tag {} with value {:?}", tag, line[3..].trim());
                report.unmapped.push(tag.to_string());
            }
        }
    }

    report
}

/// Find the field a data line carries and return it with the untrimmed value.
fn match_tag(line: &str) -> Option<(Field, &str)> {
    if let Some(hit) = lookup(line) {
        return Some(hit);
    }

    // "DLDAQD1234562": the subfile header swallows the line break before its
    // first element.
    SUBFILE_TYPES
        .iter()
        .filter_map(|designator| line.strip_prefix(designator))
        .find_map(lookup)
}

fn lookup(line: &str) -> Option<(Field, &str)> {
    [3, 4].into_iter().find_map(|len| {
        let tag = line.get(..len)?;
        let field = Field::from_tag(tag)?;
        Some((field, &line[len..]))
    })
}

/// Reformat an AAMVA date as `YYYY-MM-DD`.
///
/// * `YYMMDD` → `20YY-MM-DD` (no windowing).
/// * `CCYYMMDD` starting with `19` or `20` → its `YYMMDD` tail, same rule.
/// * Anything else is returned unchanged, including six characters that are
///   not all digits (`12AB34` stays `12AB34` rather than becoming a
///   half-numeric date).
pub fn format_date(value: &str) -> String {
    let all_digits = value.bytes().all(|b| b.is_ascii_digit());

    let yymmdd = match value.len() {
        6 if all_digits => value,
        8 if all_digits && (value.starts_with("19") || value.starts_with("20")) => &value[2..],
        _ => return value.to_string(),
    };

    let year = 2000 + yymmdd[0..2].parse::<u32>().unwrap_or(0);
    format!("{}-{}-{}", year, &yymmdd[2..4], &yymmdd[4..6])
}
