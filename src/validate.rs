//! Field-specific normalization of raw service answers.

use regex::Regex;
use std::sync::OnceLock;

/// Outcome of validating one raw answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Value(String),
    NotFound,
    Invalid,
}

/// How a field's raw answer is checked and normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldParser {
    Text { uppercase: bool, max_len: Option<usize> },
    Date,
    Ssn,
    Zip,
    FormType,
    YesNo,
}

impl FieldParser {
    pub fn parse(&self, raw: &str) -> Parsed {
        match *self {
            FieldParser::Text { uppercase, max_len } => parse_text(raw, uppercase, max_len),
            FieldParser::Date => parse_date(raw),
            FieldParser::Ssn => validate_and_format_ssn(raw),
            FieldParser::Zip => parse_zip(raw),
            FieldParser::FormType => parse_form_type(raw),
            FieldParser::YesNo => parse_yes_no(raw),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FieldParser::Text { .. } => "text",
            FieldParser::Date => "date",
            FieldParser::Ssn => "ssn",
            FieldParser::Zip => "zip",
            FieldParser::FormType => "form_type",
            FieldParser::YesNo => "yes_no",
        }
    }
}

/// Literal answer the prompts ask the model to give when a field is absent.
pub const NOT_FOUND_ANSWER: &str = "NOT_FOUND";

pub fn parse_text(raw: &str, uppercase: bool, max_len: Option<usize>) -> Parsed {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case(NOT_FOUND_ANSWER) {
        return Parsed::NotFound;
    }
    let mut value = if uppercase {
        trimmed.to_uppercase()
    } else {
        trimmed.to_string()
    };
    if let Some(max) = max_len {
        if value.chars().count() > max {
            value = value.chars().take(max).collect::<String>().trim_end().to_string();
        }
    }
    if value.is_empty() {
        Parsed::NotFound
    } else {
        Parsed::Value(value)
    }
}

/// Shape check only: `MM/DD/YYYY` with digits in place. `02/30/2020` passes.
pub fn parse_date(raw: &str) -> Parsed {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^[0-9]{2}/[0-9]{2}/[0-9]{4}$").unwrap());
    let trimmed = raw.trim();
    if re.is_match(trimmed) {
        Parsed::Value(trimmed.to_string())
    } else {
        Parsed::NotFound
    }
}

pub fn validate_and_format_ssn(raw: &str) -> Parsed {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 9 {
        return Parsed::Invalid;
    }
    Parsed::Value(format!("{}-{}-{}", &digits[..3], &digits[3..5], &digits[5..]))
}

pub fn parse_zip(raw: &str) -> Parsed {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^[0-9]{5}(-[0-9]{4})?$").unwrap());
    let trimmed = raw.trim();
    if re.is_match(trimmed) {
        Parsed::Value(trimmed.to_string())
    } else {
        Parsed::NotFound
    }
}

pub const FORM_TYPES: [&str; 9] = [
    "8850 Form",
    "8 Question Form",
    "NYYF_1",
    "NYYF_2",
    "POU_1",
    "POU_2",
    "Identity Document",
    "Blank Form",
    "Other/Undefined",
];

const OTHER_FORM_TYPE: &str = "Other/Undefined";

pub fn parse_form_type(raw: &str) -> Parsed {
    let answer = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c == '`')
        .trim();
    if answer.is_empty() {
        return Parsed::NotFound;
    }
    let known = FORM_TYPES
        .iter()
        .find(|label| label.eq_ignore_ascii_case(answer))
        .copied()
        .unwrap_or(OTHER_FORM_TYPE);
    Parsed::Value(known.to_string())
}

/// `Yes`/`No` from yes/no/true/false in any case; anything else is not found.
pub fn parse_yes_no(raw: &str) -> Parsed {
    let answer = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c == '`')
        .trim()
        .to_ascii_lowercase();
    match answer.as_str() {
        "yes" | "true" => Parsed::Value("Yes".to_string()),
        "no" | "false" => Parsed::Value("No".to_string()),
        _ => Parsed::NotFound,
    }
}
