//! Catalog of extractors: one entry per target column.

use crate::validate::{FieldParser, FORM_TYPES};

/// Configuration for one extractor.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    /// Target column in `pdf_pages`. Must be a plain SQL identifier.
    pub column: &'static str,
    /// Form types this extractor claims. Empty claims every row.
    pub form_types: &'static [&'static str],
    /// Instruction sent to the chat service.
    pub prompt: &'static str,
    /// Query sent to the document-analysis service.
    pub query: &'static str,
    pub parser: FieldParser,
    /// Persist `sentinel` for not_found/invalid results instead of leaving the row pending.
    pub persist_sentinel: bool,
    pub sentinel: &'static str,
}

impl FieldSpec {
    pub fn claims(&self, form_type: Option<&str>) -> bool {
        self.form_types.is_empty()
            || form_type
                .map(|ft| self.form_types.contains(&ft))
                .unwrap_or(false)
    }
}

const FORM_8850: &[&str] = &["8850 Form"];
const FORM_8QF: &[&str] = &["8 Question Form"];
const FORM_NYYF1: &[&str] = &["NYYF_1"];
const SSN_FORMS: &[&str] = &["8850 Form", "8 Question Form", "NYYF_1"];
const ELIGIBILITY_FORMS: &[&str] = &["8850 Form", "8 Question Form"];
const STATE_FORMS: &[&str] = &["8850 Form", "NYYF_1"];

const NAME_LEN: Option<usize> = Some(100);

/// Yes/No question stored under its own name; unreadable answers stay pending.
macro_rules! yes_no {
    ($name:literal, $forms:expr, $question:literal) => {
        FieldSpec {
            name: $name,
            column: $name,
            form_types: $forms,
            prompt: concat!(
                "Answer this question about the form in the image: ",
                $question,
                " Respond with only Yes or No."
            ),
            query: $question,
            parser: FieldParser::YesNo,
            persist_sentinel: false,
            sentinel: "NOT_FOUND",
        }
    };
}

static CATALOG: &[FieldSpec] = &[
    FieldSpec {
        name: "form_type",
        column: "form_type",
        form_types: &[],
        prompt: "Classify this scanned document. Valid answers: 8850 Form (IRS Pre-Screening \
                 Notice and Certification Request for the Work Opportunity Credit), \
                 8 Question Form (about eight numbered Yes/No eligibility questions), \
                 NYYF_1 (New York Youth Jobs Program youth certification with applicant information), \
                 NYYF_2 (New York Youth Jobs Program qualifications and agreement), \
                 POU_1 (Participant Statement of Understanding), \
                 POU_2 (CA and SNAP benefits income reporting conditions), \
                 Identity Document (driver license, social security card or similar ID), \
                 Blank Form (empty or nearly empty page), \
                 Other/Undefined (anything else). Respond with only the form type.",
        query: "What type of form is this?",
        parser: FieldParser::FormType,
        persist_sentinel: false,
        sentinel: "NOT_FOUND",
    },
    FieldSpec {
        name: "first_name_8qf",
        column: "firstname_gemini_8qf",
        form_types: FORM_8QF,
        prompt: "Extract the applicant's first name from this form image. Respond with only \
                 the first name in uppercase, or NOT_FOUND if it is not present.",
        query: "What is the applicant's first name?",
        parser: FieldParser::Text { uppercase: true, max_len: NAME_LEN },
        persist_sentinel: true,
        sentinel: "NOT_FOUND",
    },
    FieldSpec {
        name: "last_name_8qf",
        column: "lastname_gemini_8qf",
        form_types: FORM_8QF,
        prompt: "Extract the applicant's last name from this form image. Respond with only \
                 the last name in uppercase, or NOT_FOUND if it is not present.",
        query: "What is the applicant's last name?",
        parser: FieldParser::Text { uppercase: true, max_len: NAME_LEN },
        persist_sentinel: true,
        sentinel: "NOT_FOUND",
    },
    FieldSpec {
        name: "date_signed_8qf",
        column: "date_signed_gemini_8qf",
        form_types: FORM_8QF,
        prompt: "Extract the date this 8 Question Form was signed, usually near the bottom. \
                 Respond only with the date in the format MM/DD/YYYY.",
        query: "What's the date the form was signed?",
        parser: FieldParser::Date,
        persist_sentinel: false,
        sentinel: "NOT_FOUND",
    },
    FieldSpec {
        name: "dob_8850",
        column: "dob_gemini_8850",
        form_types: FORM_8850,
        prompt: "Extract the applicant's date of birth from this 8850 Form, usually near the top. \
                 Respond only with the date in the format MM/DD/YYYY.",
        query: "What is the date of birth of the applicant?",
        parser: FieldParser::Date,
        persist_sentinel: false,
        sentinel: "NOT_FOUND",
    },
    FieldSpec {
        name: "street1_8850",
        column: "street_address",
        form_types: FORM_8850,
        prompt: "Extract the first line of the street address (street number and name) from \
                 this 8850 Form. Respond with only the address line.",
        query: "What is the street address?",
        parser: FieldParser::Text { uppercase: false, max_len: NAME_LEN },
        persist_sentinel: true,
        sentinel: "NOT_FOUND",
    },
    FieldSpec {
        name: "street2_8850",
        column: "street2_gemini_8850",
        form_types: FORM_8850,
        prompt: "Extract the second line of the street address (apartment, suite, unit) from \
                 this 8850 Form. If there is no second line respond with NOT_FOUND. Respond \
                 with only the address line or NOT_FOUND.",
        query: "What is the second line of the street address?",
        parser: FieldParser::Text { uppercase: false, max_len: NAME_LEN },
        // most applicants have no second line; NOT_FOUND marks the row done
        persist_sentinel: true,
        sentinel: "NOT_FOUND",
    },
    FieldSpec {
        name: "city_8850",
        column: "city_gemini_8850",
        form_types: FORM_8850,
        prompt: "Extract the city from the address on this 8850 Form. Respond with only the \
                 city name in uppercase.",
        query: "What is the city?",
        parser: FieldParser::Text { uppercase: true, max_len: NAME_LEN },
        persist_sentinel: false,
        sentinel: "NOT_FOUND",
    },
    FieldSpec {
        name: "zip_8850",
        column: "zip_gemini_8850",
        form_types: FORM_8850,
        prompt: "Extract the ZIP code from the address on this 8850 Form. Respond with only the \
                 ZIP code; include all 9 digits as #####-#### if present.",
        query: "What's the zip code?",
        parser: FieldParser::Zip,
        persist_sentinel: false,
        sentinel: "NOT_FOUND",
    },
    FieldSpec {
        name: "ssn",
        column: "extracted_ssn",
        form_types: SSN_FORMS,
        prompt: "Extract the Social Security Number from this form image in the format \
                 ###-##-####. Respond with only the SSN.",
        query: "What is the social security number?",
        parser: FieldParser::Ssn,
        persist_sentinel: true,
        sentinel: "Invalid SSN",
    },
    FieldSpec {
        name: "state",
        column: "state_gemini",
        form_types: STATE_FORMS,
        prompt: "Extract the state from the applicant's address on this form. Respond with only \
                 the state, or NOT_FOUND if it is not present.",
        query: "What's the state?",
        parser: FieldParser::Text { uppercase: true, max_len: NAME_LEN },
        persist_sentinel: false,
        sentinel: "NOT_FOUND",
    },
    FieldSpec {
        name: "signature_name",
        column: "signature_name",
        form_types: ELIGIBILITY_FORMS,
        prompt: "Read the name written or signed in the signature area of this form. Respond \
                 with only the name, or NOT_FOUND if the form is not signed.",
        query: "What's the signature name?",
        parser: FieldParser::Text { uppercase: false, max_len: NAME_LEN },
        persist_sentinel: true,
        sentinel: "NOT_FOUND",
    },
    yes_no!("form_is_signed", ELIGIBILITY_FORMS, "Is the form signed?"),
    yes_no!(
        "worked_before",
        ELIGIBILITY_FORMS,
        "Has the applicant worked for this employer before? (Yes/No)"
    ),
    yes_no!(
        "snap_benefits",
        ELIGIBILITY_FORMS,
        "Is the applicant receiving SNAP benefits? (Yes/No)"
    ),
    yes_no!(
        "snap_3_of_5_months",
        ELIGIBILITY_FORMS,
        "Has the applicant received SNAP benefits for 3 of the last 5 months? (Yes/No)"
    ),
    yes_no!(
        "tanf_welfare",
        ELIGIBILITY_FORMS,
        "Is the applicant receiving TANF assistance? (Yes/No)"
    ),
    yes_no!(
        "ssi_benefits",
        ELIGIBILITY_FORMS,
        "Is the applicant receiving SSI benefits? (Yes/No)"
    ),
    yes_no!(
        "unemployed_27_weeks",
        ELIGIBILITY_FORMS,
        "Has the applicant been unemployed for 27 weeks or more? (Yes/No)"
    ),
    yes_no!(
        "ticket_to_work",
        ELIGIBILITY_FORMS,
        "Is the applicant participating in a ticket to work program? (Yes/No)"
    ),
    yes_no!(
        "felony_conviction",
        ELIGIBILITY_FORMS,
        "Has the applicant been convicted of a felony? (Yes/No)"
    ),
    yes_no!("veteran", ELIGIBILITY_FORMS, "Is the applicant a veteran? (Yes/No)"),
    yes_no!(
        "nyyf_high_school",
        FORM_NYYF1,
        "Is the applicant currently attending high school?"
    ),
    yes_no!(
        "nyyf_hse_program",
        FORM_NYYF1,
        "Is the applicant currently enrolled in a High School Equivalent program?"
    ),
    yes_no!(
        "nyyf_any_statement_true",
        FORM_NYYF1,
        "Are any of the 4 statements true?"
    ),
    yes_no!(
        "nyyf_minor_with_permission",
        FORM_NYYF1,
        "Is the applicant 16-17 years old and has parent/guardian permission?"
    ),
    yes_no!(
        "nyyf_working_papers",
        FORM_NYYF1,
        "Does the applicant have working papers?"
    ),
    yes_no!("nyyf_age_18_to_24", FORM_NYYF1, "Is the applicant 18 to 24 years old?"),
];

pub fn catalog() -> &'static [FieldSpec] {
    CATALOG
}

pub fn find(name: &str) -> Option<&'static FieldSpec> {
    CATALOG
        .iter()
        .find(|f| f.name.eq_ignore_ascii_case(name) || f.column.eq_ignore_ascii_case(name))
}

pub fn names() -> Vec<&'static str> {
    CATALOG.iter().map(|f| f.name).collect()
}

/// Column names are interpolated into SQL, so only `[A-Za-z_][A-Za-z0-9_]*` is allowed.
pub fn is_safe_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn known_form_types() -> &'static [&'static str] {
    &FORM_TYPES
}
