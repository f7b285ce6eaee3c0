//! Screening request construction.

use serde_json::{Value, json};
use uuid::Uuid;

/// Classification of the screened entity.
///
/// The provider only distinguishes individuals (people) from everything
/// else; the token is forwarded verbatim for non-individuals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityType {
    Individual,
    Other(String),
}

impl EntityType {
    /// Parse the entity-type token from an input row (case-insensitive).
    pub fn from_token(token: &str) -> Self {
        let normalized = token.trim().to_lowercase();
        if normalized == "individual" {
            Self::Individual
        } else {
            Self::Other(normalized)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Individual => "individual",
            Self::Other(token) => token,
        }
    }

    pub fn is_individual(&self) -> bool {
        matches!(self, Self::Individual)
    }
}

/// One screening lookup: a display name plus optional narrowing filters.
#[derive(Debug, Clone)]
pub struct ScreeningRequest {
    pub search_term: String,
    pub entity_type: EntityType,
    /// Birth-year/date token; only meaningful for individuals.
    pub birth_year: Option<String>,
    /// National identification number (PAN in the reference deployment).
    pub national_id: Option<String>,
}

impl ScreeningRequest {
    pub fn new(search_term: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            search_term: search_term.into(),
            entity_type,
            birth_year: None,
            national_id: None,
        }
    }

    pub fn with_birth_year(mut self, birth_year: Option<String>) -> Self {
        self.birth_year = birth_year.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_national_id(mut self, national_id: Option<String>) -> Self {
        self.national_id = national_id.filter(|s| !s.trim().is_empty());
        self
    }

    /// Serialize the provider payload.
    ///
    /// The birth-year filter is included only for individuals with a
    /// non-empty date field; the national-ID filter only when that field is
    /// non-empty. Each payload carries fresh task/group identifiers so the
    /// provider treats every row as an independent lookup.
    pub fn payload(&self) -> Value {
        let mut filters = json!({
            "types": ["sanctions", "pep", "warnings"],
            "name_fuzziness": "1",
            "search_profile": "all_default",
            "country_codes": ["IN"],
            "entity_type": self.entity_type.as_str(),
        });

        if self.entity_type.is_individual() {
            if let Some(birth_year) = &self.birth_year {
                filters["birth_year"] = json!(birth_year.trim());
            }
        }
        if let Some(national_id) = &self.national_id {
            filters["pan_number"] = json!(national_id.trim());
        }

        json!({
            "task_id": Uuid::new_v4().to_string(),
            "group_id": Uuid::new_v4().to_string(),
            "data": {
                "search_term": self.search_term,
                "filters": filters,
                "version": "2",
                "get_profile_pdf": false,
            }
        })
    }
}
