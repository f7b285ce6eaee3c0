//! Row transformation: one input record in, one output record out.

use std::sync::Arc;

use tracing::warn;

use bulkscreen_screening::{
    EntityType, RetryPolicy, ScreeningClient, ScreeningRequest, ScreeningVerdict,
};

/// Sentinel written to `api_status_code` when no HTTP status was observed
/// (timeouts, connection failures).
pub const SENTINEL_STATUS_CODE: i32 = -1;

/// Minimum fields a data row must carry to be screened.
pub const MIN_INPUT_FIELDS: usize = 3;

/// A parsed input row: `[id, name, entity_type, dob?, national_id?]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRecord {
    pub row_id: String,
    pub name: String,
    pub entity_type: EntityType,
    pub date_of_birth: Option<String>,
    pub national_id: Option<String>,
}

impl InputRecord {
    /// Parse a raw delimited record.
    ///
    /// Returns `None` for rows with fewer than [`MIN_INPUT_FIELDS`] fields;
    /// those are skipped by policy, not treated as a job failure.
    pub fn from_record(record: &csv::StringRecord) -> Option<Self> {
        if record.len() < MIN_INPUT_FIELDS {
            return None;
        }

        let non_empty = |s: &str| {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        };

        Some(Self {
            row_id: record.get(0).unwrap_or_default().to_string(),
            name: record.get(1).unwrap_or_default().trim().to_string(),
            entity_type: EntityType::from_token(record.get(2).unwrap_or_default()),
            date_of_birth: record.get(3).and_then(non_empty),
            national_id: record.get(4).and_then(non_empty),
        })
    }
}

/// The derived fields appended to each surviving input row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutputRecord {
    pub api_status_code: i32,
    pub match_status: Option<String>,
    pub total_hits: Option<i64>,
    pub api_error: Option<String>,
    pub hits_json: Option<String>,
}

impl OutputRecord {
    /// Header names of the derived columns.
    pub fn derived_columns(include_hits: bool) -> &'static [&'static str] {
        if include_hits {
            &["api_status_code", "match_status", "total_hits", "api_error", "hits_json"]
        } else {
            &["api_status_code", "match_status", "total_hits", "api_error"]
        }
    }

    /// The derived column values, in header order. Empty strings stand in
    /// for absent values so the output stays rectangular per row.
    pub fn into_fields(self, include_hits: bool) -> Vec<String> {
        let mut fields = vec![
            self.api_status_code.to_string(),
            self.match_status.unwrap_or_default(),
            self.total_hits.map(|n| n.to_string()).unwrap_or_default(),
            self.api_error.unwrap_or_default(),
        ];
        if include_hits {
            fields.push(self.hits_json.unwrap_or_default());
        }
        fields
    }
}

/// Transforms one input record into one output record via the screening
/// service.
///
/// No shared mutable state; the only side effect is the outbound call (and
/// its retries).
pub struct RowTransformer {
    client: Arc<dyn ScreeningClient>,
    retry: RetryPolicy,
    fetch_hit_details: bool,
}

impl RowTransformer {
    pub fn new(client: Arc<dyn ScreeningClient>, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            fetch_hit_details: false,
        }
    }

    /// Also dereference the provider's secondary hits resource and carry
    /// the raw payload in the `hits_json` column.
    pub fn with_hit_details(mut self, fetch_hit_details: bool) -> Self {
        self.fetch_hit_details = fetch_hit_details;
        self
    }

    pub fn includes_hit_details(&self) -> bool {
        self.fetch_hit_details
    }

    /// Screen one record.
    ///
    /// Never fails: a remote failure (after retries) is encoded into the
    /// output fields so a single bad row cannot abort the batch.
    pub async fn transform(&self, record: &InputRecord) -> OutputRecord {
        let request = ScreeningRequest::new(&record.name, record.entity_type.clone())
            .with_birth_year(record.date_of_birth.clone())
            .with_national_id(record.national_id.clone());

        match self.retry.run(|| self.client.screen(&request)).await {
            Ok(verdict) => self.from_verdict(verdict).await,
            Err(err) => OutputRecord {
                api_status_code: err
                    .status_code()
                    .map(i32::from)
                    .unwrap_or(SENTINEL_STATUS_CODE),
                api_error: Some(err.to_string()),
                ..OutputRecord::default()
            },
        }
    }

    async fn from_verdict(&self, verdict: ScreeningVerdict) -> OutputRecord {
        let hits_json = match (&verdict.hits_resource, self.fetch_hit_details) {
            (Some(resource), true) => match self.client.fetch_hits(resource).await {
                Ok(payload) => Some(payload.to_string()),
                Err(err) => {
                    // The verdict itself is still valid; only the detail
                    // fetch failed.
                    warn!(error = %err, "hits detail fetch failed");
                    None
                }
            },
            _ => None,
        };

        OutputRecord {
            api_status_code: i32::from(verdict.status_code),
            match_status: verdict.match_status,
            total_hits: verdict.total_hits,
            api_error: None,
            hits_json,
        }
    }
}
