//! Healthcare sectors and per-deck classification records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// One of the eight fixed healthcare sectors.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct HealthcareSector {
    pub id: i64,
    pub name: String,
    pub display_name: String,
    pub description: String,
    /// JSON array of lowercase keywords; supportive context only, never
    /// decisive on their own.
    pub keywords: String,
    pub confidence_threshold: f64,
}

impl HealthcareSector {
    pub fn keyword_list(&self) -> Vec<String> {
        serde_json::from_str(&self.keywords).unwrap_or_default()
    }

    /// Count keyword hits against a lowercased offering text.
    pub fn keyword_hits(&self, offering_lower: &str) -> usize {
        self.keyword_list()
            .iter()
            .filter(|kw| offering_lower.contains(kw.as_str()))
            .count()
    }
}

/// Result of classifying one deck; one row per deck (UPSERT on deck_id).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct ClassificationRecord {
    pub id: i64,
    pub deck_id: i64,
    pub sector_id: i64,
    pub confidence: f64,
    pub reasoning: String,
    pub template_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sector_with_keywords(keywords: &str) -> HealthcareSector {
        HealthcareSector {
            id: 1,
            name: "digital_therapeutics".to_string(),
            display_name: "Digital Therapeutics & Mental Health".to_string(),
            description: String::new(),
            keywords: keywords.to_string(),
            confidence_threshold: 0.6,
        }
    }

    #[test]
    fn keyword_hits_counts_contained_terms() {
        let sector = sector_with_keywords(r#"["depression","digital therapeutic","cbt"]"#);
        let offering = "fda-cleared prescription digital therapeutic for depression";
        assert_eq!(sector.keyword_hits(offering), 2);
    }

    #[test]
    fn malformed_keywords_yield_no_hits() {
        let sector = sector_with_keywords("not-json");
        assert_eq!(sector.keyword_hits("anything"), 0);
        assert!(sector.keyword_list().is_empty());
    }
}
