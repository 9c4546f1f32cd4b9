//! Route stats extraction from the paginated JSON API
//!
//! Each route has four stat endpoints (`{api_base}/{id}/{stars|ticks|todos|ratings}`)
//! answering `{"total": n, "last_page": p, "data": [...]}`. All pages of each
//! endpoint are fetched before extraction.

use crate::crawler::{FetchPlan, Pagination, PlannedPart, RawDocument};
use crate::extract::{ExtractedRecord, Extractor, ParseFailure, RecordPayload};
use crate::frontier::FrontierItem;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatCategory {
    Stars,
    Ticks,
    Todos,
    Ratings,
}

impl StatCategory {
    pub const ALL: [StatCategory; 4] = [Self::Stars, Self::Ticks, Self::Todos, Self::Ratings];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stars => "stars",
            Self::Ticks => "ticks",
            Self::Todos => "todos",
            Self::Ratings => "ratings",
        }
    }
}

/// Totals reported by the API, one per category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatCounts {
    pub stars: u64,
    pub ticks: u64,
    pub todos: u64,
    pub ratings: u64,
}

impl StatCounts {
    pub fn get(&self, category: StatCategory) -> u64 {
        match category {
            StatCategory::Stars => self.stars,
            StatCategory::Ticks => self.ticks,
            StatCategory::Todos => self.todos,
            StatCategory::Ratings => self.ratings,
        }
    }

    pub fn set(&mut self, category: StatCategory, value: u64) {
        match category {
            StatCategory::Stars => self.stars = value,
            StatCategory::Ticks => self.ticks = value,
            StatCategory::Todos => self.todos = value,
            StatCategory::Ratings => self.ratings = value,
        }
    }
}

/// One star vote, tick, todo or grade rating
#[derive(Debug, Clone, PartialEq)]
pub struct StatEntry {
    pub category: StatCategory,
    pub user: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,

    /// Remaining fields of the API entry as a JSON object
    pub details: Value,
}

/// All stats harvested for one route
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsRecord {
    pub counts: StatCounts,
    pub entries: Vec<StatEntry>,
}

impl StatsRecord {
    pub fn entries_in(&self, category: StatCategory) -> impl Iterator<Item = &StatEntry> {
        self.entries.iter().filter(move |entry| entry.category == category)
    }
}

/// Extracts `StatsRecord`s from the stats API
#[derive(Debug, Clone)]
pub struct StatsExtractor {
    api_base: String,
}

impl StatsExtractor {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn parse_category(
        &self,
        item: &FrontierItem,
        category: StatCategory,
        pages: &[String],
    ) -> Result<(u64, Vec<StatEntry>), ParseFailure> {
        let field = category.as_str();
        let fail = |reason: String| ParseFailure::new(&item.id, field, reason);

        let mut total = None;
        let mut entries = Vec::new();

        for (index, body) in pages.iter().enumerate() {
            let json: Value = serde_json::from_str(body)
                .map_err(|e| fail(format!("page {} is not JSON: {}", index + 1, e)))?;

            if index == 0 {
                total = Some(
                    json.get("total")
                        .and_then(Value::as_u64)
                        .ok_or_else(|| fail("missing total".to_string()))?,
                );
            }

            let data = json
                .get("data")
                .and_then(Value::as_array)
                .ok_or_else(|| fail(format!("page {} has no data array", index + 1)))?;

            for raw in data {
                let Value::Object(object) = raw else {
                    continue;
                };
                if category == StatCategory::Ratings && object.contains_key("userId") {
                    continue;
                }
                entries.push(normalize_entry(category, object.clone()));
            }
        }

        let total = total.ok_or_else(|| fail("no pages fetched".to_string()))?;
        if entries.len() as u64 != total {
            tracing::warn!(
                id = %item.id,
                category = field,
                total,
                collected = entries.len(),
                "Stat entry count does not match reported total"
            );
        }

        Ok((total, entries))
    }
}

/// Drops the remote id, flattens `user` and `allRatings`, cleans tick text
fn normalize_entry(category: StatCategory, mut object: Map<String, Value>) -> StatEntry {
    object.remove("id");

    let user = match object.remove("user") {
        Some(Value::Object(user)) => user
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        _ => "unknown".to_string(),
    };

    if let Some(Value::Array(ratings)) = object.get("allRatings") {
        let joined = ratings
            .iter()
            .map(|rating| match rating {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        object.insert("allRatings".to_string(), Value::String(joined));
    }

    if category == StatCategory::Ticks {
        if let Some(Value::String(text)) = object.get_mut("text") {
            *text = text.replace("&middot;", "").trim().to_string();
        }
    }

    let created_at = take_string(&mut object, "createdAt");
    let updated_at = take_string(&mut object, "updatedAt");

    StatEntry {
        category,
        user,
        created_at,
        updated_at,
        details: Value::Object(object),
    }
}

fn take_string(object: &mut Map<String, Value>, key: &str) -> Option<String> {
    match object.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

impl Extractor for StatsExtractor {
    fn kind(&self) -> &'static str {
        "stats"
    }

    fn plan(&self, item: &FrontierItem) -> FetchPlan {
        FetchPlan {
            parts: StatCategory::ALL
                .iter()
                .map(|category| PlannedPart {
                    name: category.as_str().to_string(),
                    locator: format!("{}/{}/{}", self.api_base, item.id, category.as_str()),
                    pagination: Pagination::LastPage {
                        param: "page".to_string(),
                    },
                })
                .collect(),
        }
    }

    fn extract(
        &self,
        document: &RawDocument,
        item: &FrontierItem,
    ) -> Result<ExtractedRecord, ParseFailure> {
        let mut record = StatsRecord::default();

        for category in StatCategory::ALL {
            let part = document.part(category.as_str()).ok_or_else(|| {
                ParseFailure::new(&item.id, category.as_str(), "endpoint not fetched")
            })?;

            let (total, entries) = self.parse_category(item, category, &part.pages)?;
            record.counts.set(category, total);
            record.entries.extend(entries);
        }

        Ok(ExtractedRecord {
            id: item.id.clone(),
            locator: item.locator.clone(),
            remote_version: item.remote_version.clone(),
            payload: RecordPayload::Stats(record),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::DocumentPart;
    use serde_json::json;

    fn item() -> FrontierItem {
        FrontierItem::new("101", "https://example.com/route/101/crack", "routes-1", "2024-01-01")
    }

    fn document(parts: Vec<(&str, Vec<Value>)>) -> RawDocument {
        RawDocument {
            parts: parts
                .into_iter()
                .map(|(name, pages)| DocumentPart {
                    name: name.to_string(),
                    pages: pages.iter().map(Value::to_string).collect(),
                })
                .collect(),
        }
    }

    fn full_document() -> RawDocument {
        document(vec![
            (
                "stars",
                vec![json!({"total": 2, "last_page": 1, "data": [
                    {"id": 1, "score": 3, "user": {"id": 9, "name": "alice"}, "createdAt": "2020-01-01"},
                    {"id": 2, "score": 2, "user": false}
                ]})],
            ),
            (
                "ticks",
                vec![
                    json!({"total": 2, "last_page": 2, "data": [
                        {"id": 3, "text": "&middot; Lead / Onsight. ", "user": {"name": "bob"}}
                    ]}),
                    json!({"total": 2, "last_page": 2, "data": [
                        {"id": 4, "text": "Follow.", "style": "Follow"}
                    ]}),
                ],
            ),
            ("todos", vec![json!({"total": 0, "last_page": 1, "data": []})]),
            (
                "ratings",
                vec![json!({"total": 2, "last_page": 1, "data": [
                    {"id": 5, "allRatings": ["5.10a", "PG13"], "user": {"name": "carol"}},
                    {"id": 6, "userId": 77, "rating": "5.9"}
                ]})],
            ),
        ])
    }

    #[test]
    fn test_plan_covers_every_category() {
        let plan = StatsExtractor::new("https://example.com/api/v2/routes/").plan(&item());

        let locators: Vec<_> = plan.parts.iter().map(|p| p.locator.as_str()).collect();
        assert_eq!(
            locators,
            vec![
                "https://example.com/api/v2/routes/101/stars",
                "https://example.com/api/v2/routes/101/ticks",
                "https://example.com/api/v2/routes/101/todos",
                "https://example.com/api/v2/routes/101/ratings",
            ]
        );
        assert!(plan
            .parts
            .iter()
            .all(|p| matches!(p.pagination, Pagination::LastPage { .. })));
    }

    #[test]
    fn test_extract_normalizes_entries() {
        let record = StatsExtractor::new("https://example.com/api")
            .extract(&full_document(), &item())
            .unwrap();
        let RecordPayload::Stats(stats) = record.payload else {
            panic!("expected stats payload");
        };

        assert_eq!(
            stats.counts,
            StatCounts {
                stars: 2,
                ticks: 2,
                todos: 0,
                ratings: 2
            }
        );

        let stars: Vec<_> = stats.entries_in(StatCategory::Stars).collect();
        assert_eq!(stars.len(), 2);
        assert_eq!(stars[0].user, "alice");
        assert_eq!(stars[0].created_at.as_deref(), Some("2020-01-01"));
        assert_eq!(stars[1].user, "unknown");
        assert!(stars[0].details.get("id").is_none());

        let ticks: Vec<_> = stats.entries_in(StatCategory::Ticks).collect();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].details["text"], "Lead / Onsight.");

        let ratings: Vec<_> = stats.entries_in(StatCategory::Ratings).collect();
        assert_eq!(ratings.len(), 1);
        assert_eq!(ratings[0].details["allRatings"], "5.10a, PG13");
    }

    #[test]
    fn test_missing_total_is_parse_failure() {
        let mut doc = full_document();
        doc.parts[2].pages = vec![json!({"data": []}).to_string()];

        let failure = StatsExtractor::new("https://example.com/api")
            .extract(&doc, &item())
            .unwrap_err();
        assert_eq!(failure.field, "todos");
    }

    #[test]
    fn test_missing_part_is_parse_failure() {
        let mut doc = full_document();
        doc.parts.retain(|part| part.name != "ratings");

        let failure = StatsExtractor::new("https://example.com/api")
            .extract(&doc, &item())
            .unwrap_err();
        assert_eq!(failure.field, "ratings");
    }
}
