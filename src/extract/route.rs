//! Route page extraction
//!
//! Required fields (name, grade, rating, coordinates) fail the item when they
//! are missing. Everything else is logged and defaulted.

use crate::config::ClassifyConfig;
use crate::crawler::RawDocument;
use crate::extract::{
    collapse_whitespace, ExtractedRecord, Extractor, LabelTable, ParseFailure, RecordPayload,
};
use crate::frontier::FrontierItem;
use crate::ConfigResult;
use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};

/// A harvested route
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteRecord {
    pub name: String,
    pub grade: String,
    pub long_grade: String,
    pub first_ascent: String,
    pub route_type: String,
    pub long_route_type: String,
    pub distance_ft: u32,
    pub pitches: u32,
    pub fixed_pieces: u32,
    pub stars: f64,
    pub votes: u32,
    pub views: u32,
    pub location: String,
    pub date_added: Option<NaiveDate>,
    pub shared_by: String,
    pub latitude: f64,
    pub longitude: f64,
    pub description: Vec<String>,
    pub protection: Vec<String>,
    pub directions: Vec<String>,
    pub misc: Vec<String>,
}

/// Parsed `Type:` cell
#[derive(Debug, Clone, PartialEq, Eq)]
struct RouteType {
    types: String,
    distance_ft: u32,
    pitches: u32,
    fixed_pieces: u32,
}

impl Default for RouteType {
    fn default() -> Self {
        Self {
            types: String::new(),
            distance_ft: 0,
            pitches: 1,
            fixed_pieces: 0,
        }
    }
}

/// Extracts `RouteRecord`s from route detail pages
#[derive(Debug, Clone, Default)]
pub struct RouteExtractor {
    labels: LabelTable,
}

impl RouteExtractor {
    pub fn new(labels: LabelTable) -> Self {
        Self { labels }
    }

    pub fn from_config(config: &ClassifyConfig) -> ConfigResult<Self> {
        Ok(Self::new(LabelTable::from_config(config)?))
    }

    fn parse(&self, html: &str, item: &FrontierItem) -> Result<RouteRecord, ParseFailure> {
        let page = Html::parse_document(html);
        let id = item.id.as_str();
        let fail = |field: &str, reason: &str| ParseFailure::new(id, field, reason);

        let name = first_text(&page, "h1")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| fail("name", "no <h1> heading"))?;

        let long_grade = first_text(&page, "h2.inline-block.mr-2")
            .filter(|grade| !grade.is_empty())
            .ok_or_else(|| fail("grade", "no grade heading"))?;
        let grade = long_grade
            .split("YDS")
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();

        let rating_selector = format!("span#starsWithAvgText-{}", id);
        let rating = first_text(&page, &rating_selector)
            .ok_or_else(|| fail("rating", "no rating span"))?;
        let (stars, votes) = parse_rating(&rating)
            .ok_or_else(|| fail("rating", &format!("unreadable rating '{}'", rating)))?;

        let (latitude, longitude) =
            parse_coordinates(&page).map_err(|reason| fail("coordinates", &reason))?;

        let mut record = RouteRecord {
            name,
            grade,
            long_grade,
            stars,
            votes,
            latitude,
            longitude,
            ..RouteRecord::default()
        };

        record.location = location_tree(&page).unwrap_or_else(|| {
            missing(id, "location");
            String::new()
        });

        let sections = self.labels.classify(
            section_blocks(&page)
                .iter()
                .map(|(title, text)| (title.as_str(), text.as_str())),
        );
        record.description = sections.description;
        record.directions = sections.directions;
        record.protection = sections.protection;
        record.misc = sections.misc;

        match table_value(&page, "FA:") {
            Some(first_ascent) => record.first_ascent = first_ascent,
            None => missing(id, "first_ascent"),
        }

        match table_value(&page, "Type:") {
            Some(long_type) => {
                let parsed = parse_route_type(&long_type);
                record.route_type = parsed.types;
                record.distance_ft = parsed.distance_ft;
                record.pitches = parsed.pitches;
                record.fixed_pieces = parsed.fixed_pieces;
                record.long_route_type = long_type;
            }
            None => {
                missing(id, "route_type");
                record.pitches = RouteType::default().pitches;
            }
        }

        match table_value(&page, "Page Views:").and_then(|views| parse_views(&views)) {
            Some(views) => record.views = views,
            None => missing(id, "views"),
        }

        match table_value(&page, "Shared By:") {
            Some(shared) => {
                let (shared_by, date_added) = parse_shared_by(&shared);
                record.shared_by = shared_by;
                record.date_added = date_added;
                if record.date_added.is_none() {
                    missing(id, "date_added");
                }
            }
            None => missing(id, "shared_by"),
        }

        Ok(record)
    }
}

impl Extractor for RouteExtractor {
    fn kind(&self) -> &'static str {
        "routes"
    }

    fn extract(
        &self,
        document: &RawDocument,
        item: &FrontierItem,
    ) -> Result<ExtractedRecord, ParseFailure> {
        let html = document
            .first_page()
            .ok_or_else(|| ParseFailure::new(&item.id, "page", "empty document"))?;

        let route = self.parse(html, item)?;

        Ok(ExtractedRecord {
            id: item.id.clone(),
            locator: item.locator.clone(),
            remote_version: item.remote_version.clone(),
            payload: RecordPayload::Route(route),
        })
    }
}

fn missing(id: &str, field: &str) {
    tracing::warn!(id, field, "Optional field missing, using default");
}

fn selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(e) => {
            tracing::debug!("Invalid selector {}: {:?}", css, e);
            None
        }
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

fn first_text(page: &Html, css: &str) -> Option<String> {
    let selector = selector(css)?;
    page.select(&selector).next().map(element_text)
}

/// `"Avg: 3.4 from 1,203 votes"` -> `(3.4, 1203)`
fn parse_rating(text: &str) -> Option<(f64, u32)> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let stars = tokens.get(1)?.parse().ok()?;
    let votes = tokens.get(3)?.replace(',', "").parse().ok()?;
    Some((stars, votes))
}

fn parse_coordinates(page: &Html) -> Result<(f64, f64), String> {
    let selector = selector(r#"script[type="application/ld+json"]"#)
        .ok_or_else(|| "invalid selector".to_string())?;

    for script in page.select(&selector) {
        let raw: String = script.text().collect();
        let Ok(json) = serde_json::from_str::<serde_json::Value>(&raw) else {
            continue;
        };
        let Some(geo) = json.get("geo") else {
            continue;
        };

        let latitude = json_number(geo.get("latitude")).ok_or("geo without latitude")?;
        let longitude = json_number(geo.get("longitude")).ok_or("geo without longitude")?;
        return Ok((latitude, longitude));
    }

    Err("no JSON-LD block with geo coordinates".to_string())
}

fn json_number(value: Option<&serde_json::Value>) -> Option<f64> {
    match value? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn location_tree(page: &Html) -> Option<String> {
    let container = selector("div.mb-half.small.text-warm")?;
    let link = selector("a")?;

    let div = page.select(&container).next()?;
    let names: Vec<String> = div.select(&link).map(element_text).collect();
    if names.is_empty() {
        return None;
    }

    Some(names.join(" > ").replace("All Locations > ", ""))
}

fn section_blocks(page: &Html) -> Vec<(String, String)> {
    let (Some(titles), Some(bodies)) = (selector("h2.mt-2"), selector("div.fr-view")) else {
        return Vec::new();
    };

    page.select(&titles)
        .map(element_text)
        .zip(page.select(&bodies).map(element_text))
        .collect()
}

/// Text of the `<td>` following the `<td>` whose text is `label`
fn table_value(page: &Html, label: &str) -> Option<String> {
    let cells = selector("td")?;

    let label_cell = page
        .select(&cells)
        .find(|cell| element_text(*cell) == label)?;

    label_cell
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|sibling| sibling.value().name() == "td")
        .map(element_text)
}

fn leading_number(text: &str) -> Option<u32> {
    let digits: String = text
        .trim()
        .chars()
        .filter(|c| *c != ',')
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// `"Trad, Sport, 120 ft (37 m), 2 pitches, Fixed Hardware (4)"`
fn parse_route_type(text: &str) -> RouteType {
    let mut parsed = RouteType::default();
    let mut types = Vec::new();

    let normalized = text.replace("Fixed Hardware", ", Fixed Hardware");
    for part in normalized.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        if part.starts_with("Fixed Hardware") {
            let count: String = part.chars().filter(char::is_ascii_digit).collect();
            parsed.fixed_pieces = count.parse().unwrap_or(0);
        } else if part.contains(" ft") {
            parsed.distance_ft = leading_number(part).unwrap_or(0);
        } else if part.contains("pitch") && leading_number(part).is_some() {
            parsed.pitches = leading_number(part).unwrap_or(1);
        } else {
            types.push(part);
        }
    }

    parsed.types = types.join(", ");
    parsed
}

/// `"12,345 total · 150/month"` -> `12345`
fn parse_views(text: &str) -> Option<u32> {
    text.split_whitespace()
        .next()
        .and_then(|first| first.replace(',', "").parse().ok())
}

/// `"Jane Doe on Jan 4, 2009 · Updates"` -> `("Jane Doe", 2009-01-04)`
fn parse_shared_by(text: &str) -> (String, Option<NaiveDate>) {
    let cleaned = collapse_whitespace(&text.replace("·Updates", " ").replace("· Updates", " "));
    let tokens: Vec<&str> = cleaned.split(' ').collect();

    for (index, window) in tokens.windows(3).enumerate() {
        let candidate = window.join(" ");
        if let Ok(date) = NaiveDate::parse_from_str(&candidate, "%b %d, %Y") {
            let mut name_end = index;
            if name_end > 0 && tokens[name_end - 1] == "on" {
                name_end -= 1;
            }
            return (tokens[..name_end].join(" "), Some(date));
        }
    }

    (cleaned, None)
}
