// Record types and caller-side rules for the five trackers

use crate::live::LiveCollection;
use crate::record::Record;
use crate::store::StoreError;
use crate::sync::CollectionSync;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

pub const TODO_PATH: &str = "todolist";
pub const BOOKS_PATH: &str = "booktracker";
pub const FILMS_PATH: &str = "filmtracker";
pub const TRAVEL_PATH: &str = "traveljournal";
pub const WATER_PATH: &str = "watertracker";

pub const TODO_CATEGORIES: [&str; 7] = ["Study", "Groceries", "Documents", "Sport", "Personal", "Health", "Other"];

pub const DEFAULT_WATER_GOAL: u32 = 2000;
pub const WATER_QUICK_AMOUNTS: [u32; 2] = [250, 500];
pub const MAX_FILM_RATING: u8 = 10;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// To-do list entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub name: String,
    pub category: String,
}

impl TodoItem {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
        }
    }

    /// Whether the category is one of the suggested ones (free text is allowed)
    pub fn has_known_category(&self) -> bool {
        TODO_CATEGORIES.iter().any(|c| c.eq_ignore_ascii_case(self.category.trim()))
    }
}

/// A book saved from search results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedBook {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl SavedBook {
    pub fn first_author(&self) -> Option<&str> {
        self.authors.first().map(String::as_str)
    }
}

/// Logical equality for saved books: same title and first author
///
/// Case and surrounding whitespace are ignored. Two different books sharing a
/// title and lead author compare equal; that false match is accepted.
pub fn same_book(a: &SavedBook, b: &SavedBook) -> bool {
    fn norm(s: &str) -> String {
        s.trim().to_lowercase()
    }
    norm(&a.title) == norm(&b.title) && a.first_author().map(norm) == b.first_author().map(norm)
}

/// Saved record matching `candidate`, if the book is already saved
pub fn find_saved<'a>(saved: &'a LiveCollection<SavedBook>, candidate: &SavedBook) -> Option<&'a Record<SavedBook>> {
    saved.find_by(|book| same_book(book, candidate))
}

/// Film diary entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Film {
    pub name: String,
    #[serde(default)]
    pub comments: String,
    /// 0..=10; out-of-range stored values are clamped on decode
    #[serde(deserialize_with = "clamped_rating")]
    pub rating: u8,
    #[serde(default)]
    pub image: Option<String>,
}

impl Film {
    /// Rating is clamped to 0..=10
    pub fn new(name: impl Into<String>, rating: u8) -> Self {
        Self {
            name: name.into(),
            comments: String::new(),
            rating: rating.min(MAX_FILM_RATING),
            image: None,
        }
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = comments.into();
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

fn clamped_rating<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let raw = f64::deserialize(deserializer)?;
    Ok(raw.round().clamp(0.0, MAX_FILM_RATING as f64) as u8)
}

/// Travel journal map marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelMarker {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    /// `YYYY-MM-DD`
    #[serde(default)]
    pub visited_on: Option<String>,
}

impl TravelMarker {
    pub fn new(title: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            latitude,
            longitude,
            visited_on: None,
        }
    }

    pub fn visited(mut self, date: NaiveDate) -> Self {
        self.visited_on = Some(date.format(DATE_FORMAT).to_string());
        self
    }
}

/// One day's water intake, stored at `watertracker/{date}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterDay {
    pub water: u32,
    pub goal: u32,
}

impl WaterDay {
    pub fn empty(goal: u32) -> Self {
        Self { water: 0, goal }
    }

    /// Progress towards the goal in 0.0..=1.0
    pub fn progress(&self) -> f64 {
        if self.goal == 0 {
            return 1.0;
        }
        (self.water as f64 / self.goal as f64).min(1.0)
    }

    pub fn reached_goal(&self) -> bool {
        self.water >= self.goal
    }
}

pub fn water_path(date: NaiveDate) -> String {
    format!("{}/{}", WATER_PATH, date.format(DATE_FORMAT))
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Read-modify-write: add `amount` to the day's total, capped at the goal
///
/// The store only ever sees whole-record overwrites; accumulation happens here.
/// An existing record keeps its own goal; a new one uses `goal`.
pub fn add_water(sync: &CollectionSync, date: NaiveDate, amount: u32, goal: u32) -> Result<WaterDay, StoreError> {
    let path = water_path(date);
    let current = sync.read_document::<WaterDay>(&path)?.unwrap_or(WaterDay::empty(goal));
    let updated = WaterDay {
        water: current.water.saturating_add(amount).min(current.goal),
        goal: current.goal,
    };
    sync.put(&path, &updated)?;
    debug!(path = %path, water = updated.water, goal = updated.goal, "add_water");
    Ok(updated)
}

/// Materialized order reversed, for screens that list newest first
pub fn newest_first<F: Clone>(records: &[Record<F>]) -> Vec<Record<F>> {
    records.iter().rev().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn book(title: &str, author: &str) -> SavedBook {
        SavedBook {
            title: title.to_string(),
            authors: vec![author.to_string()],
            language: "en".to_string(),
            categories: vec![],
            image: None,
        }
    }

    fn date(raw: &str) -> NaiveDate {
        parse_date(raw).unwrap()
    }

    #[test]
    fn test_same_book_ignores_case_and_whitespace() {
        assert!(same_book(&book("Dune", "Frank Herbert"), &book(" dune ", "FRANK HERBERT")));
        assert!(!same_book(&book("Dune", "Frank Herbert"), &book("Dune", "Someone Else")));
        let mut anonymous = book("Dune", "x");
        anonymous.authors.clear();
        assert!(!same_book(&anonymous, &book("Dune", "Frank Herbert")));
    }

    #[test]
    fn test_find_saved_matches_by_fields_not_id() {
        let sync = CollectionSync::new(Arc::new(MemoryStore::new()));
        let mut saved: LiveCollection<SavedBook> = sync.subscribe(BOOKS_PATH).unwrap();
        let id = saved.append(&book("Dune", "Frank Herbert")).unwrap();
        saved.poll();

        let hit = find_saved(&saved, &book("DUNE", "frank herbert")).unwrap();
        assert_eq!(hit.id, id);
        assert!(find_saved(&saved, &book("Emma", "Jane Austen")).is_none());
    }

    #[test]
    fn test_saved_book_tolerates_missing_fields() {
        let book: SavedBook = serde_json::from_str(r#"{"title":"Untitled"}"#).unwrap();
        assert!(book.authors.is_empty());
        assert_eq!(book.image, None);
    }

    #[test]
    fn test_water_path_format() {
        assert_eq!(water_path(date("2024-01-01")), "watertracker/2024-01-01");
        assert!(parse_date("01/01/2024").is_err());
    }

    #[test]
    fn test_add_water_accumulates_and_caps() {
        let sync = CollectionSync::new(Arc::new(MemoryStore::new()));
        let day = date("2024-01-01");

        assert_eq!(add_water(&sync, day, 250, DEFAULT_WATER_GOAL).unwrap().water, 250);
        assert_eq!(add_water(&sync, day, 500, DEFAULT_WATER_GOAL).unwrap().water, 750);
        let full = add_water(&sync, day, 5000, DEFAULT_WATER_GOAL).unwrap();
        assert_eq!(full, WaterDay { water: 2000, goal: 2000 });
        assert!(full.reached_goal());

        // Other days are independent
        let next = add_water(&sync, date("2024-01-02"), 250, 1500).unwrap();
        assert_eq!(next, WaterDay { water: 250, goal: 1500 });
    }

    #[test]
    fn test_water_progress() {
        assert_eq!(WaterDay { water: 500, goal: 2000 }.progress(), 0.25);
        assert_eq!(WaterDay { water: 3000, goal: 2000 }.progress(), 1.0);
        assert_eq!(WaterDay::empty(0).progress(), 1.0);
    }

    #[test]
    fn test_film_rating_clamped() {
        let film = Film::new("Heat", 42).with_comments("great").with_image("https://img/heat.jpg");
        assert_eq!(film.rating, MAX_FILM_RATING);
        assert_eq!(film.comments, "great");
        assert!(film.image.is_some());
    }

    #[test]
    fn test_stored_film_rating_clamped_on_decode() {
        let rating = |raw: &str| serde_json::from_str::<Film>(&format!(r#"{{"name":"Heat","rating":{}}}"#, raw)).unwrap().rating;
        assert_eq!(rating("42"), MAX_FILM_RATING);
        assert_eq!(rating("-3"), 0);
        assert_eq!(rating("7.6"), 8);
        assert_eq!(rating("6"), 6);
        assert!(serde_json::from_str::<Film>(r#"{"name":"Heat","rating":"ten"}"#).is_err());
    }

    #[test]
    fn test_todo_known_categories() {
        assert!(TodoItem::new("Milk", "groceries").has_known_category());
        assert!(!TodoItem::new("Milk", "Shopping").has_known_category());
    }

    #[test]
    fn test_newest_first_reverses() {
        let records = vec![Record::new("a", 1), Record::new("b", 2), Record::new("c", 3)];
        let ids: Vec<String> = newest_first(&records).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_travel_marker_date() {
        let marker = TravelMarker::new("Lisbon", 38.72, -9.14).visited(date("2023-05-04"));
        assert_eq!(marker.visited_on.as_deref(), Some("2023-05-04"));
    }
}
