// src/models/group.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use validator::Validate;

use crate::models::exercise::ExerciseSummary;

/// One sense of a word, flattened from a dictionary lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    #[serde(rename = "type")]
    pub part_of_speech: String,
    pub definition: String,
    #[serde(default)]
    pub example: String,
    #[serde(default)]
    pub synonyms: Option<Vec<String>>,
    /// Whether the editor chose to show this sense.
    #[serde(default)]
    pub selected: bool,
}

/// All senses found for a word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definitions {
    pub word: String,
    #[serde(default)]
    pub phonetics: serde_json::Value,
    pub definitions: Vec<Definition>,
}

/// Entry in a group's word list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordEntry {
    #[serde(default)]
    pub custom_definition: String,
    #[serde(default)]
    pub dictionary_url: Option<String>,
    #[serde(default)]
    pub api_definitions: Option<Vec<Definitions>>,
}

/// Word -> entry. Kept sorted so word lists render alphabetically.
pub type WordList = BTreeMap<String, WordEntry>;

/// A numbered bundle of words and exercises inside a subcategory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub subcategory_id: String,
    pub number: i32,
    pub free: bool,
    #[serde(default)]
    pub words: WordList,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SaveGroupRequest {
    #[validate(range(min = 1, max = 10000))]
    pub number: i32,
    #[serde(default)]
    pub free: bool,
}

/// DTO for adding, updating or renaming a word.
#[derive(Debug, Deserialize, Validate)]
pub struct SaveWordRequest {
    /// The word being edited, if any. Absent when adding a new word.
    pub original: Option<String>,
    #[validate(length(min = 1, max = 100, message = "Please enter a word."))]
    pub word: String,
    #[validate(length(max = 20000))]
    #[serde(default)]
    pub custom_definition: String,
    #[validate(length(max = 500), custom(function = validate_url_string))]
    pub dictionary_url: Option<String>,
    pub api_definitions: Option<Vec<Definitions>>,
}

fn validate_url_string(url: &str) -> Result<(), validator::ValidationError> {
    if Url::parse(url).is_err() {
        return Err(validator::ValidationError::new("invalid_url"));
    }
    Ok(())
}

/// Rejected word list edits.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WordEditError {
    #[error("Please enter a word.")]
    Blank,

    #[error("That word already exists in this list.")]
    AlreadyExists,

    #[error("Word not found: {0}")]
    Missing(String),
}

/// Applies an add / update / rename to a word list.
///
/// Returns the message shown to the editor on success.
pub fn apply_word_edit(
    words: &mut WordList,
    original: Option<&str>,
    word: &str,
    entry: WordEntry,
) -> Result<String, WordEditError> {
    let new_word = word.trim();
    if new_word.is_empty() {
        return Err(WordEditError::Blank);
    }
    let original = original.map(str::trim).filter(|w| !w.is_empty());

    if original == Some(new_word) {
        words.insert(new_word.to_string(), entry);
        return Ok(format!("Updated word: {new_word}"));
    }
    if words.contains_key(new_word) {
        return Err(WordEditError::AlreadyExists);
    }

    let message = match original {
        Some(old) => {
            if words.remove(old).is_none() {
                return Err(WordEditError::Missing(old.to_string()));
            }
            format!("{old} removed, {new_word} added")
        }
        None => format!("Added new word: {new_word}"),
    };
    words.insert(new_word.to_string(), entry);
    Ok(message)
}

/// Row in a subcategory's group list.
#[derive(Debug, Serialize)]
pub struct GroupSummary {
    pub id: String,
    pub number: i32,
    pub free: bool,
    pub word_count: usize,
    /// Whether the caller would be refused the group page.
    pub locked: bool,
}

/// Group page body.
#[derive(Debug, Serialize)]
pub struct GroupView {
    pub id: String,
    pub number: i32,
    pub free: bool,
    pub subcategory: String,
    /// Alphabetical.
    pub word_list: Vec<String>,
    pub words: WordList,
    pub exercises: Vec<ExerciseSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(words: &[&str]) -> WordList {
        words
            .iter()
            .map(|w| (w.to_string(), WordEntry::default()))
            .collect()
    }

    #[test]
    fn test_add_new_word() {
        let mut words = list(&["apple"]);
        let msg = apply_word_edit(&mut words, None, "  water ", WordEntry::default()).unwrap();
        assert_eq!(msg, "Added new word: water");
        assert!(words.contains_key("water"));
    }

    #[test]
    fn test_update_existing_word() {
        let mut words = list(&["apple"]);
        let entry = WordEntry {
            custom_definition: "<p>fruit</p>".to_string(),
            ..WordEntry::default()
        };
        let msg = apply_word_edit(&mut words, Some("apple"), "apple", entry).unwrap();
        assert_eq!(msg, "Updated word: apple");
        assert_eq!(words["apple"].custom_definition, "<p>fruit</p>");
    }

    #[test]
    fn test_rename_word() {
        let mut words = list(&["aple"]);
        let msg = apply_word_edit(&mut words, Some("aple"), "apple", WordEntry::default()).unwrap();
        assert_eq!(msg, "aple removed, apple added");
        assert_eq!(words.keys().collect::<Vec<_>>(), vec!["apple"]);
    }

    #[test]
    fn test_duplicate_word_rejected() {
        let mut words = list(&["apple", "water"]);
        assert_eq!(
            apply_word_edit(&mut words, Some("water"), "apple", WordEntry::default()),
            Err(WordEditError::AlreadyExists)
        );
        assert_eq!(words.len(), 2);
    }

    #[test]
    fn test_edit_errors_carry_editor_messages() {
        let mut words = list(&["apple"]);
        let err = apply_word_edit(&mut words, Some("pear"), "plum", WordEntry::default()).unwrap_err();
        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert_eq!(boxed.to_string(), "Word not found: pear");
        assert_eq!(WordEditError::Blank.to_string(), "Please enter a word.");
    }
}
