// src/services/dictionary.rs

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::models::group::{Definition, Definitions};

#[derive(Debug, Error)]
pub enum DictionaryError {
    #[error("Please enter a word first")]
    EmptyWord,

    #[error("No definitions found for '{0}'")]
    NotFound(String),

    #[error("dictionary lookup failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("dictionary returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("invalid dictionary url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Deserialize)]
pub struct Meaning {
    pub definition: String,
    #[serde(default)]
    pub example: Option<String>,
    #[serde(default)]
    pub synonyms: Option<Vec<String>>,
}

/// Entry shape of the v1 free dictionary API.
#[derive(Debug, Deserialize)]
pub struct ApiWord {
    pub word: String,
    #[serde(default)]
    pub phonetics: serde_json::Value,
    #[serde(default)]
    pub meaning: BTreeMap<String, Vec<Meaning>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LookupBody {
    Entries(Vec<ApiWord>),
    Message { title: String },
}

/// Flattens API entries into one definition list per entry, every sense
/// unselected.
pub fn format_dictionary_results(data: Vec<ApiWord>) -> Vec<Definitions> {
    data.into_iter()
        .map(|entry| Definitions {
            word: entry.word,
            phonetics: entry.phonetics,
            definitions: entry
                .meaning
                .into_iter()
                .flat_map(|(part_of_speech, meanings)| {
                    meanings.into_iter().map(move |m| Definition {
                        part_of_speech: part_of_speech.clone(),
                        definition: m.definition,
                        example: m.example.unwrap_or_default(),
                        synonyms: m.synonyms,
                        selected: false,
                    })
                })
                .collect(),
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct DictionaryClient {
    http: reqwest::Client,
    base: Url,
}

impl DictionaryClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Result<Self, DictionaryError> {
        let mut base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase.into());
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { http, base })
    }

    /// The word always lands as one escaped path segment under the base.
    fn entry_url(&self, word: &str) -> Result<Url, DictionaryError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .push(word);
        Ok(url)
    }

    pub async fn lookup(&self, word: &str) -> Result<Vec<Definitions>, DictionaryError> {
        let word = word.trim();
        if word.is_empty() {
            return Err(DictionaryError::EmptyWord);
        }

        let url = self.entry_url(word)?;
        tracing::debug!("dictionary lookup: {}", url);
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            return Err(DictionaryError::Status(status));
        }

        match response.json::<LookupBody>().await? {
            LookupBody::Entries(entries) if !entries.is_empty() => Ok(format_dictionary_results(entries)),
            LookupBody::Entries(_) => Err(DictionaryError::NotFound(word.to_string())),
            LookupBody::Message { title } => {
                tracing::debug!("dictionary has no entry for '{}': {}", word, title);
                Err(DictionaryError::NotFound(word.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_flattens_every_sense() {
        let raw = json!([{
            "word": "lucid",
            "phonetics": [{ "text": "/ˈluːsɪd/" }],
            "meaning": {
                "adjective": [
                    { "definition": "Expressed clearly.", "example": "a lucid account", "synonyms": ["clear"] },
                    { "definition": "Bright or luminous." }
                ]
            }
        }]);
        let entries: Vec<ApiWord> = serde_json::from_value(raw).unwrap();

        let formatted = format_dictionary_results(entries);
        assert_eq!(formatted.len(), 1);
        assert_eq!(formatted[0].word, "lucid");

        let senses = &formatted[0].definitions;
        assert_eq!(senses.len(), 2);
        assert_eq!(senses[0].part_of_speech, "adjective");
        assert_eq!(senses[0].synonyms.as_deref(), Some(&["clear".to_string()][..]));
        assert_eq!(senses[1].example, "");
        assert_eq!(senses[1].synonyms, None);
        assert!(senses.iter().all(|d| !d.selected));
    }

    #[test]
    fn test_not_found_body_parses() {
        let body: LookupBody = serde_json::from_value(json!({
            "title": "No Definitions Found",
            "message": "Sorry pal"
        }))
        .unwrap();
        assert!(matches!(body, LookupBody::Message { title } if title == "No Definitions Found"));
    }

    #[tokio::test]
    async fn test_blank_word_rejected_without_request() {
        let client = DictionaryClient::new(reqwest::Client::new(), "http://127.0.0.1:9/entries/en").unwrap();
        assert!(matches!(client.lookup("  ").await, Err(DictionaryError::EmptyWord)));
    }

    #[test]
    fn test_word_stays_inside_base_path() {
        let client = DictionaryClient::new(reqwest::Client::new(), "https://dict.example.com/api/v1/entries/en/").unwrap();

        assert_eq!(
            client.entry_url("lucid").unwrap().as_str(),
            "https://dict.example.com/api/v1/entries/en/lucid"
        );
        assert_eq!(
            client.entry_url("../x").unwrap().as_str(),
            "https://dict.example.com/api/v1/entries/en/..%2Fx"
        );
        let absolute = client.entry_url("http://evil.example.com/a").unwrap();
        assert_eq!(absolute.host_str(), Some("dict.example.com"));
        assert!(absolute.path().starts_with("/api/v1/entries/en/"));
    }
}
