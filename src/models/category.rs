// src/models/category.rs

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Top level category, e.g. "General Vocabulary".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,

    /// Name of the product whose subscription unlocks this category's
    /// non-free groups.
    pub product: Option<String>,
}

/// Second level category, e.g. "Sublist 3".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subcategory {
    pub id: String,
    pub parent: String,
    pub name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SaveCategoryRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 200))]
    pub product: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SaveSubcategoryRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
}

static FIRST_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));

fn first_number(name: &str) -> Option<u64> {
    FIRST_NUMBER.find(name).and_then(|m| m.as_str().parse().ok())
}

/// Ordering for subcategory lists: regular sublists first, "More ..." lists
/// after them, each by the number in their name.
pub fn compare_subcategories(a: &Subcategory, b: &Subcategory) -> Ordering {
    let more = |s: &Subcategory| s.name.contains("More");
    more(a)
        .cmp(&more(b))
        .then_with(|| first_number(&a.name).cmp(&first_number(&b.name)))
        .then_with(|| a.name.cmp(&b.name))
}

pub fn sort_subcategories(subcategories: &mut [Subcategory]) {
    subcategories.sort_by(compare_subcategories);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(name: &str) -> Subcategory {
        Subcategory {
            id: name.to_lowercase(),
            parent: "awl".to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_sort_subcategories() {
        let mut list = vec![
            sub("More Academic Vocabulary 2"),
            sub("Sublist 10"),
            sub("Sublist 2"),
            sub("More Academic Vocabulary 1"),
            sub("Sublist 1"),
        ];
        sort_subcategories(&mut list);
        let names: Vec<&str> = list.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Sublist 1",
                "Sublist 2",
                "Sublist 10",
                "More Academic Vocabulary 1",
                "More Academic Vocabulary 2",
            ]
        );
    }
}
