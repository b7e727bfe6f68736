//! Catalog and user data model.
//!
//! Every user-facing text field is a [`LocalizedString`] carrying an English
//! and a Bengali variant. Timestamps are epoch milliseconds.

use serde::{Deserialize, Serialize};

/// Separator between the two variants of a stored localized column.
pub const LOCALIZED_DELIMITER: &str = "|~|";

/// Current time as epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============================================================================
// Localized String
// ============================================================================

/// A text value in both supported languages.
///
/// Neither variant is ever empty when the other has content: a missing
/// variant falls back to the present one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedString {
    pub en: String,
    pub bn: String,
}

impl LocalizedString {
    /// Build a localized value, filling a blank variant from the other one.
    pub fn new(en: impl Into<String>, bn: impl Into<String>) -> Self {
        let en = en.into();
        let bn = bn.into();
        match (en.trim().is_empty(), bn.trim().is_empty()) {
            (true, false) => Self { en: bn.clone(), bn },
            (false, true) => Self { bn: en.clone(), en },
            _ => Self { en, bn },
        }
    }

    /// The same text for both languages.
    pub fn uniform(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            en: text.clone(),
            bn: text,
        }
    }

    /// Encode into the single-column storage form `en|~|bn`.
    pub fn encode(&self) -> String {
        format!("{}{LOCALIZED_DELIMITER}{}", self.en, self.bn)
    }

    /// Decode a stored column.
    ///
    /// Anything that does not split into exactly two segments is treated as a
    /// legacy single-language value and used for both variants.
    pub fn decode(raw: &str) -> Self {
        let parts: Vec<&str> = raw.split(LOCALIZED_DELIMITER).collect();
        match parts.as_slice() {
            [en, bn] => Self::new(*en, *bn),
            _ => Self::uniform(raw),
        }
    }

    /// Case-insensitive substring match against either variant.
    ///
    /// `needle` must already be lowercased.
    pub fn contains_lowercase(&self, needle: &str) -> bool {
        self.en.to_lowercase().contains(needle) || self.bn.to_lowercase().contains(needle)
    }
}

// ============================================================================
// Catalog Records
// ============================================================================

/// A directory entry for one government/citizen service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub id: String,
    pub title: LocalizedString,
    pub subtitle: LocalizedString,
    pub icon: String,
    pub category: String,
    /// Catalog version the service first appeared in.
    pub version_added: i64,
    pub last_updated: i64,
    pub images: Vec<String>,
    pub image_names: Vec<String>,
    pub search_keywords: Vec<String>,
}

/// Step-by-step guidance for a service, 1:1 with its [`ServiceSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDetail {
    pub service_id: String,
    pub instructions: LocalizedString,
    pub required_documents: LocalizedString,
    pub processing_time: LocalizedString,
    pub contact_info: LocalizedString,
    pub youtube_link: Option<String>,
    pub last_updated: i64,
    pub images: Vec<String>,
    pub image_names: Vec<String>,
}

// ============================================================================
// User Records
// ============================================================================

/// A bookmarked service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Favorite {
    pub id: i64,
    pub service_id: String,
    pub added_at: i64,
}

/// One view of a service detail screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub service_id: String,
    pub accessed_at: i64,
}
