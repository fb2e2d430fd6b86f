use serde::{Deserialize, Serialize};
use spindle_core::tags::{self, Tag};

/// Fields a journal line may carry, keyed by [`Tag::key`].
pub const JOURNAL_TAGS: &[Tag] = &tags::ALL;

/// One line of the status journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp_us: u64,
    pub field: String,
    pub value: serde_json::Value,
}

impl JournalEntry {
    pub fn new(timestamp_us: u64, tag: Tag, value: impl Into<serde_json::Value>) -> Self {
        Self {
            timestamp_us,
            field: tag.key.to_string(),
            value: value.into(),
        }
    }

    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// The tag this entry belongs to, if the field is a known one.
    pub fn tag(&self) -> Option<Tag> {
        JOURNAL_TAGS.iter().copied().find(|tag| tag.key == self.field)
    }
}
