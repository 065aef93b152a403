use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::Date;

use super::{DocumentRef, JournalLine, JournalStatus};

/// A journal entry as submitted, before cleaning, validation and numbering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJournalEntry {
    pub date: Date,
    #[serde(default)]
    pub reference: Option<Arc<str>>,
    #[serde(default)]
    pub description: Option<Arc<str>>,
    #[serde(default)]
    pub status: Option<JournalStatus>,
    pub lines: Vec<JournalLine>,
    #[serde(default)]
    pub related_document: Option<DocumentRef>,
}

impl NewJournalEntry {
    pub fn new(date: Date, description: &str, lines: Vec<JournalLine>) -> Self {
        Self {
            date,
            reference: None,
            description: Some(Arc::from(description)),
            status: None,
            lines,
            related_document: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<Arc<str>>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_status(mut self, status: JournalStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn for_document(mut self, document: DocumentRef) -> Self {
        self.related_document = Some(document);
        self
    }
}
