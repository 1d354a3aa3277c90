//! Pages and the plugin-fed page queue

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::element::ElementId;

/// One crawled page: its URL plus the auditable elements found on it.
///
/// The crawler and plugins produce these; the coordination layer only cares
/// about the URL and the element ids, never the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub url: String,
    #[serde(default)]
    pub element_ids: Vec<ElementId>,
}

impl Page {
    pub fn new(url: impl Into<String>, element_ids: Vec<ElementId>) -> Self {
        Self {
            url: url.into(),
            element_ids,
        }
    }
}

/// FIFO of pages pushed by plugins during the scan, drained once during
/// workload distribution.
#[derive(Debug, Default)]
pub struct PageQueue {
    pages: VecDeque<Page>,
}

impl PageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, page: Page) {
        self.pages.push_back(page);
    }

    pub fn extend<I>(&mut self, pages: I)
    where
        I: IntoIterator<Item = Page>,
    {
        self.pages.extend(pages);
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Remove and return everything, preserving insertion order.
    pub fn drain(&mut self) -> Vec<Page> {
        self.pages.drain(..).collect()
    }
}
