//! Document State Store
//!
//! Tracks documents open with the server and the diagnostics it has pushed.
//! Keys are the raw uri strings given by the caller; nothing is normalized.
//! Reads are synchronous so diagnostics lookups never wait on the server.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::protocol::{LspDiagnostic, TextDocumentItem};

/// Initial version sent with didOpen
pub const INITIAL_VERSION: i32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentState {
    pub uri: String,
    pub language_id: String,
    pub version: i32,
    /// Content as sent with didOpen
    pub content: String,
}

impl DocumentState {
    fn new(uri: &str, content: &str, language_id: &str) -> Self {
        Self {
            uri: uri.to_string(),
            language_id: language_id.to_string(),
            version: INITIAL_VERSION,
            content: content.to_string(),
        }
    }

    pub fn to_item(&self) -> TextDocumentItem {
        TextDocumentItem {
            uri: self.uri.clone(),
            language_id: self.language_id.clone(),
            version: self.version,
            text: self.content.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct DocumentStore {
    docs: RwLock<HashMap<String, DocumentState>>,
    diagnostics: RwLock<HashMap<String, Vec<LspDiagnostic>>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `uri`. Returns the new state when the caller must send
    /// didOpen, `None` when the document is already open.
    pub fn track(&self, uri: &str, content: &str, language_id: &str) -> Option<DocumentState> {
        let mut docs = self.docs_mut();
        if docs.contains_key(uri) {
            return None;
        }
        let state = DocumentState::new(uri, content, language_id);
        docs.insert(uri.to_string(), state.clone());
        Some(state)
    }

    /// Stop tracking `uri` and drop its diagnostics. Returns whether it was open.
    pub fn untrack(&self, uri: &str) -> bool {
        let removed = self.docs_mut().remove(uri).is_some();
        self.diagnostics_mut().remove(uri);
        removed
    }

    pub fn is_open(&self, uri: &str) -> bool {
        self.docs().contains_key(uri)
    }

    pub fn document(&self, uri: &str) -> Option<DocumentState> {
        self.docs().get(uri).cloned()
    }

    pub fn open_uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self.docs().keys().cloned().collect();
        uris.sort();
        uris
    }

    pub fn open_count(&self) -> usize {
        self.docs().len()
    }

    /// Replace the cached diagnostics for `uri` (last write wins)
    pub fn publish(&self, uri: &str, diagnostics: Vec<LspDiagnostic>) {
        self.diagnostics_mut().insert(uri.to_string(), diagnostics);
    }

    /// Diagnostics for an open document, `None` when it is not open
    pub fn diagnostics_for(&self, uri: &str) -> Option<Vec<LspDiagnostic>> {
        if !self.is_open(uri) {
            return None;
        }
        Some(self.diagnostics().get(uri).cloned().unwrap_or_default())
    }

    /// Cached diagnostics restricted to open documents
    pub fn all_diagnostics(&self) -> HashMap<String, Vec<LspDiagnostic>> {
        let docs = self.docs();
        self.diagnostics()
            .iter()
            .filter(|(uri, _)| docs.contains_key(*uri))
            .map(|(uri, diags)| (uri.clone(), diags.clone()))
            .collect()
    }

    /// Forget every document and every diagnostic
    pub fn clear(&self) {
        self.docs_mut().clear();
        self.diagnostics_mut().clear();
    }

    fn docs(&self) -> RwLockReadGuard<'_, HashMap<String, DocumentState>> {
        self.docs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn docs_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, DocumentState>> {
        self.docs.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn diagnostics(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<LspDiagnostic>>> {
        self.diagnostics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn diagnostics_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<LspDiagnostic>>> {
        self.diagnostics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
