//! Word-list model: free-form text as the underlying value, its whitespace-separated
//! words as the derived value.
//!
//! This is the editor-shaped use of the cache in miniature: the text is edited
//! under the write scope, the word list is displayed from the stale slot while the
//! text is temporarily unparsable (empty), and an edited word list can be written
//! back into the text.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::config::TwoWayConfig;
use crate::derivation::{Derivation, Derived};
use crate::error::{DeriveError, Result};
use crate::support::TwoWaySupport;

/// Replacement of the byte range `start..end` of the text.
///
/// Offsets past the end are clamped to the text length and offsets inside a
/// multi-byte character are moved back to its start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
	pub start: usize,
	pub end: usize,
	pub replacement: String,
}

impl TextEdit {
	pub fn new(start: usize, end: usize, replacement: impl Into<String>) -> Self {
		Self {
			start,
			end,
			replacement: replacement.into(),
		}
	}

	pub fn insert(at: usize, text: impl Into<String>) -> Self {
		Self::new(at, at, text)
	}

	pub fn delete(start: usize, end: usize) -> Self {
		Self::new(start, end, String::new())
	}

	/// Replaces everything in a text of `len` bytes.
	pub fn replace_all(len: usize, text: impl Into<String>) -> Self {
		Self::new(0, len, text)
	}

	/// Applies the edit and returns the clamped range that was replaced.
	pub fn apply_to(&self, text: &mut String) -> (usize, usize) {
		let start = floor_char_boundary(text, self.start.min(text.len()));
		let end = floor_char_boundary(text, self.end.min(text.len())).max(start);
		text.replace_range(start..end, &self.replacement);
		(start, end)
	}
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
	while !text.is_char_boundary(idx) {
		idx -= 1;
	}
	idx
}

/// Ordered edits accumulated since the last derivation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditLog(Vec<TextEdit>);

impl EditLog {
	pub fn single(edit: TextEdit) -> Self {
		Self(vec![edit])
	}

	pub fn edits(&self) -> &[TextEdit] {
		&self.0
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Appends the edits of `newer` after those of `self`.
	pub fn then(mut self, newer: EditLog) -> Self {
		self.0.extend(newer.0);
		self
	}
}

/// How one word list turned into the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordsDelta {
	/// Number of leading words both lists share.
	pub common_prefix: usize,
	/// Words of the old list replaced after the common prefix.
	pub removed: Vec<String>,
	/// Words of the new list inserted in their place.
	pub inserted: Vec<String>,
}

impl WordsDelta {
	pub fn between(old: &[String], new: &[String]) -> Self {
		let common_prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
		let max_suffix = old.len().min(new.len()) - common_prefix;
		let common_suffix = old.iter().rev().zip(new.iter().rev()).take(max_suffix).take_while(|(a, b)| a == b).count();
		Self {
			common_prefix,
			removed: old[common_prefix..old.len() - common_suffix].to_vec(),
			inserted: new[common_prefix..new.len() - common_suffix].to_vec(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.removed.is_empty() && self.inserted.is_empty()
	}
}

/// The text holds no words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("empty string")]
pub struct EmptyText;

/// An edited word list that cannot be written back as text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WordsError {
	#[error("cannot recreate text from an empty word list")]
	NoWords,
	#[error("word {index} is empty")]
	EmptyWord { index: usize },
	#[error("word {index} ({word:?}) contains whitespace")]
	Whitespace { index: usize, word: String },
}

/// Underlying text shared by a [`WordDerivation`] and whoever edits it.
#[derive(Debug, Default)]
pub struct WordSource {
	text: RwLock<String>,
}

impl WordSource {
	pub fn new(text: impl Into<String>) -> Self {
		Self {
			text: RwLock::new(text.into()),
		}
	}

	pub fn text(&self) -> String {
		self.text.read().clone()
	}

	pub fn len(&self) -> usize {
		self.text.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.text.read().is_empty()
	}

	/// Edits the text without touching any cache; [`WordDocument::edit`] pairs this with
	/// the write scope and the invalidation.
	pub(crate) fn apply(&self, edit: &TextEdit) {
		edit.apply_to(&mut self.text.write());
	}
}

/// Splits text into whitespace-separated words.
pub fn split_words(text: &str) -> Vec<String> {
	text.split_whitespace().map(str::to_owned).collect()
}

/// Derives the word list of a [`WordSource`].
#[derive(Debug, Clone)]
pub struct WordDerivation {
	source: Arc<WordSource>,
}

impl WordDerivation {
	pub fn new(source: Arc<WordSource>) -> Self {
		Self { source }
	}

	pub fn source(&self) -> &Arc<WordSource> {
		&self.source
	}
}

impl Derivation for WordDerivation {
	type Value = Vec<String>;
	type UnderlyingDelta = EditLog;
	type DerivedDelta = WordsDelta;

	/// Splitting is linear in the text, so both paths re-split the current text;
	/// the old list only feeds the reported [`WordsDelta`].
	fn derive(&self, old: Option<&Vec<String>>, delta: Option<&EditLog>) -> std::result::Result<Derived<Vec<String>, WordsDelta>, DeriveError> {
		let words = split_words(&self.source.text.read());
		if words.is_empty() {
			return Err(EmptyText.into());
		}
		tracing::trace!(words = words.len(), edits = delta.map_or(0, EditLog::len), "twoway.words.split");
		match old {
			Some(old) => {
				let delta = WordsDelta::between(old, &words);
				Ok(Derived::with_delta(words, delta))
			}
			None => Ok(Derived::new(words)),
		}
	}

	fn compose(&self, older: EditLog, newer: EditLog) -> EditLog {
		older.then(newer)
	}

	fn recreate(&self, _old: &Vec<String>, edited: &Vec<String>) -> std::result::Result<EditLog, DeriveError> {
		if edited.is_empty() {
			return Err(WordsError::NoWords.into());
		}
		for (index, word) in edited.iter().enumerate() {
			if word.is_empty() {
				return Err(WordsError::EmptyWord { index }.into());
			}
			if word.chars().any(char::is_whitespace) {
				return Err(WordsError::Whitespace { index, word: word.clone() }.into());
			}
		}
		Ok(EditLog::single(TextEdit::replace_all(self.source.len(), edited.join(" "))))
	}

	fn apply(&self, delta: &EditLog) -> std::result::Result<(), DeriveError> {
		let mut text = self.source.text.write();
		for edit in delta.edits() {
			edit.apply_to(&mut text);
		}
		Ok(())
	}
}

/// A text document with a cached word list.
///
/// Edits go through [`set_text`](Self::set_text) / [`edit`](Self::edit), which change
/// the text and invalidate the cache inside one write scope.
pub struct WordDocument {
	source: Arc<WordSource>,
	support: Arc<TwoWaySupport<WordDerivation>>,
}

impl WordDocument {
	pub fn new(text: impl Into<String>) -> Self {
		Self::with_config(text, &TwoWayConfig::default().with_name("words"))
	}

	pub fn with_config(text: impl Into<String>, config: &TwoWayConfig) -> Self {
		let source = Arc::new(WordSource::new(text));
		let support = TwoWaySupport::with_config(WordDerivation::new(Arc::clone(&source)), config.lock_coordinator(), config);
		Self {
			source,
			support: Arc::new(support),
		}
	}

	pub fn text(&self) -> String {
		self.source.text()
	}

	pub fn support(&self) -> &Arc<TwoWaySupport<WordDerivation>> {
		&self.support
	}

	/// Replaces the whole text.
	pub fn set_text(&self, text: impl Into<String>) -> Result<()> {
		let _write = self.support.lock().write_scope()?;
		let edit = TextEdit::replace_all(self.source.len(), text);
		self.edit(edit)
	}

	pub fn edit(&self, edit: TextEdit) -> Result<()> {
		let _write = self.support.lock().write_scope()?;
		self.source.apply(&edit);
		self.support.invalidate(EditLog::single(edit))
	}

	/// Fresh word list, deriving it when needed.
	pub fn words(&self) -> Result<Arc<Vec<String>>> {
		self.support.value_blocking()
	}
}
