//! Local clinical knowledge base: passage loading and keyword retrieval.

use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use tantivy::collector::TopDocs;
use tantivy::doc;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy};
use tracing::{debug, warn};
use walkdir::WalkDir;

const WRITER_HEAP_BYTES: usize = 20_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: String,
    pub source: String,
    pub text: String,
}

impl Passage {
    pub fn new(source: &str, text: String) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(source.as_bytes());
        hasher.update(b"\n");
        hasher.update(text.as_bytes());
        Self {
            id: hasher.finalize().to_hex().to_string(),
            source: source.to_string(),
            text,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f64,
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat)?);
    }
    Ok(builder.build()?)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn split_long(paragraph: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut current = String::new();
    for word in paragraph.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > max_chars {
            out.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        out.push(current);
    }
}

/// Splits on blank lines and packs paragraphs into passages of at most
/// `max_chars` characters. A single word longer than the limit stays whole.
pub fn split_passages(text: &str, max_chars: usize) -> Vec<String> {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line.trim());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }

    let mut passages = Vec::new();
    let mut packed = String::new();
    for para in paragraphs {
        let len = para.chars().count();
        if len > max_chars {
            if !packed.is_empty() {
                passages.push(std::mem::take(&mut packed));
            }
            split_long(&para, max_chars, &mut passages);
            continue;
        }
        if !packed.is_empty() && packed.chars().count() + 2 + len > max_chars {
            passages.push(std::mem::take(&mut packed));
        }
        if !packed.is_empty() {
            packed.push_str("\n\n");
        }
        packed.push_str(&para);
    }
    if !packed.is_empty() {
        passages.push(packed);
    }
    passages
}

/// Lowercased alphanumeric terms. Queries are reduced to these before they
/// reach the query parser so user text never hits its operator syntax.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
        .collect()
}

/// In-memory full-text index over the passage texts.
struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    id_field: Field,
    text_field: Field,
}

impl KeywordIndex {
    fn build(passages: &[Passage]) -> anyhow::Result<Self> {
        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let source_field = schema_builder.add_text_field("source", STORED);
        let text_field = schema_builder.add_text_field("text", TEXT);
        let index = Index::create_in_ram(schema_builder.build());

        let mut writer: IndexWriter = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        for p in passages {
            writer.add_document(doc!(
                id_field => p.id.as_str(),
                source_field => p.source.as_str(),
                text_field => p.text.as_str()
            ))?;
        }
        writer.commit()?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            index,
            reader,
            id_field,
            text_field,
        })
    }

    /// (passage id, score) for every document matching any query term.
    fn search(&self, terms: &[String], limit: usize) -> anyhow::Result<Vec<(String, f64)>> {
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let query = parser.parse_query(&terms.join(" "))?;
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;
        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let doc = searcher.doc(addr)?;
            if let Some(id) = doc.get_first(self.id_field).and_then(|v| v.as_text()) {
                hits.push((id.to_string(), f64::from(score)));
            }
        }
        Ok(hits)
    }
}

pub struct KnowledgeBase {
    passages: Vec<Passage>,
    index: KeywordIndex,
}

impl fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("passages", &self.passages.len())
            .finish()
    }
}

impl KnowledgeBase {
    pub fn from_passages(passages: Vec<Passage>) -> anyhow::Result<Self> {
        let index = KeywordIndex::build(&passages).context("build keyword index")?;
        Ok(Self { passages, index })
    }

    /// Walks `dir` for files matching `include` (relative to `dir`). Hidden
    /// entries are skipped and unreadable files are logged. A missing
    /// directory yields an empty base.
    pub fn load(dir: &Path, include: &[String], chunk_chars: usize) -> anyhow::Result<Self> {
        if !dir.exists() {
            warn!(dir = %dir.display(), "knowledge directory not found");
            return Self::from_passages(Vec::new());
        }
        let includes = build_globset(include)?;
        let mut files: Vec<_> = WalkDir::new(dir)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.strip_prefix(dir)
                    .map(|rel| includes.is_match(rel))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();

        let mut passages = Vec::new();
        for path in files {
            let text = match fs::read_to_string(&path) {
                Ok(t) => t,
                Err(e) => {
                    warn!(path = %path.display(), "skipping unreadable knowledge file: {e}");
                    continue;
                }
            };
            let source = path
                .strip_prefix(dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            for chunk in split_passages(&text, chunk_chars) {
                passages.push(Passage::new(&source, chunk));
            }
        }
        let kb = Self::from_passages(passages)?;
        debug!(passages = kb.len(), "knowledge base loaded");
        Ok(kb)
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// BM25 ranking from the keyword index. Only passages with a positive
    /// score are returned, ties broken by id. Index errors are logged and
    /// yield no hits.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<ScoredPassage> {
        let terms = tokenize(query);
        if self.passages.is_empty() || top_k == 0 || terms.is_empty() {
            return Vec::new();
        }
        // Every match is collected so equal scores can be ordered by id.
        let hits = match self.index.search(&terms, self.passages.len()) {
            Ok(hits) => hits,
            Err(e) => {
                warn!("keyword search failed: {e}");
                return Vec::new();
            }
        };
        let by_id: HashMap<&str, &Passage> =
            self.passages.iter().map(|p| (p.id.as_str(), p)).collect();
        let mut scored: Vec<ScoredPassage> = hits
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .filter_map(|(id, score)| {
                by_id.get(id.as_str()).map(|p| ScoredPassage {
                    passage: (*p).clone(),
                    score,
                })
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.passage.id.cmp(&b.passage.id))
        });
        scored.truncate(top_k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passages_pack_paragraphs_up_to_limit() {
        let text = "First para\nline two.\n\nSecond.\n\n\nThird paragraph here.";
        let parts = split_passages(text, 30);
        assert_eq!(parts[0], "First para line two.\n\nSecond.");
        assert_eq!(parts[1], "Third paragraph here.");

        let long = "word ".repeat(20);
        let parts = split_passages(&long, 22);
        assert!(parts.iter().all(|p| p.chars().count() <= 22));
        assert_eq!(parts.join(" ").split_whitespace().count(), 20);
    }

    #[test]
    fn passage_id_depends_on_source_and_text() {
        let a = Passage::new("a.md", "same".into());
        let b = Passage::new("b.md", "same".into());
        assert_ne!(a.id, b.id);
        assert_eq!(a.id, Passage::new("a.md", "same".into()).id);
    }

    #[test]
    fn search_ranks_matching_passages() {
        let kb = KnowledgeBase::from_passages(vec![
            Passage::new("bp.md", "Hypertension: blood pressure above 140 mmHg.".into()),
            Passage::new("chol.md", "Cholesterol above 240 mg/dl is high cholesterol.".into()),
            Passage::new("misc.md", "Sleep hygiene matters.".into()),
        ])
        .unwrap();
        let hits = kb.search("high cholesterol", 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].passage.source, "chol.md");
        assert!(kb.search("unrelated terms", 5).is_empty());
        assert!(kb.search("cholesterol", 0).is_empty());
        assert!(kb.search("?? ::", 5).is_empty());
    }

    #[test]
    fn equal_scores_are_ordered_by_id() {
        let kb = KnowledgeBase::from_passages(vec![
            Passage::new("one.md", "Angina at rest.".into()),
            Passage::new("two.md", "Angina at rest.".into()),
            Passage::new("three.md", "Angina at rest.".into()),
        ])
        .unwrap();
        let hits = kb.search("angina", 2);
        assert_eq!(hits.len(), 2);
        assert!(hits[0].passage.id < hits[1].passage.id);
        assert!(hits.iter().all(|h| h.score > 0.0));

        let mut ids: Vec<_> = kb.passages().iter().map(|p| p.id.clone()).collect();
        ids.sort();
        assert_eq!(hits[0].passage.id, ids[0]);
    }

    #[test]
    fn operator_characters_in_queries_are_ignored() {
        let kb = KnowledgeBase::from_passages(vec![Passage::new(
            "bp.md",
            "Blood pressure above 140 mmHg is stage 2 hypertension.".into(),
        )])
        .unwrap();
        let hits = kb.search("pressure:(140) AND \"mmhg", 3);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].passage.source, "bp.md");
    }

    #[test]
    fn load_walks_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("cardio")).unwrap();
        fs::create_dir_all(dir.path().join(".hidden")).unwrap();
        fs::write(dir.path().join("cardio/angina.md"), "Angina is chest pain.").unwrap();
        fs::write(dir.path().join("notes.txt"), "Exercise helps.\n\nDiet helps.").unwrap();
        fs::write(dir.path().join("ignored.csv"), "a,b").unwrap();
        fs::write(dir.path().join(".hidden/secret.md"), "hidden").unwrap();

        let include = vec!["**/*.md".to_string(), "**/*.txt".to_string()];
        let kb = KnowledgeBase::load(dir.path(), &include, 800).unwrap();
        let sources: Vec<_> = kb.passages().iter().map(|p| p.source.as_str()).collect();
        assert_eq!(sources, vec!["cardio/angina.md", "notes.txt"]);
        assert_eq!(kb.search("angina", 3)[0].passage.source, "cardio/angina.md");

        let missing = KnowledgeBase::load(&dir.path().join("nope"), &include, 800).unwrap();
        assert!(missing.is_empty());
    }
}
