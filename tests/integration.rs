//! End-to-end tests of the engine through [`Notebook`]: sync, retrieval,
//! answers and history, with deterministic in-process collaborators.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use openbook::answer::NO_CONTEXT;
use openbook::embedding::Embedder;
use openbook::llm::ChatModel;
use openbook::models::{PromptMessage, Role};
use openbook::{EngineError, Notebook, NotebookSettings};
use tempfile::TempDir;

const DIMS: usize = 256;

/// Hashes lowercase words into a unit-length bag-of-words vector.
struct BagOfWords {
    calls: Arc<AtomicUsize>,
}

impl Embedder for BagOfWords {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    fn embed(&self, texts: &[String]) -> openbook::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let h = word
            .to_lowercase()
            .bytes()
            .fold(2_166_136_261u32, |h, b| (h ^ b as u32).wrapping_mul(16_777_619));
        v[h as usize % DIMS] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

/// Bag-of-words vectors, except the `fail_on`-th call (1-based) fails
/// like an unreachable embedding server.
struct FlakyEmbedder {
    calls: Arc<AtomicUsize>,
    fail_on: usize,
}

impl Embedder for FlakyEmbedder {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    fn embed(&self, texts: &[String]) -> openbook::Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(EngineError::Transport {
                service: "embedding",
                message: "connection refused".into(),
            });
        }
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

/// Records every prompt and replies with a fixed answer, or fails.
struct ScriptedChat {
    reply: Option<String>,
    prompts: Arc<Mutex<Vec<Vec<PromptMessage>>>>,
}

impl ChatModel for ScriptedChat {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn complete(&self, messages: &[PromptMessage]) -> openbook::Result<String> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        match &self.reply {
            Some(reply) => Ok(reply.clone()),
            None => Err(EngineError::Transport {
                service: "chat",
                message: "connection refused".into(),
            }),
        }
    }
}

struct Harness {
    notebook: Notebook,
    embed_calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<Vec<PromptMessage>>>>,
}

fn open(root: &Path, reply: Option<&str>) -> Harness {
    let embed_calls = Arc::new(AtomicUsize::new(0));
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let notebook = Notebook::with_components(
        root,
        NotebookSettings::default(),
        Box::new(BagOfWords {
            calls: embed_calls.clone(),
        }),
        Box::new(ScriptedChat {
            reply: reply.map(str::to_string),
            prompts: prompts.clone(),
        }),
    )
    .unwrap();
    Harness {
        notebook,
        embed_calls,
        prompts,
    }
}

fn open_flaky(root: &Path, fail_on: usize) -> Harness {
    let embed_calls = Arc::new(AtomicUsize::new(0));
    let prompts = Arc::new(Mutex::new(Vec::new()));
    let notebook = Notebook::with_components(
        root,
        NotebookSettings::default(),
        Box::new(FlakyEmbedder {
            calls: embed_calls.clone(),
            fail_on,
        }),
        Box::new(ScriptedChat {
            reply: Some("ok".to_string()),
            prompts: prompts.clone(),
        }),
    )
    .unwrap();
    Harness {
        notebook,
        embed_calls,
        prompts,
    }
}

fn registered(nb: &Notebook) -> Vec<String> {
    nb.file_states()
        .unwrap()
        .into_iter()
        .map(|s| s.filename)
        .collect()
}

fn set_mtime_ahead(path: &Path, secs: u64) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(secs))
        .unwrap();
}

fn biology_project() -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("biology.txt"),
        "Photosynthesis is the process plants use to convert light into chemical energy.",
    )
    .unwrap();
    fs::write(
        tmp.path().join("markets.md"),
        "# Markets\n\nThe stock exchange closed higher on Tuesday after strong earnings.",
    )
    .unwrap();
    tmp
}

#[test]
fn test_answer_uses_retrieved_context() {
    let tmp = biology_project();
    let mut h = open(tmp.path(), Some("Plants turn light into energy."));

    let report = h.notebook.sync().unwrap();
    assert_eq!(report.indexed_files, 2);
    assert_eq!(report.to_string(), "Indexed 2 new documents.");

    let results = h.notebook.query("What is photosynthesis?", 1).unwrap();
    assert_eq!(results[0].metadata.source, "biology.txt");

    let answer = h.notebook.answer_query("What is photosynthesis?").unwrap();
    assert_eq!(answer, "Plants turn light into energy.");

    let prompts = h.prompts.lock().unwrap();
    let prompt = &prompts[0];
    assert_eq!(prompt.len(), 2);
    assert_eq!(prompt[0].role, Role::System);
    assert_eq!(prompt[0].content, h.notebook.settings().system_prompt);
    assert_eq!(prompt[1].role, Role::User);
    assert!(prompt[1].content.starts_with("Context:\nPhotosynthesis is the process"));
    assert!(prompt[1].content.ends_with("\n\nQuery: What is photosynthesis?"));

    let history = h.notebook.history().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "What is photosynthesis?");
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, "Plants turn light into energy.");
}

#[test]
fn test_second_sync_does_no_embedding() {
    let tmp = biology_project();
    let mut h = open(tmp.path(), Some("ok"));

    h.notebook.sync().unwrap();
    let first_calls = h.embed_calls.load(Ordering::SeqCst);
    let count = h.notebook.index_mut().count().unwrap();
    assert!(first_calls > 0);

    let report = h.notebook.sync().unwrap();
    assert_eq!(report.to_string(), "Project up to date.");
    assert_eq!(report.unchanged, 2);
    assert_eq!(h.embed_calls.load(Ordering::SeqCst), first_calls);
    assert_eq!(h.notebook.index_mut().count().unwrap(), count);
}

#[test]
fn test_touched_file_only_refreshes_mtime() {
    let tmp = biology_project();
    let mut h = open(tmp.path(), Some("ok"));
    h.notebook.sync().unwrap();
    let count = h.notebook.index_mut().count().unwrap();
    let calls = h.embed_calls.load(Ordering::SeqCst);
    let before = h.notebook.registry().get_file_state("biology.txt").unwrap().unwrap();

    let path = tmp.path().join("biology.txt");
    set_mtime_ahead(&path, 120);
    let report = h.notebook.sync().unwrap();

    assert_eq!(report.touched, 1);
    assert_eq!(report.indexed_files, 0);
    assert!(report.is_up_to_date());
    assert_eq!(h.notebook.index_mut().count().unwrap(), count);
    assert_eq!(h.embed_calls.load(Ordering::SeqCst), calls);

    let after = h.notebook.registry().get_file_state("biology.txt").unwrap().unwrap();
    assert_eq!(after.content_hash, before.content_hash);
    let stored = after.last_modified.unwrap();
    let actual = openbook::sync::mtime_secs(&path).unwrap();
    assert!((stored - actual).abs() < 1e-3);
    assert!(stored > before.last_modified.unwrap() + 60.0);

    // Now within tolerance: skipped without hashing.
    let report = h.notebook.sync().unwrap();
    assert_eq!(report.unchanged, 2);
}

#[test]
fn test_changed_content_appends_chunks() {
    let tmp = biology_project();
    let mut h = open(tmp.path(), Some("ok"));
    h.notebook.sync().unwrap();
    let count = h.notebook.index_mut().count().unwrap();
    let before = h.notebook.registry().get_file_state("markets.md").unwrap().unwrap();

    let path = tmp.path().join("markets.md");
    fs::write(&path, "Bond yields fell sharply on Wednesday.").unwrap();
    set_mtime_ahead(&path, 120);

    let report = h.notebook.sync().unwrap();
    assert_eq!(report.indexed_files, 1);
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.to_string(), "Indexed 1 new documents.");

    // Old chunks stay; new ones are appended.
    assert_eq!(h.notebook.index_mut().count().unwrap(), count + 1);
    let after = h.notebook.registry().get_file_state("markets.md").unwrap().unwrap();
    assert_ne!(after.content_hash, before.content_hash);

    let top = h.notebook.query("bond yields", 1).unwrap();
    assert_eq!(top[0].metadata.text, "Bond yields fell sharply on Wednesday.");
}

#[test]
fn test_chat_failure_still_completes_turn() {
    let tmp = biology_project();
    let mut h = open(tmp.path(), None);
    h.notebook.sync().unwrap();

    let answer = h.notebook.answer_query("What is photosynthesis?").unwrap();
    assert!(answer.starts_with("Error generating response:"), "{}", answer);
    assert!(answer.contains("connection refused"));

    let history = h.notebook.history().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, answer);
}

#[test]
fn test_empty_index_answers_without_context() {
    let tmp = TempDir::new().unwrap();
    let mut h = open(tmp.path(), Some("I don't know."));

    assert!(h.notebook.query("anything", 5).unwrap().is_empty());
    assert_eq!(h.embed_calls.load(Ordering::SeqCst), 0);

    let answer = h.notebook.answer_query("anything?").unwrap();
    assert_eq!(answer, "I don't know.");
    let prompts = h.prompts.lock().unwrap();
    assert_eq!(
        prompts[0][1].content,
        format!("Context:\n{}\n\nQuery: anything?", NO_CONTEXT)
    );
}

#[test]
fn test_index_survives_reopen() {
    let tmp = biology_project();
    let count = {
        let mut h = open(tmp.path(), Some("ok"));
        h.notebook.sync().unwrap();
        h.notebook.answer_query("hello").unwrap();
        h.notebook.index_mut().count().unwrap()
    };

    let mut h = open(tmp.path(), Some("ok"));
    let index = h.notebook.index_mut();
    assert_eq!(index.count().unwrap(), count);
    assert_eq!(index.metadata().unwrap().len(), count);
    assert_eq!(h.notebook.history().unwrap().len(), 2);

    let report = h.notebook.sync().unwrap();
    assert!(report.is_up_to_date());
    assert_eq!(h.embed_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_reindex_rebuilds_without_duplicates() {
    let tmp = biology_project();
    let mut h = open(tmp.path(), Some("ok"));
    h.notebook.sync().unwrap();
    let count = h.notebook.index_mut().count().unwrap();

    let report = h.notebook.reindex().unwrap();
    assert_eq!(report.indexed_files, 2);
    assert_eq!(h.notebook.index_mut().count().unwrap(), count);
    assert_eq!(h.notebook.file_states().unwrap().len(), 2);
}

#[test]
fn test_broken_file_does_not_stop_sync() {
    let tmp = biology_project();
    fs::write(tmp.path().join("broken.pdf"), b"this is not a pdf").unwrap();
    fs::write(tmp.path().join("picture.png"), [0u8, 1, 2, 3]).unwrap();

    let mut h = open(tmp.path(), Some("ok"));
    let report = h.notebook.sync().unwrap();

    assert_eq!(report.indexed_files, 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].filename, "broken.pdf");
    assert!(report.to_string().contains("1 file(s) failed: broken.pdf"));

    let names: Vec<String> = h
        .notebook
        .file_states()
        .unwrap()
        .into_iter()
        .map(|s| s.filename)
        .collect();
    assert_eq!(names, vec!["biology.txt", "markets.md"]);

    // Still failing, still retried.
    let report = h.notebook.sync().unwrap();
    assert_eq!(report.failed.len(), 1);
}

#[test]
fn test_hidden_files_and_dependency_dir_ignored() {
    let tmp = biology_project();
    fs::write(tmp.path().join(".secret.txt"), "hidden text").unwrap();
    let mut h = open(tmp.path(), Some("ok"));

    let report = h.notebook.sync().unwrap();
    assert_eq!(report.scanned, 2);
    assert!(tmp.path().join(".openbook").join("registry.sqlite").exists());
}

#[test]
fn test_stats_after_sync() {
    let tmp = biology_project();
    let mut h = open(tmp.path(), Some("ok"));
    h.notebook.sync().unwrap();
    h.notebook.answer_query("photosynthesis").unwrap();

    let stats = h.notebook.stats().unwrap();
    assert_eq!(stats.model, "bag-of-words");
    assert_eq!(stats.dims, DIMS);
    assert_eq!(stats.vectors, 2);
    assert_eq!(stats.messages, 2);
    assert_eq!(stats.files.len(), 2);
    assert!(stats.files.iter().all(|f| f.chunks == 1 && f.indexed_at.is_some()));
    assert!(stats.index_bytes > 0);
}

#[test]
fn test_single_note_is_one_searchable_chunk() {
    let tmp = TempDir::new().unwrap();
    let text = "Photosynthesis converts light into chemical energy.";
    fs::write(tmp.path().join("notes.txt"), text).unwrap();
    let mut h = open(tmp.path(), Some("ok"));

    h.notebook.sync().unwrap();
    assert_eq!(h.notebook.index_mut().count().unwrap(), 1);

    let results = h.notebook.query("How do plants make energy from light?", 1).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].metadata.source, "notes.txt");
    assert_eq!(results[0].metadata.text, text);
}

#[test]
fn test_embedding_outage_aborts_sync_after_committed_files() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.txt"), "Alpha particles are helium nuclei.").unwrap();
    fs::write(tmp.path().join("b.txt"), "Beta decay emits electrons.").unwrap();
    fs::write(tmp.path().join("c.txt"), "Gamma rays are photons.").unwrap();

    {
        let mut h = open_flaky(tmp.path(), 2);
        let err = h.notebook.sync().unwrap_err();
        assert!(
            matches!(err, EngineError::Transport { service: "embedding", .. }),
            "{:?}",
            err
        );
        assert_eq!(h.embed_calls.load(Ordering::SeqCst), 2);
        assert_eq!(registered(&h.notebook), vec!["a.txt"]);
        assert_eq!(h.notebook.index_mut().count().unwrap(), 1);
    }

    // The next run picks up where the failed one stopped.
    let mut h = open(tmp.path(), Some("ok"));
    let report = h.notebook.sync().unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.indexed_files, 2);
    assert_eq!(registered(&h.notebook), vec!["a.txt", "b.txt", "c.txt"]);
    assert_eq!(h.notebook.index_mut().count().unwrap(), 3);
}

#[test]
fn test_persist_failure_propagates_and_rolls_back() {
    let tmp = biology_project();
    let mut h = open(tmp.path(), Some("ok"));
    h.notebook.sync().unwrap();
    let count = h.notebook.index_mut().count().unwrap();

    // A directory where the temporary index file goes makes the write fail.
    let blocker = tmp
        .path()
        .join(openbook::notebook::DEPENDENCY_DIR)
        .join(openbook::notebook::INDEX_DIR)
        .join("index.tmp");
    fs::create_dir_all(&blocker).unwrap();

    let path = tmp.path().join("cells.txt");
    fs::write(&path, "Mitochondria produce ATP for the cell.").unwrap();
    set_mtime_ahead(&path, 120);

    let err = h.notebook.sync().unwrap_err();
    assert!(matches!(err, EngineError::Persistence { .. }), "{:?}", err);
    assert_eq!(h.notebook.index_mut().count().unwrap(), count);
    assert_eq!(h.notebook.index_mut().metadata().unwrap().len(), count);
    assert!(h.notebook.registry().get_file_state("cells.txt").unwrap().is_none());

    fs::remove_dir(&blocker).unwrap();
    let report = h.notebook.sync().unwrap();
    assert_eq!(report.indexed_files, 1);
    assert_eq!(h.notebook.index_mut().count().unwrap(), count + 1);
}

#[test]
fn test_retrieval_failure_still_records_turn() {
    let tmp = biology_project();
    let mut h = open_flaky(tmp.path(), 3);
    h.notebook.sync().unwrap();
    assert_eq!(h.embed_calls.load(Ordering::SeqCst), 2);

    let answer = h.notebook.answer_query("What is photosynthesis?").unwrap();
    assert!(answer.starts_with("Error generating response:"), "{}", answer);
    assert!(answer.contains("connection refused"));
    assert!(h.prompts.lock().unwrap().is_empty());

    let history = h.notebook.history().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "What is photosynthesis?");
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, answer);
}

#[test]
fn test_blank_new_file_is_not_up_to_date() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("empty.txt"), "   \n").unwrap();
    let mut h = open(tmp.path(), Some("ok"));

    let report = h.notebook.sync().unwrap();
    assert_eq!(report.indexed_files, 1);
    assert_eq!(report.documents, 0);
    assert!(!report.is_up_to_date());
    assert_eq!(report.to_string(), "Indexed 0 new documents.");
    assert_eq!(registered(&h.notebook), vec!["empty.txt"]);

    let report = h.notebook.sync().unwrap();
    assert_eq!(report.to_string(), "Project up to date.");
}

#[test]
fn test_project_name_with_query_characters() {
    let tmp = TempDir::new().unwrap();
    let mut workspace = openbook::Workspace::new(None);
    workspace.set_storage_location(tmp.path()).unwrap();
    let project = workspace.open_project("Why?").unwrap();
    project
        .save_text("sky", "The sky looks blue because air scatters short wavelengths.")
        .unwrap();

    let mut h = open(project.path(), Some("Scattering."));
    let report = h.notebook.sync().unwrap();
    assert_eq!(report.indexed_files, 1);
    assert_eq!(h.notebook.answer_query("Why is the sky blue?").unwrap(), "Scattering.");
    assert!(project
        .path()
        .join(openbook::notebook::DEPENDENCY_DIR)
        .join(openbook::notebook::REGISTRY_FILE)
        .is_file());
}

#[test]
fn test_desktop_history_imported_once() {
    let tmp = TempDir::new().unwrap();
    let legacy_dir = tmp.path().join(openbook::notebook::LEGACY_DEPENDENCY_DIR);
    fs::create_dir_all(&legacy_dir).unwrap();
    {
        let legacy = openbook::registry::Registry::open(
            &legacy_dir.join(openbook::notebook::LEGACY_DB_FILE),
        )
        .unwrap();
        legacy.append_message(Role::User, "What is ATP?").unwrap();
        legacy.append_message(Role::Assistant, "An energy carrier.").unwrap();
    }

    {
        let h = open(tmp.path(), Some("ok"));
        let history = h.notebook.history().unwrap();
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["What is ATP?", "An energy carrier."]);
        assert_eq!(history[1].role, Role::Assistant);
    }

    let h = open(tmp.path(), Some("ok"));
    assert_eq!(h.notebook.history().unwrap().len(), 2);
}
