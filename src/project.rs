//! Project management on disk.
//!
//! A [`Workspace`] is the storage root (`<parent>/OpenbookLM-Projects`)
//! holding one directory per project. A [`Project`] manages the source
//! files in its directory; the engine state lives in the hidden
//! dependency directory and is opened with [`Project::open_notebook`].

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::extract;
use crate::notebook::Notebook;

pub const PROJECTS_DIR: &str = "OpenbookLM-Projects";

/// Characters stripped from note titles before they become filenames.
const UNSAFE_FILENAME_CHARS: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

const LINK_TIMEOUT_SECS: u64 = 30;
/// Note title used when a page has neither a usable title nor a host.
const LINK_FALLBACK_TITLE: &str = "website_content";

#[derive(Debug, Clone, Default)]
pub struct Workspace {
    root: Option<PathBuf>,
}

impl Workspace {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    pub fn root(&self) -> Result<&Path> {
        self.root.as_deref().ok_or_else(|| {
            EngineError::Configuration(
                "storage root is not set; run `openbook setup <dir>` first".into(),
            )
        })
    }

    /// Points the workspace at `parent/OpenbookLM-Projects`, creating it.
    /// `parent` must already exist.
    pub fn set_storage_location(&mut self, parent: &Path) -> Result<PathBuf> {
        if !parent.is_dir() {
            return Err(EngineError::Configuration(format!(
                "storage location does not exist: {}",
                parent.display()
            )));
        }
        let root = parent.join(PROJECTS_DIR);
        std::fs::create_dir_all(&root)?;
        tracing::info!(root = %root.display(), "storage root set");
        self.root = Some(root.clone());
        Ok(root)
    }

    /// Project names, sorted.
    pub fn list_projects(&self) -> Result<Vec<String>> {
        let root = self.root()?;
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_dir() && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Opens the named project, creating its directory if missing.
    pub fn open_project(&self, name: &str) -> Result<Project> {
        let name = validate_component(name)?;
        let path = self.root()?.join(&name);
        if !path.exists() {
            std::fs::create_dir_all(&path)?;
            tracing::info!(project = %name, "project created");
        }
        Ok(Project { name, path })
    }

    /// Opens an existing project.
    pub fn project(&self, name: &str) -> Result<Project> {
        let name = validate_component(name)?;
        let path = self.root()?.join(&name);
        if !path.is_dir() {
            return Err(not_found(format!("no project named '{}'", name)));
        }
        Ok(Project { name, path })
    }

    /// Removes the project directory and everything in it.
    pub fn delete_project(&self, name: &str) -> Result<()> {
        let project = self.project(name)?;
        std::fs::remove_dir_all(&project.path)?;
        tracing::info!(project = %project.name, "project deleted");
        Ok(())
    }

    pub fn rename_project(&self, old: &str, new: &str) -> Result<Project> {
        let project = self.project(old)?;
        let new = validate_component(new)?;
        let new_path = self.root()?.join(&new);
        if new_path.exists() {
            return Err(already_exists(format!("project '{}' already exists", new)));
        }
        std::fs::rename(&project.path, &new_path)?;
        Ok(Project {
            name: new,
            path: new_path,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Project {
    name: String,
    path: PathBuf,
}

impl Project {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open_notebook(&self, config: &Config) -> Result<Notebook> {
        Notebook::open(&self.path, config)
    }

    /// Copies each regular file into the project. Failures are logged and
    /// skipped; returns how many were copied.
    pub fn add_files(&self, paths: &[PathBuf]) -> usize {
        let mut copied = 0;
        for src in paths {
            let Some(file_name) = src.file_name().filter(|_| src.is_file()) else {
                tracing::warn!(path = %src.display(), "not a regular file, skipping");
                continue;
            };
            match std::fs::copy(src, self.path.join(file_name)) {
                Ok(_) => copied += 1,
                Err(e) => tracing::warn!(path = %src.display(), error = %e, "copy failed"),
            }
        }
        copied
    }

    /// Saves pasted text as a `.txt` source and returns its filename.
    pub fn save_text(&self, title: &str, content: &str) -> Result<String> {
        let mut file_name = sanitize_title(title);
        if !is_usable_title(&file_name) {
            return Err(invalid_name(title));
        }
        if !file_name.ends_with(".txt") {
            file_name.push_str(".txt");
        }
        std::fs::write(self.path.join(&file_name), content)?;
        Ok(file_name)
    }

    /// Fetches a web page and saves its visible text as a note named after
    /// the page title, or the host when the page has none. The note starts
    /// with a `Source:` line holding the URL. Returns the filename.
    pub fn save_link(&self, url: &str) -> Result<String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(LINK_TIMEOUT_SECS))
            .build()
            .map_err(|e| EngineError::transport("web", e))?;
        self.save_link_with(&client, url)
    }

    pub(crate) fn save_link_with(
        &self,
        client: &reqwest::blocking::Client,
        url: &str,
    ) -> Result<String> {
        let response = client
            .get(url)
            .send()
            .map_err(|e| EngineError::transport("web", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::transport(
                "web",
                format!("{} returned {}", url, status),
            ));
        }
        let body = response
            .bytes()
            .map_err(|e| EngineError::transport("web", e))?;

        let page = extract::extract_html(&body).map_err(|e| EngineError::ingestion(url, e))?;
        if page.text.is_empty() {
            return Err(EngineError::ingestion(url, "page has no visible text"));
        }
        let title = link_title(page.title.as_deref(), url);
        tracing::info!(url, title = %title, "saving web page");
        self.save_text(&title, &format!("Source: {}\n\n{}", url, page.text))
    }

    /// Visible regular files in the project, sorted.
    pub fn list_sources(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_file() && !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn delete_source(&self, name: &str) -> Result<()> {
        let name = validate_component(name)?;
        std::fs::remove_file(self.path.join(name))?;
        Ok(())
    }

    /// Renames a source file. A new name without an extension keeps the
    /// old one. Returns the final filename.
    pub fn rename_source(&self, old: &str, new: &str) -> Result<String> {
        let old = validate_component(old)?;
        let mut new = validate_component(new)?;
        if !new.contains('.') {
            if let Some(ext) = Path::new(&old).extension() {
                new = format!("{}.{}", new, ext.to_string_lossy());
            }
        }

        let old_path = self.path.join(&old);
        let new_path = self.path.join(&new);
        if !old_path.is_file() {
            return Err(not_found(format!("no source named '{}'", old)));
        }
        if new_path.exists() {
            return Err(already_exists(format!("source '{}' already exists", new)));
        }
        std::fs::rename(old_path, new_path)?;
        Ok(new)
    }
}

fn sanitize_title(title: &str) -> String {
    let kept: String = title
        .chars()
        .filter(|c| !UNSAFE_FILENAME_CHARS.contains(c))
        .collect();
    kept.trim().to_string()
}

fn is_usable_title(sanitized: &str) -> bool {
    !sanitized.is_empty() && !sanitized.starts_with('.')
}

/// Page title if it survives sanitizing, else the URL host.
fn link_title(title: Option<&str>, url: &str) -> String {
    if let Some(title) = title {
        if is_usable_title(&sanitize_title(title)) {
            return title.trim().to_string();
        }
    }
    let after_scheme = url.split_once("//").map_or(url, |(_, rest)| rest);
    let host = after_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = host.rsplit('@').next().unwrap_or_default();
    if is_usable_title(&sanitize_title(host)) {
        host.to_string()
    } else {
        LINK_FALLBACK_TITLE.to_string()
    }
}

/// Trimmed single path component that is not hidden.
fn validate_component(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed.starts_with('.')
        || trimmed.contains('/')
        || trimmed.contains('\\')
    {
        return Err(invalid_name(name));
    }
    Ok(trimmed.to_string())
}

fn invalid_name(name: &str) -> EngineError {
    EngineError::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("invalid name: '{}'", name),
    ))
}

fn not_found(msg: String) -> EngineError {
    EngineError::Io(io::Error::new(io::ErrorKind::NotFound, msg))
}

fn already_exists(msg: String) -> EngineError {
    EngineError::Io(io::Error::new(io::ErrorKind::AlreadyExists, msg))
}
