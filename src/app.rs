// ── Application lifecycle & top-level state ────────────────────────────────────
//
// A single `App` is created on startup and owned by the front end for the
// lifetime of the process.  All mutations happen on the control thread; load
// and import workers only ever talk to it through channels drained by `pump`.

use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use crossbeam::channel::Select;
use slotmap::SlotMap;
use url::Url;

use crate::{
    editor::{EditingSurface, SurfaceId},
    error::{ConstructError, Result},
    explorer::{self, Entry},
    fetch::{FetchEvent, FetchPolicy, WebImport},
    io::{
        self,
        reader::ReaderOptions,
        save,
        session::{self, LoadOutcome, LoadSessionManager},
    },
    languages::{self, Language, LexerRegistry, Span},
    plugins::{PluginEditor, PluginManager},
    search::{self, Match, SearchOptions},
    settings::{Settings, SettingsStore},
    ui,
    vcs::Repository,
};

// ── Configuration ─────────────────────────────────────────────────────────────

/// Tunables.  `Default` is what the binary runs with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct AppConfig {
    pub(crate) reader: ReaderOptions,
    /// How long closing a tab waits for its load worker.
    pub(crate) close_wait: Duration,
    pub(crate) fetch: FetchPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            reader: ReaderOptions::default(),
            close_wait: session::CLOSE_WAIT,
            fetch: FetchPolicy::default(),
        }
    }
}

// ── Notifications to the front end ───────────────────────────────────────────

/// Something the front end should show after `pump`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AppEvent {
    Loaded { id: SurfaceId, path: PathBuf },
    LoadFailed { id: SurfaceId, message: String },
    Imported { id: SurfaceId, url: Url },
    ImportFailed { message: String },
    PluginMessage { plugin: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseOutcome {
    Closed,
    /// The tab has unsaved changes; ask, then call again with `force`.
    NeedsConfirmation,
}

// ── App ───────────────────────────────────────────────────────────────────────

/// Top-level application state.
///
/// Every user operation is a method here, so the front end sees a single,
/// explicit state root rather than a collection of disconnected globals.
pub(crate) struct App {
    surfaces: SlotMap<SurfaceId, EditingSurface>,
    /// Tab order.
    tabs: Vec<SurfaceId>,
    active: usize,
    loads: LoadSessionManager,
    web: WebImport,
    store: Box<dyn SettingsStore>,
    settings: Settings,
    lexers: LexerRegistry,
    repo: Option<Repository>,
    branch: Option<String>,
    plugins: PluginManager,
    last_search: Option<SearchOptions>,
    /// Events raised on the control thread itself, handed out by `pump`.
    pending: Vec<AppEvent>,
}

impl App {
    /// Create an `App` with one untitled, empty tab.
    pub(crate) fn new(config: AppConfig, store: Box<dyn SettingsStore>) -> Self {
        let settings = store.load();
        let mut app = Self {
            surfaces: SlotMap::with_key(),
            tabs: Vec::new(),
            active: 0,
            loads: LoadSessionManager::new(config.reader, config.close_wait),
            web: WebImport::new(config.fetch),
            store,
            settings,
            lexers: LexerRegistry::with_builtin(),
            repo: None,
            branch: None,
            plugins: PluginManager::new(),
            last_search: None,
            pending: Vec::new(),
        };
        app.new_file();
        app
    }

    // ── Tabs ──────────────────────────────────────────────────────────────────

    pub(crate) fn tabs(&self) -> &[SurfaceId] {
        &self.tabs
    }

    pub(crate) fn active_id(&self) -> Option<SurfaceId> {
        self.tabs.get(self.active).copied()
    }

    pub(crate) fn set_active(&mut self, id: SurfaceId) -> Result<()> {
        let index = self.tab_index(id)?;
        self.active = index;
        Ok(())
    }

    fn tab_index(&self, id: SurfaceId) -> Result<usize> {
        self.tabs
            .iter()
            .position(|t| *t == id)
            .ok_or(ConstructError::NoSuchSurface)
    }

    pub(crate) fn surface(&self, id: SurfaceId) -> Result<&EditingSurface> {
        self.surfaces.get(id).ok_or(ConstructError::NoSuchSurface)
    }

    pub(crate) fn surface_mut(&mut self, id: SurfaceId) -> Result<&mut EditingSurface> {
        self.surfaces.get_mut(id).ok_or(ConstructError::NoSuchSurface)
    }

    pub(crate) fn active_surface(&self) -> Option<&EditingSurface> {
        self.active_id().and_then(|id| self.surfaces.get(id))
    }

    fn add_tab(&mut self, surface: EditingSurface) -> SurfaceId {
        let id = self.surfaces.insert(surface);
        self.tabs.push(id);
        self.active = self.tabs.len() - 1;
        id
    }

    /// Open a fresh untitled tab and make it active.
    pub(crate) fn new_file(&mut self) -> SurfaceId {
        self.add_tab(EditingSurface::new_untitled())
    }

    /// Close `id`.  A dirty tab is only closed with `force`; the front end
    /// saves or discards first.  Closing the last tab opens a fresh one.
    pub(crate) fn close_tab(&mut self, id: SurfaceId, force: bool) -> Result<CloseOutcome> {
        let index = self.tab_index(id)?;
        let surface = self.surfaces.get_mut(id).ok_or(ConstructError::NoSuchSurface)?;
        if surface.dirty && !force {
            return Ok(CloseOutcome::NeedsConfirmation);
        }
        self.loads.release(surface);
        self.surfaces.remove(id);
        self.tabs.remove(index);

        if self.tabs.is_empty() {
            self.new_file();
        } else if self.active >= self.tabs.len() || self.active > index {
            self.active = self.active.saturating_sub(1).min(self.tabs.len() - 1);
        }
        Ok(CloseOutcome::Closed)
    }

    /// Whether any tab holds changes that were never saved.
    pub(crate) fn has_unsaved(&self) -> bool {
        self.surfaces.values().any(|s| s.dirty)
    }

    /// Release every tab's worker.  Called on exit.
    pub(crate) fn shutdown(&mut self) {
        for surface in self.surfaces.values_mut() {
            self.loads.release(surface);
        }
    }

    // ── Loading ───────────────────────────────────────────────────────────────

    /// Open `path` in a tab and start streaming it in.
    ///
    /// A file that is already open just becomes the active tab.  An untouched
    /// untitled tab is reused instead of opening another.
    pub(crate) fn open_file(&mut self, path: &Path) -> Result<SurfaceId> {
        let path = io::normalize_path(path);
        let meta = std::fs::metadata(&path)?;
        if !meta.is_file() {
            return Err(ConstructError::NotAFile(path));
        }

        if let Some(&id) = self
            .tabs
            .iter()
            .find(|id| self.surfaces[**id].path.as_deref() == Some(path.as_path()))
        {
            self.set_active(id)?;
            return Ok(id);
        }

        let reuse = self.active_id().filter(|id| {
            let s = &self.surfaces[*id];
            s.path.is_none() && !s.dirty && !s.is_loading() && s.text().len_chars() == 0
        });
        let id = match reuse {
            Some(id) => id,
            None => self.add_tab(EditingSurface::new_untitled()),
        };
        self.start_load(id, path)?;
        Ok(id)
    }

    /// Re-read the tab's file from disk.  On failure the current content is
    /// kept.
    pub(crate) fn reload(&mut self, id: SurfaceId) -> Result<()> {
        let path = self.surface(id)?.path.clone().ok_or(ConstructError::NoPath)?;
        self.start_load(id, path)
    }

    fn start_load(&mut self, id: SurfaceId, path: PathBuf) -> Result<()> {
        let language = self.language_for(&path);
        let surface = self.surfaces.get_mut(id).ok_or(ConstructError::NoSuchSurface)?;
        surface.language = language;
        self.loads.start(id, surface, path);
        Ok(())
    }

    /// Language for `path`: a stored override if any, else by extension.
    pub(crate) fn language_for(&self, path: &Path) -> Language {
        self.settings
            .language_override(path)
            .and_then(Language::from_tag)
            .unwrap_or_else(|| languages::language_from_path(path))
    }

    // ── Event pump ────────────────────────────────────────────────────────────

    /// Apply everything the workers have sent so far.  Never blocks.
    pub(crate) fn pump(&mut self) -> Vec<AppEvent> {
        let mut events = std::mem::take(&mut self.pending);

        while let Ok(event) = self.loads.events().try_recv() {
            let id = event.surface;
            let Some(surface) = self.surfaces.get_mut(id) else {
                log::trace!("dropping load event for closed tab");
                continue;
            };
            match LoadSessionManager::apply(surface, event) {
                LoadOutcome::Finished { path } => {
                    self.settings.push_recent(&path);
                    self.persist();
                    events.push(AppEvent::Loaded { id, path });
                }
                LoadOutcome::Failed { message, .. } => events.push(AppEvent::LoadFailed { id, message }),
                LoadOutcome::Dropped | LoadOutcome::Started | LoadOutcome::Appended => {}
            }
        }

        while let Some(event) = self.web.try_recv() {
            match event {
                FetchEvent::Completed { target, url, text } => match self.surfaces.get_mut(target) {
                    Some(surface) => {
                        surface.replace_all_text(&text);
                        let name = url.path_segments().and_then(|mut s| s.next_back()).unwrap_or_default();
                        surface.language = languages::language_from_path(Path::new(name));
                        log::info!("imported {url}");
                        events.push(AppEvent::Imported { id: target, url });
                    }
                    None => events.push(AppEvent::ImportFailed {
                        message: "the target tab was closed".to_owned(),
                    }),
                },
                FetchEvent::Failed { message, .. } => {
                    log::error!("import failed: {message}");
                    events.push(AppEvent::ImportFailed { message });
                }
            }
        }
        events
    }

    /// Wait up to `timeout` for worker output, then `pump`.
    pub(crate) fn pump_blocking(&mut self, timeout: Duration) -> Vec<AppEvent> {
        if self.pending.is_empty() {
            let mut select = Select::new();
            select.recv(self.loads.events());
            select.recv(self.web.events());
            let _ = select.ready_timeout(timeout);
        }
        self.pump()
    }

    /// Pump until `id` has no active load or `timeout` passes.
    pub(crate) fn wait_for_load(&mut self, id: SurfaceId, timeout: Duration) -> Vec<AppEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();
        while self.surfaces.get(id).is_some_and(EditingSurface::is_loading) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            events.extend(self.pump_blocking(remaining));
        }
        events
    }

    // ── Saving ────────────────────────────────────────────────────────────────

    /// Write the tab to its path with its encoding and newline style.
    ///
    /// `ConstructError::Unencodable` means nothing was written; offer
    /// `save::ALTERNATE_ENCODINGS` and call `save_with_encoding`.  A tab that
    /// is still loading is refused with `LoadInProgress`.
    pub(crate) fn save(&mut self, id: SurfaceId) -> Result<()> {
        let surface = self.surface_mut(id)?;
        let path = surface.path.clone().ok_or(ConstructError::NoPath)?;
        if surface.is_loading() {
            return Err(ConstructError::LoadInProgress);
        }
        save::write_document(
            &path,
            &surface.contents(),
            surface.encoding,
            surface.newline,
            surface.bom,
        )?;
        surface.dirty = false;
        self.settings.push_recent(&path);
        self.persist();
        Ok(())
    }

    /// Save to `path` and rebind the tab to it.  Refused while the tab is
    /// loading, like `save`.
    pub(crate) fn save_as(&mut self, id: SurfaceId, path: &Path) -> Result<()> {
        {
            let surface = self.surface(id)?;
            if surface.is_loading() {
                return Err(ConstructError::LoadInProgress);
            }
            save::write_document(
                path,
                &surface.contents(),
                surface.encoding,
                surface.newline,
                surface.bom,
            )?;
        }
        // Normalised only now that the file exists, so symlinks resolve.
        let path = io::normalize_path(path);
        let language = self.language_for(&path);
        let surface = self.surface_mut(id)?;
        surface.path = Some(path.clone());
        surface.language = language;
        surface.dirty = false;
        self.settings.push_recent(&path);
        self.persist();
        Ok(())
    }

    /// Switch the tab's encoding to `label` and save.  UTF-16 is written with
    /// a byte-order mark so it can be recognised on the next load.
    pub(crate) fn save_with_encoding(&mut self, id: SurfaceId, label: &str) -> Result<()> {
        let encoding = save::encoding_for_label(label)?;
        let surface = self.surface_mut(id)?;
        let previous = (surface.encoding, surface.bom);
        surface.encoding = encoding;
        surface.bom = encoding == encoding_rs::UTF_16LE
            || encoding == encoding_rs::UTF_16BE
            || (encoding == encoding_rs::UTF_8 && surface.bom);
        let result = self.save(id);
        if result.is_err() {
            if let Ok(surface) = self.surface_mut(id) {
                (surface.encoding, surface.bom) = previous;
            }
        }
        result
    }

    // ── Recent files ──────────────────────────────────────────────────────────

    /// The recent list as a menu would show it; vanished entries are pruned
    /// (and the pruning persisted) first.
    pub(crate) fn recent_files(&mut self) -> Vec<PathBuf> {
        if self.settings.prune_recent() {
            self.persist();
        }
        self.settings.recent_files.clone()
    }

    /// Open a recent entry.  One that no longer exists is removed and
    /// reported.
    pub(crate) fn open_recent(&mut self, path: &Path) -> Result<SurfaceId> {
        if !path.is_file() {
            self.settings.remove_recent(path);
            self.persist();
            return Err(ConstructError::NotAFile(path.to_path_buf()));
        }
        self.open_file(path)
    }

    pub(crate) fn clear_recent(&mut self) {
        self.settings.clear_recent();
        self.persist();
    }

    // ── Language ──────────────────────────────────────────────────────────────

    /// Pin (or with `None`, unpin) the tab's file to a language.  Persisted
    /// and applied on every later load of that path.
    pub(crate) fn set_language_override(&mut self, id: SurfaceId, tag: Option<&str>) -> Result<()> {
        let path = self.surface(id)?.path.clone().ok_or(ConstructError::NoPath)?;
        let language = match tag {
            Some(tag) => Some(Language::from_tag(tag).ok_or_else(|| ConstructError::UnknownLanguage(tag.to_owned()))?),
            None => None,
        };
        self.settings
            .set_language_override(&path, language.map(Language::tag));
        self.persist();
        let resolved = self.language_for(&path);
        self.surface_mut(id)?.language = resolved;
        Ok(())
    }

    /// Highlight spans for one line of the tab, from its language's lexer.
    pub(crate) fn highlight_line(&self, id: SurfaceId, line: usize) -> Result<Vec<Span>> {
        let surface = self.surface(id)?;
        let text = surface.text();
        if line >= text.len_lines() {
            return Ok(Vec::new());
        }
        let line = text.line(line).to_string();
        Ok(self
            .lexers
            .resolve(surface.language.tag())
            .highlight_line(line.trim_end_matches('\n')))
    }

    // ── Search ────────────────────────────────────────────────────────────────

    /// Find from just after the caret, wrapping.  Moves the caret to the end
    /// of the match.
    pub(crate) fn find_next(&mut self, id: SurfaceId, options: SearchOptions) -> Result<Option<Match>> {
        let surface = self.surface_mut(id)?;
        let from = surface.cursor();
        let found = search::find_next(surface, &options, from);
        if let Some(m) = found {
            surface.set_cursor(m.end);
        }
        self.last_search = Some(options);
        Ok(found)
    }

    /// Repeat the last `find_next`.
    pub(crate) fn find_again(&mut self, id: SurfaceId) -> Result<Option<Match>> {
        match self.last_search.clone() {
            Some(options) => self.find_next(id, options),
            None => Ok(None),
        }
    }

    pub(crate) fn replace(&mut self, id: SurfaceId, options: &SearchOptions, with: &str) -> Result<Option<Match>> {
        let surface = self.surface_mut(id)?;
        let from = surface.cursor().saturating_sub(options.text.chars().count());
        Ok(search::replace_next(surface, options, with, from))
    }

    pub(crate) fn replace_all(&mut self, id: SurfaceId, options: &SearchOptions, with: &str) -> Result<usize> {
        Ok(search::replace_all(self.surface_mut(id)?, options, with))
    }

    // ── Import from web ───────────────────────────────────────────────────────

    /// Start fetching `url` into the active tab.  The result arrives through
    /// `pump`.
    pub(crate) fn import_from_web(&mut self, url: &str) -> Result<()> {
        let target = self.active_id().ok_or(ConstructError::NoSuchSurface)?;
        self.web.start(target, url)?;
        Ok(())
    }

    // ── Explorer ──────────────────────────────────────────────────────────────

    pub(crate) fn list_dir(&self, dir: &Path) -> Result<Vec<Entry>> {
        explorer::list_dir(dir)
    }

    /// Create an empty file beside/inside `selected` and open it.
    pub(crate) fn create_file(&mut self, selected: &Path, name: &str) -> Result<SurfaceId> {
        let path = explorer::create_file(&explorer::target_dir(selected), name)?;
        self.open_file(&path)
    }

    pub(crate) fn create_dir(&self, selected: &Path, name: &str) -> Result<PathBuf> {
        explorer::create_dir(&explorer::target_dir(selected), name)
    }

    // ── Version control ───────────────────────────────────────────────────────

    pub(crate) fn open_repository(&mut self, root: &Path) -> Result<()> {
        let repo = Repository::open(&io::normalize_path(root))?;
        self.branch = repo.current_branch();
        log::info!("opened repository {}", repo.root().display());
        self.repo = Some(repo);
        Ok(())
    }

    pub(crate) fn repo(&self) -> Result<&Repository> {
        self.repo.as_ref().ok_or(ConstructError::NoRepository)
    }

    /// Re-read the branch name after commands that may change it.
    pub(crate) fn refresh_branch(&mut self) {
        self.branch = self.repo.as_ref().and_then(Repository::current_branch);
    }

    // ── Plugins ───────────────────────────────────────────────────────────────

    /// Load every plugin in `dir`.  Returns how many loaded.
    ///
    /// The manager is lent out for the call so plugins can reach the rest of
    /// the app through `PluginEditor`.
    pub(crate) fn load_plugins(&mut self, dir: &Path) -> Result<usize> {
        let mut plugins = std::mem::take(&mut self.plugins);
        let result = plugins.load_dir(dir, self);
        self.plugins = plugins;
        result
    }

    pub(crate) fn run_plugin_command(&mut self, name: &str) -> Result<()> {
        let plugins = std::mem::take(&mut self.plugins);
        let result = plugins.run_command(name, self);
        self.plugins = plugins;
        result
    }

    pub(crate) fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    #[cfg(test)]
    pub(crate) fn set_plugins(&mut self, plugins: PluginManager) {
        self.plugins = plugins;
    }

    // ── Presentation ──────────────────────────────────────────────────────────

    pub(crate) fn window_title(&self) -> String {
        ui::window_title(self.active_surface())
    }

    pub(crate) fn status_line(&self) -> Option<String> {
        self.active_surface()
            .map(|s| ui::status_line(s, self.branch.as_deref()))
    }

    pub(crate) fn tab_labels(&self) -> Vec<String> {
        self.tabs
            .iter()
            .filter_map(|id| self.surfaces.get(*id))
            .map(ui::tabs::tab_label)
            .collect()
    }

    // ── Settings ──────────────────────────────────────────────────────────────

    pub(crate) fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Write-through after every settings mutation.
    fn persist(&self) {
        if let Err(e) = self.store.save(&self.settings) {
            log::warn!("could not save settings: {e}");
        }
    }
}

impl PluginEditor for App {
    fn active_text(&self) -> Option<String> {
        self.active_surface().map(EditingSurface::contents)
    }

    fn replace_active_text(&mut self, text: &str) -> bool {
        match self.active_id().and_then(|id| self.surfaces.get_mut(id)) {
            Some(surface) => {
                surface.replace_all_text(text);
                true
            }
            None => false,
        }
    }

    fn show_message(&mut self, plugin: &str, message: &str) {
        log::info!("[{plugin}] {message}");
        self.pending.push(AppEvent::PluginMessage {
            plugin: plugin.to_owned(),
            message: message.to_owned(),
        });
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{io::detect::Newline, settings::MemoryStore};
    use std::fs;

    const WAIT: Duration = Duration::from_secs(20);

    fn app_with(store: &MemoryStore) -> App {
        App::new(AppConfig::default(), Box::new(store.clone()))
    }

    fn open_and_wait(app: &mut App, path: &Path) -> (SurfaceId, Vec<AppEvent>) {
        let id = app.open_file(path).expect("open");
        let events = app.wait_for_load(id, WAIT);
        (id, events)
    }

    #[test]
    fn starts_with_one_untitled_tab() {
        let app = app_with(&MemoryStore::default());
        assert_eq!(app.tabs().len(), 1);
        assert_eq!(app.window_title(), "Construct - Unnamed");
    }

    #[test]
    fn crlf_file_opens_and_saves_back_identically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        fs::write(&path, b"line1\r\nline2\r\n").expect("write");

        let store = MemoryStore::default();
        let mut app = app_with(&store);
        let (id, events) = open_and_wait(&mut app, &path);
        let canonical = io::normalize_path(&path);

        assert_eq!(
            events,
            vec![AppEvent::Loaded {
                id,
                path: canonical.clone()
            }]
        );
        // The untitled startup tab was reused.
        assert_eq!(app.tabs(), [id]);

        let surface = app.surface(id).expect("surface");
        assert_eq!(surface.contents(), "line1\nline2\n");
        assert_eq!(surface.newline, Newline::Crlf);
        assert_eq!(surface.encoding_name(), "UTF-8");
        assert!(!surface.dirty);
        assert_eq!(app.window_title(), "Construct - a.txt");
        assert_eq!(store.snapshot().recent_files, vec![canonical]);

        fs::write(&path, b"").expect("truncate");
        app.save(id).expect("save");
        assert_eq!(fs::read(&path).expect("read"), b"line1\r\nline2\r\n");
    }

    #[test]
    fn five_mib_file_is_clean_after_final_chunk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("big.txt");
        fs::write(&path, vec![b'z'; 5 * 1024 * 1024]).expect("write");

        let mut app = app_with(&MemoryStore::default());
        let (id, _) = open_and_wait(&mut app, &path);
        let surface = app.surface(id).expect("surface");
        assert!(!surface.is_loading());
        assert!(!surface.dirty);
        assert_eq!(surface.text().len_chars(), 5 * 1024 * 1024);
    }

    #[test]
    fn opening_an_open_file_activates_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, "a").expect("write");
        fs::write(&b, "b").expect("write");

        let mut app = app_with(&MemoryStore::default());
        let (ia, _) = open_and_wait(&mut app, &a);
        let (ib, _) = open_and_wait(&mut app, &b);
        assert_ne!(ia, ib);
        assert_eq!(app.open_file(&a).expect("reopen"), ia);
        assert_eq!(app.active_id(), Some(ia));
        assert_eq!(app.tabs().len(), 2);
    }

    #[test]
    fn rapid_reloads_apply_only_the_last() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        fs::write(&path, "v1\n").expect("write");

        let mut app = app_with(&MemoryStore::default());
        let (id, _) = open_and_wait(&mut app, &path);
        for _ in 0..5 {
            app.reload(id).expect("reload");
        }
        let generation = app.surface(id).expect("surface").generation;
        let events = app.wait_for_load(id, WAIT);

        assert_eq!(
            events.iter().filter(|e| matches!(e, AppEvent::Loaded { .. })).count(),
            1
        );
        let surface = app.surface(id).expect("surface");
        assert_eq!(surface.generation, generation);
        assert_eq!(surface.contents(), "v1\n");
    }

    #[test]
    fn closing_a_loading_tab_is_safe() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("big.txt");
        fs::write(&path, vec![b'q'; 8 * 1024 * 1024]).expect("write");

        let mut app = app_with(&MemoryStore::default());
        let id = app.open_file(&path).expect("open");
        assert_eq!(app.close_tab(id, false).expect("close"), CloseOutcome::Closed);

        assert!(app.surface(id).is_err());
        let events = app.pump();
        assert!(events.is_empty(), "nothing may land on a closed tab: {events:?}");
        // Closing the last tab leaves a fresh untitled one.
        assert_eq!(app.tabs().len(), 1);
        assert_ne!(app.tabs()[0], id);
    }

    #[test]
    fn dirty_tab_needs_confirmation() {
        let mut app = app_with(&MemoryStore::default());
        let id = app.active_id().expect("tab");
        app.surface_mut(id).expect("surface").insert(0, "unsaved");
        assert_eq!(app.close_tab(id, false).expect("close"), CloseOutcome::NeedsConfirmation);
        assert_eq!(app.tabs(), [id]);
        assert_eq!(app.close_tab(id, true).expect("close"), CloseOutcome::Closed);
        assert_ne!(app.tabs(), [id]);
    }

    #[test]
    fn closing_a_middle_tab_keeps_a_valid_active_tab() {
        let mut app = app_with(&MemoryStore::default());
        let first = app.active_id().expect("tab");
        let second = app.new_file();
        let third = app.new_file();
        app.set_active(second).expect("activate");
        app.close_tab(first, true).expect("close");
        assert_eq!(app.active_id(), Some(second));
        app.close_tab(third, true).expect("close");
        assert_eq!(app.active_id(), Some(second));
    }

    #[test]
    fn failed_reload_keeps_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        fs::write(&path, "keep me\n").expect("write");

        let mut app = app_with(&MemoryStore::default());
        let (id, _) = open_and_wait(&mut app, &path);
        fs::remove_file(&path).expect("remove");

        app.reload(id).expect("reload");
        let events = app.wait_for_load(id, WAIT);
        assert!(matches!(events.as_slice(), [AppEvent::LoadFailed { .. }]));
        assert_eq!(app.surface(id).expect("surface").contents(), "keep me\n");
    }

    #[test]
    fn untitled_save_needs_a_path() {
        let mut app = app_with(&MemoryStore::default());
        let id = app.active_id().expect("tab");
        assert!(matches!(app.save(id), Err(ConstructError::NoPath)));
    }

    #[test]
    fn save_as_rebinds_and_detects_language() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = app_with(&MemoryStore::default());
        let id = app.active_id().expect("tab");
        app.surface_mut(id).expect("surface").insert(0, "print(1)\n");

        let target = dir.path().join("script.py");
        app.save_as(id, &target).expect("save as");
        let surface = app.surface(id).expect("surface");
        assert_eq!(surface.path.as_deref(), Some(io::normalize_path(&target).as_path()));
        assert_eq!(surface.language, Language::Python);
        assert!(!surface.dirty);
        assert_eq!(fs::read(&target).expect("read"), b"print(1)\r\n");
    }

    #[test]
    fn unencodable_save_then_alternate_encoding() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("latin.txt");
        let (bytes, _, _) = encoding_rs::WINDOWS_1252.encode("caf\u{e9} cr\u{e8}me br\u{fb}l\u{e9}e, na\u{ef}ve fa\u{e7}ade\n");
        fs::write(&path, &bytes).expect("write");

        let mut app = app_with(&MemoryStore::default());
        let (id, _) = open_and_wait(&mut app, &path);
        let detected = app.surface(id).expect("surface").encoding_name();
        assert_ne!(detected, "UTF-8");

        app.surface_mut(id).expect("surface").insert(0, "\u{2603} ");
        assert!(matches!(app.save(id), Err(ConstructError::Unencodable { .. })));
        assert!(app.surface(id).expect("surface").dirty);

        assert!(matches!(
            app.save_with_encoding(id, "ISO-8859-1"),
            Err(ConstructError::Unencodable { .. })
        ));
        assert_eq!(app.surface(id).expect("surface").encoding_name(), detected);

        app.save_with_encoding(id, "UTF-8").expect("utf-8 save");
        let written = fs::read(&path).expect("read");
        assert!(String::from_utf8(written).expect("utf-8").starts_with("\u{2603} caf\u{e9}"));
    }

    #[test]
    fn vanished_recent_file_is_removed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        fs::write(&path, "x").expect("write");

        let store = MemoryStore::default();
        let mut app = app_with(&store);
        open_and_wait(&mut app, &path);
        let canonical = io::normalize_path(&path);
        assert_eq!(app.recent_files(), vec![canonical.clone()]);

        fs::remove_file(&path).expect("remove");
        assert!(matches!(app.open_recent(&canonical), Err(ConstructError::NotAFile(_))));
        assert!(store.snapshot().recent_files.is_empty());
    }

    #[test]
    fn recent_menu_prunes_and_clear_empties() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MemoryStore::default();
        let mut settings = Settings::default();
        settings.push_recent(&dir.path().join("gone.txt"));
        store.save(&settings).expect("seed");

        let mut app = app_with(&store);
        assert!(app.recent_files().is_empty());
        assert!(store.snapshot().recent_files.is_empty());
        app.clear_recent();
        assert!(app.settings().recent_files.is_empty());
    }

    #[test]
    fn language_override_is_persisted_and_applied_on_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("build.txt");
        fs::write(&path, "all:\n\techo hi\n").expect("write");

        let store = MemoryStore::default();
        let mut app = app_with(&store);
        let (id, _) = open_and_wait(&mut app, &path);
        assert_eq!(app.surface(id).expect("surface").language, Language::PlainText);

        app.set_language_override(id, Some("makefile")).expect("override");
        assert_eq!(app.surface(id).expect("surface").language, Language::Makefile);
        assert_eq!(
            store.snapshot().language_override(&io::normalize_path(&path)),
            Some("makefile")
        );

        app.reload(id).expect("reload");
        app.wait_for_load(id, WAIT);
        assert_eq!(app.surface(id).expect("surface").language, Language::Makefile);

        assert!(matches!(
            app.set_language_override(id, Some("cobol")),
            Err(ConstructError::UnknownLanguage(_))
        ));
        app.set_language_override(id, None).expect("clear");
        assert_eq!(app.surface(id).expect("surface").language, Language::PlainText);
    }

    #[test]
    fn highlight_uses_surface_language() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("m.py");
        fs::write(&path, "x = 1\ndef f(): pass\n").expect("write");

        let mut app = app_with(&MemoryStore::default());
        let (id, _) = open_and_wait(&mut app, &path);
        assert!(app.highlight_line(id, 0).expect("line 0").is_empty());
        assert_eq!(app.highlight_line(id, 1).expect("line 1").len(), 2);
        assert!(app.highlight_line(id, 99).expect("past end").is_empty());
    }

    #[test]
    fn find_again_moves_through_matches() {
        let mut app = app_with(&MemoryStore::default());
        let id = app.active_id().expect("tab");
        app.surface_mut(id).expect("surface").append_loaded("ab ab ab");

        let first = app.find_next(id, SearchOptions::new("ab")).expect("find");
        assert_eq!(first, Some(Match { start: 0, end: 2 }));
        let second = app.find_again(id).expect("find");
        assert_eq!(second, Some(Match { start: 3, end: 5 }));

        let replaced = app.replace(id, &SearchOptions::new("ab"), "XY").expect("replace");
        assert_eq!(replaced, Some(Match { start: 3, end: 5 }));
        assert_eq!(app.surface(id).expect("surface").contents(), "ab XY ab");
        assert_eq!(app.replace_all(id, &SearchOptions::new("ab"), "-").expect("all"), 2);
        assert_eq!(app.surface(id).expect("surface").contents(), "- XY -");
    }

    #[test]
    fn create_file_opens_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = app_with(&MemoryStore::default());
        let sub = app.create_dir(dir.path(), "pkg").expect("mkdir");
        let id = app.create_file(&sub, "mod.rs").expect("create");
        app.wait_for_load(id, WAIT);
        let surface = app.surface(id).expect("surface");
        assert_eq!(surface.language, Language::Rust);
        assert_eq!(surface.display_name(), "mod.rs");
        let names: Vec<_> = app.list_dir(&sub).expect("list").iter().map(Entry::name).collect();
        assert_eq!(names, ["mod.rs"]);
    }

    #[test]
    fn no_repository_until_opened() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = app_with(&MemoryStore::default());
        assert!(matches!(app.repo(), Err(ConstructError::NoRepository)));
        assert!(matches!(
            app.open_repository(dir.path()),
            Err(ConstructError::NotARepository(_))
        ));
    }

    #[test]
    fn import_replaces_active_tab() {
        use tiny_http::{Header, Response, Server};

        let server = Server::http("127.0.0.1:0").expect("bind");
        let port = server.server_addr().to_ip().expect("ip address").port();
        std::thread::spawn(move || {
            if let Ok(request) = server.recv() {
                let header = Header::from_bytes(&b"Content-Type"[..], &b"text/x-python"[..]).expect("header");
                let _ = request.respond(Response::from_data(b"def main():\r\n    pass\r\n".to_vec()).with_header(header));
            }
        });

        let config = AppConfig {
            fetch: FetchPolicy {
                require_https: false,
                system_proxy: false,
                ..FetchPolicy::default()
            },
            ..AppConfig::default()
        };
        let mut app = App::new(config, Box::new(MemoryStore::default()));
        let id = app.active_id().expect("tab");
        app.import_from_web(&format!("http://127.0.0.1:{port}/src/tool.py")).expect("start");

        let deadline = Instant::now() + WAIT;
        let mut events = Vec::new();
        while events.is_empty() && Instant::now() < deadline {
            events = app.pump_blocking(Duration::from_millis(200));
        }
        assert!(matches!(events.as_slice(), [AppEvent::Imported { .. }]), "{events:?}");
        let surface = app.surface(id).expect("surface");
        assert_eq!(surface.contents(), "def main():\n    pass\n");
        assert_eq!(surface.language, Language::Python);
        assert!(surface.dirty);
    }

    #[test]
    fn status_line_reflects_active_tab() {
        let mut app = app_with(&MemoryStore::default());
        let id = app.active_id().expect("tab");
        app.surface_mut(id).expect("surface").insert(0, "hi");
        assert_eq!(
            app.status_line().as_deref(),
            Some("Line: 1 | Column: 3 | Chars: 2 | Encoding: UTF-8 | Newline: CRLF | Language: Plain Text *")
        );
        assert_eq!(app.tab_labels(), ["*Untitled"]);
        assert!(app.has_unsaved());
    }

    #[test]
    fn saving_while_loading_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("big.txt");
        let other = dir.path().join("copy.txt");
        let original = vec![b'q'; 8 * 1024 * 1024];
        fs::write(&path, &original).expect("write");

        let config = AppConfig {
            reader: ReaderOptions {
                chunk_size: 64 * 1024,
                ..ReaderOptions::default()
            },
            ..AppConfig::default()
        };
        let mut app = App::new(config, Box::new(MemoryStore::default()));
        let id = app.open_file(&path).expect("open");

        assert!(matches!(app.save(id), Err(ConstructError::LoadInProgress)));
        assert!(matches!(app.save_as(id, &other), Err(ConstructError::LoadInProgress)));
        assert!(!other.exists());

        app.wait_for_load(id, WAIT);
        assert_eq!(fs::read(&path).expect("read"), original);
        let surface = app.surface(id).expect("surface");
        assert!(!surface.dirty);
        assert_eq!(surface.text().len_chars(), original.len());
        app.save(id).expect("save after load");
        assert_eq!(fs::read(&path).expect("read").len(), original.len());
    }

    #[test]
    fn plugin_commands_edit_the_active_tab() {
        let mut app = app_with(&MemoryStore::default());
        app.set_plugins(crate::plugins::shout_manager());
        let id = app.active_id().expect("tab");
        app.surface_mut(id).expect("surface").insert(0, "hello");

        app.run_plugin_command("demo.shout").expect("run");
        assert_eq!(app.surface(id).expect("surface").contents(), "HELLO");
        assert_eq!(
            app.pump_blocking(WAIT),
            vec![AppEvent::PluginMessage {
                plugin: "demo".into(),
                message: "shouted".into()
            }]
        );
        assert!(app.pump().is_empty());
        // The manager is handed back after the call.
        assert!(app.plugins().command_names().any(|name| name == "demo.shout"));
    }
}
