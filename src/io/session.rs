// ── Load session manager ──────────────────────────────────────────────────────
//
// Binds streaming reads to editing surfaces.
//
// Threading model:
//   • Every load runs `reader::stream_file` on its own worker thread.
//   • Workers only ever send immutable `LoadEvent`s over one unbounded,
//     ordered channel; the control thread drains it and calls `apply`.
//   • There is no mid-read cancellation.  A superseded or abandoned worker
//     runs to completion (or to its I/O failure) and its events are dropped by
//     the generation/path check in `apply`.  The price is at most one wasted
//     full read per rapid re-open; no interruption primitive is needed.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use super::reader::{self, ReadEvent, ReaderOptions};
use crate::editor::{EditingSurface, SurfaceId};

/// Upper bound on how long closing a tab waits for its load worker.
pub(crate) const CLOSE_WAIT: Duration = Duration::from_secs(2);

// ── Messages ──────────────────────────────────────────────────────────────────

/// A `ReadEvent` tagged with where it is allowed to land.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LoadEvent {
    pub(crate) surface: SurfaceId,
    /// The surface generation when this load started.
    pub(crate) generation: u64,
    /// Normalised path the worker is reading.
    pub(crate) path: PathBuf,
    pub(crate) kind: ReadEvent,
}

/// What `apply` did with an event, so the caller can update the rest of the
/// UI (title, recent files, error dialog).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LoadOutcome {
    /// The surface has moved on (newer load, Save As, or edit); ignored.
    Dropped,
    Started,
    Appended,
    Finished { path: PathBuf },
    Failed { path: PathBuf, message: String },
}

// ── LoadHandle ────────────────────────────────────────────────────────────────

/// The surface's reference to its running worker.
pub(crate) struct LoadHandle {
    generation: u64,
    path: PathBuf,
    /// Disconnects when the worker thread exits.
    done: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl fmt::Debug for LoadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadHandle")
            .field("generation", &self.generation)
            .field("path", &self.path)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl LoadHandle {
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Block for at most `timeout` until the worker exits, then join it.
    ///
    /// Returns `false` if the worker was still running when the wait ran out;
    /// the thread is then detached and its remaining events are dropped on
    /// arrival.
    pub(crate) fn wait(mut self, timeout: Duration) -> bool {
        let finished = match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        };
        if finished {
            if let Some(thread) = self.thread.take() {
                let _ = thread.join();
            }
        }
        finished
    }
}

// ── LoadSessionManager ────────────────────────────────────────────────────────

pub(crate) struct LoadSessionManager {
    tx: Sender<LoadEvent>,
    rx: Receiver<LoadEvent>,
    options: ReaderOptions,
    close_wait: Duration,
}

impl LoadSessionManager {
    pub(crate) fn new(options: ReaderOptions, close_wait: Duration) -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            tx,
            rx,
            options,
            close_wait,
        }
    }

    /// The control thread drains this and passes each event to `apply`.
    pub(crate) fn events(&self) -> &Receiver<LoadEvent> {
        &self.rx
    }

    /// Start streaming `path` into `surface`.  Returns the new generation.
    ///
    /// `path` must already be normalised (see `io::normalize_path`); it becomes
    /// the surface's bound path.  Any previous load is forgotten without
    /// being joined.
    pub(crate) fn start(&self, id: SurfaceId, surface: &mut EditingSurface, path: PathBuf) -> u64 {
        surface.generation += 1;
        let generation = surface.generation;
        surface.path = Some(path.clone());

        if let Some(previous) = surface.active_load.take() {
            log::debug!(
                "load #{} of {} superseded by #{generation}",
                previous.generation,
                previous.path.display()
            );
        }

        let tx = self.tx.clone();
        let (done_tx, done_rx) = channel::bounded::<()>(0);
        let options = self.options;
        let worker_path = path.clone();
        let spawned = thread::Builder::new()
            .name(format!("load-{generation}"))
            .spawn(move || {
                let _done = done_tx;
                run_load(id, generation, worker_path, options, tx);
            });

        match spawned {
            Ok(thread) => {
                log::debug!("load #{generation} of {} started", path.display());
                surface.active_load = Some(LoadHandle {
                    generation,
                    path,
                    done: done_rx,
                    thread: Some(thread),
                });
            }
            Err(e) => {
                log::error!("could not spawn load worker: {e}");
                let _ = self.tx.send(LoadEvent {
                    surface: id,
                    generation,
                    path,
                    kind: ReadEvent::Failed(format!("could not start loading: {e}")),
                });
            }
        }
        generation
    }

    /// `true` if `event` still belongs to `surface`'s current load.
    pub(crate) fn is_current(surface: &EditingSurface, event: &LoadEvent) -> bool {
        surface.generation == event.generation && surface.path.as_deref() == Some(event.path.as_path())
    }

    /// Apply one worker event to its surface, or drop it if stale.
    pub(crate) fn apply(surface: &mut EditingSurface, event: LoadEvent) -> LoadOutcome {
        if !Self::is_current(surface, &event) {
            log::trace!(
                "dropping stale event for load #{} (surface at #{})",
                event.generation,
                surface.generation
            );
            return LoadOutcome::Dropped;
        }

        match event.kind {
            ReadEvent::Started(detection) => {
                surface.begin_stream(&detection);
                LoadOutcome::Started
            }
            ReadEvent::Chunk {
                text,
                is_last: false,
            } => {
                surface.append_loaded(&text);
                LoadOutcome::Appended
            }
            ReadEvent::Chunk { text, is_last: true } => {
                surface.append_loaded(&text);
                surface.finish_stream();
                surface.active_load = None;
                log::info!("loaded {}", event.path.display());
                LoadOutcome::Finished { path: event.path }
            }
            ReadEvent::Failed(message) => {
                surface.abort_stream();
                surface.active_load = None;
                log::error!("{message}");
                LoadOutcome::Failed {
                    path: event.path,
                    message,
                }
            }
        }
    }

    /// Detach `surface` from its worker before the surface is destroyed.
    ///
    /// Waits up to the configured close timeout; returns immediately when no
    /// load is active or the worker has already exited.
    pub(crate) fn release(&self, surface: &mut EditingSurface) {
        if let Some(handle) = surface.active_load.take() {
            let generation = handle.generation;
            if !handle.wait(self.close_wait) {
                log::warn!("load #{generation} still running after {:?}; detaching", self.close_wait);
            }
        }
    }
}

/// Worker body.  Every outcome, including a panic in the reader, leaves the
/// thread as a message.
fn run_load(id: SurfaceId, generation: u64, path: PathBuf, options: ReaderOptions, tx: Sender<LoadEvent>) {
    let mut emit = |kind: ReadEvent| {
        // The receiver only disappears at shutdown.
        let _ = tx.send(LoadEvent {
            surface: id,
            generation,
            path: path.clone(),
            kind,
        });
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        reader::stream_file(&path, options, &mut emit);
    }));

    if result.is_err() {
        log::error!("load worker for {} panicked", path.display());
        emit(ReadEvent::Failed(
            "Internal error: load worker panicked unexpectedly".to_owned(),
        ));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::detect::{DetectionResult, Newline};
    use encoding_rs::UTF_8;
    use slotmap::SlotMap;

    const WAIT: Duration = Duration::from_secs(10);

    fn manager() -> LoadSessionManager {
        LoadSessionManager::new(ReaderOptions::default(), CLOSE_WAIT)
    }

    fn started(newline: Newline) -> ReadEvent {
        ReadEvent::Started(DetectionResult {
            encoding: UTF_8,
            confidence: 1.0,
            newline,
            bom_len: 0,
        })
    }

    fn chunk(text: &str, is_last: bool) -> ReadEvent {
        ReadEvent::Chunk {
            text: text.to_owned(),
            is_last,
        }
    }

    fn event(id: SurfaceId, generation: u64, path: &Path, kind: ReadEvent) -> LoadEvent {
        LoadEvent {
            surface: id,
            generation,
            path: path.to_path_buf(),
            kind,
        }
    }

    /// Drain events until every generation in `gens` has terminated.
    fn drain_until_done(manager: &LoadSessionManager, gens: &[u64]) -> Vec<LoadEvent> {
        let mut pending: Vec<u64> = gens.to_vec();
        let mut out = Vec::new();
        while !pending.is_empty() {
            let ev = manager.events().recv_timeout(WAIT).expect("load event");
            let terminal = matches!(
                ev.kind,
                ReadEvent::Failed(_) | ReadEvent::Chunk { is_last: true, .. }
            );
            if terminal {
                pending.retain(|g| *g != ev.generation);
            }
            out.push(ev);
        }
        out
    }

    #[test]
    fn stale_generation_is_dropped() {
        let mut surfaces = SlotMap::with_key();
        let path = PathBuf::from("/work/a.txt");
        let id = surfaces.insert(EditingSurface::with_path(path.clone()));
        let surface = &mut surfaces[id];
        surface.generation = 2;

        let outcome = LoadSessionManager::apply(surface, event(id, 1, &path, started(Newline::Lf)));
        assert_eq!(outcome, LoadOutcome::Dropped);
        assert_eq!(surface.newline, Newline::Crlf);

        let outcome = LoadSessionManager::apply(surface, event(id, 1, &path, chunk("stale", false)));
        assert_eq!(outcome, LoadOutcome::Dropped);
        assert_eq!(surface.contents(), "");
    }

    #[test]
    fn redirected_path_is_dropped() {
        let mut surfaces = SlotMap::with_key();
        let id = surfaces.insert(EditingSurface::with_path(PathBuf::from("/work/new.txt")));
        let surface = &mut surfaces[id];
        surface.generation = 1;

        let old = PathBuf::from("/work/old.txt");
        let outcome = LoadSessionManager::apply(surface, event(id, 1, &old, chunk("x", false)));
        assert_eq!(outcome, LoadOutcome::Dropped);
    }

    #[test]
    fn delayed_first_load_never_lands() {
        let mut surfaces = SlotMap::with_key();
        let path = PathBuf::from("/work/a.txt");
        let id = surfaces.insert(EditingSurface::with_path(path.clone()));
        let surface = &mut surfaces[id];

        // Two loads were started; the surface is at generation 2.
        surface.generation = 2;

        // Fast second load arrives first …
        for kind in [started(Newline::Lf), chunk("second\n", false), chunk("", true)] {
            assert_ne!(
                LoadSessionManager::apply(surface, event(id, 2, &path, kind)),
                LoadOutcome::Dropped
            );
        }
        // … then the slow first one.
        for kind in [started(Newline::Cr), chunk("first\n", false), chunk("", true)] {
            assert_eq!(
                LoadSessionManager::apply(surface, event(id, 1, &path, kind)),
                LoadOutcome::Dropped
            );
        }

        assert_eq!(surface.contents(), "second\n");
        assert_eq!(surface.newline, Newline::Lf);
        assert!(!surface.dirty);
    }

    #[test]
    fn second_real_load_supersedes_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = dir.path().join("first.txt");
        let second = dir.path().join("second.txt");
        std::fs::write(&first, "first\r\n").expect("write");
        std::fs::write(&second, "second\n").expect("write");

        let manager = manager();
        let mut surfaces = SlotMap::with_key();
        let id = surfaces.insert(EditingSurface::new_untitled());

        let g1 = manager.start(id, &mut surfaces[id], first.clone());
        let g2 = manager.start(id, &mut surfaces[id], second.clone());
        assert_eq!((g1, g2), (1, 2));

        let events = drain_until_done(&manager, &[g1, g2]);
        let (mut late, mut early): (Vec<_>, Vec<_>) = events.into_iter().partition(|e| e.generation == g1);
        // Deliver the second load's events first, then the first load's.
        early.append(&mut late);

        let surface = &mut surfaces[id];
        for ev in early {
            let from_first = ev.generation == g1;
            let outcome = LoadSessionManager::apply(surface, ev);
            if from_first {
                assert_eq!(outcome, LoadOutcome::Dropped);
            }
        }

        assert_eq!(surface.contents(), "second\n");
        assert_eq!(surface.newline, Newline::Lf);
        assert_eq!(surface.path.as_deref(), Some(second.as_path()));
        assert!(surface.active_load.is_none());
        assert!(!surface.dirty);
    }

    #[test]
    fn finished_load_reports_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "line1\r\nline2\r\n").expect("write");

        let manager = manager();
        let mut surfaces = SlotMap::with_key();
        let id = surfaces.insert(EditingSurface::new_untitled());
        let g = manager.start(id, &mut surfaces[id], path.clone());

        let mut last = LoadOutcome::Dropped;
        for ev in drain_until_done(&manager, &[g]) {
            last = LoadSessionManager::apply(&mut surfaces[id], ev);
        }
        assert_eq!(last, LoadOutcome::Finished { path });
        let surface = &surfaces[id];
        assert_eq!(surface.contents(), "line1\nline2\n");
        assert_eq!(surface.newline, Newline::Crlf);
        assert_eq!(surface.encoding_name(), "UTF-8");
    }

    #[test]
    fn failed_reload_keeps_existing_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gone.txt");

        let manager = manager();
        let mut surfaces = SlotMap::with_key();
        let id = surfaces.insert(EditingSurface::with_path(path.clone()));
        surfaces[id].append_loaded("still here");

        let g = manager.start(id, &mut surfaces[id], path.clone());
        let events = drain_until_done(&manager, &[g]);
        assert_eq!(events.len(), 1);

        let outcome = LoadSessionManager::apply(&mut surfaces[id], events.into_iter().next().expect("event"));
        assert!(matches!(outcome, LoadOutcome::Failed { .. }));
        assert_eq!(surfaces[id].contents(), "still here");
        assert!(surfaces[id].active_load.is_none());
    }

    #[test]
    fn failure_after_start_restores_prior_content() {
        let mut surfaces = SlotMap::with_key();
        let path = PathBuf::from("/work/a.txt");
        let id = surfaces.insert(EditingSurface::with_path(path.clone()));
        let surface = &mut surfaces[id];
        surface.append_loaded("before");
        surface.generation = 1;

        LoadSessionManager::apply(surface, event(id, 1, &path, started(Newline::Lf)));
        LoadSessionManager::apply(surface, event(id, 1, &path, chunk("half", false)));
        let outcome =
            LoadSessionManager::apply(surface, event(id, 1, &path, ReadEvent::Failed("disk gone".into())));

        assert_eq!(
            outcome,
            LoadOutcome::Failed {
                path: path.clone(),
                message: "disk gone".into()
            }
        );
        assert_eq!(surface.contents(), "before");
        assert_eq!(surface.newline, Newline::Crlf);
    }

    #[test]
    fn user_edit_during_load_wins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "from disk\n").expect("write");

        let manager = manager();
        let mut surfaces = SlotMap::with_key();
        let id = surfaces.insert(EditingSurface::new_untitled());
        let g = manager.start(id, &mut surfaces[id], path);

        surfaces[id].insert(0, "typed");
        assert!(surfaces[id].active_load.is_none());
        assert_eq!(surfaces[id].generation, g + 1);

        for ev in drain_until_done(&manager, &[g]) {
            assert_eq!(LoadSessionManager::apply(&mut surfaces[id], ev), LoadOutcome::Dropped);
        }
        assert_eq!(surfaces[id].contents(), "typed");
        assert!(surfaces[id].dirty);
    }

    #[test]
    fn release_waits_for_worker() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "x".repeat(4096)).expect("write");

        let manager = manager();
        let mut surfaces = SlotMap::with_key();
        let id = surfaces.insert(EditingSurface::new_untitled());
        manager.start(id, &mut surfaces[id], path);

        manager.release(&mut surfaces[id]);
        assert!(surfaces[id].active_load.is_none());
        surfaces.remove(id);

        // Events that were already queued refer to a key that no longer
        // resolves.
        while let Ok(ev) = manager.events().try_recv() {
            assert!(surfaces.get(ev.surface).is_none());
        }
    }

    #[test]
    fn release_without_load_returns_immediately() {
        let manager = manager();
        let mut surface = EditingSurface::new_untitled();
        manager.release(&mut surface);
        assert!(surface.active_load.is_none());
    }
}
