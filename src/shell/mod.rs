// ── Line-command front end ────────────────────────────────────────────────────
//
// A minimal driver for `App`: one command per input line, results and worker
// notifications written to `out`.  Generic over the streams so tests can run
// it against in-memory buffers.

use std::{
    io::{BufRead, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    app::{App, AppEvent, CloseOutcome},
    error::{ConstructError, Result},
    explorer::EntryKind,
    io::save::ALTERNATE_ENCODINGS,
    search::SearchOptions,
};

/// How long `open` and `reload` wait for the load before returning the prompt.
const LOAD_WAIT: Duration = Duration::from_secs(30);
/// How long `import` waits for the fetch.
const IMPORT_WAIT: Duration = Duration::from_secs(20);

const HELP: &str = "\
commands:
  open <path>            reload                 new
  save                   saveas <path>          encoding <label>
  close[!]               tabs                   switch <n>
  insert <text>          goto <line>            show
  find <text>            replace <from> <to>    replaceall <from> <to>
  recent                 openrecent <n>         clearrecent
  lang [tag|-]           highlight [line]       status
  import <url>
  ls [dir]               mkfile <dir> <name>    mkdir <dir> <name>
  git open <dir> | status | add | commit <msg> | fetch | pull | push
      | checkout <branch> | log | diff
  plugins                run <command>          quit[!]";

enum Flow {
    Continue,
    Quit,
}

/// Read commands from `input` until EOF or `quit`.
pub(crate) fn run(app: &mut App, input: impl BufRead, mut out: impl Write) -> std::io::Result<()> {
    writeln!(out, "{}", app.window_title())?;
    let mut quit = false;
    for line in input.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let flow = match execute(app, line, &mut out) {
            Ok(flow) => flow,
            Err(e) => {
                log::debug!("command {line:?} failed: {e}");
                writeln!(out, "error: {e}")?;
                if matches!(e, ConstructError::Unencodable { .. }) {
                    writeln!(out, "try: encoding <{}>", ALTERNATE_ENCODINGS.join("|"))?;
                }
                Flow::Continue
            }
        };
        report(&app.pump(), &mut out)?;
        if let Flow::Quit = flow {
            quit = true;
            break;
        }
    }
    if !quit && app.has_unsaved() {
        log::warn!("input ended with unsaved changes");
        writeln!(out, "warning: unsaved changes discarded")?;
    }
    Ok(())
}

fn report(events: &[AppEvent], out: &mut impl Write) -> std::io::Result<()> {
    for event in events {
        match event {
            AppEvent::Loaded { path, .. } => writeln!(out, "loaded {}", path.display())?,
            AppEvent::LoadFailed { message, .. } => writeln!(out, "load failed: {message}")?,
            AppEvent::Imported { url, .. } => writeln!(out, "imported {url}")?,
            AppEvent::ImportFailed { message } => writeln!(out, "import failed: {message}")?,
            AppEvent::PluginMessage { plugin, message } => writeln!(out, "[{plugin}] {message}")?,
        }
    }
    Ok(())
}

fn active(app: &App) -> Result<crate::editor::SurfaceId> {
    app.active_id().ok_or(ConstructError::NoSuchSurface)
}

/// Split off the first word; the rest is returned trimmed.
fn split_word(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (s, ""),
    }
}

fn index_arg(arg: &str) -> Result<usize> {
    arg.parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .ok_or_else(|| ConstructError::InvalidName(arg.to_owned()))
}

fn execute(app: &mut App, line: &str, out: &mut impl Write) -> Result<Flow> {
    let (command, rest) = split_word(line);
    match command {
        "help" | "?" => writeln!(out, "{HELP}")?,
        "quit" | "exit" | "quit!" | "exit!" => {
            if !command.ends_with('!') && app.has_unsaved() {
                writeln!(out, "unsaved changes; use quit! to discard")?;
            } else {
                return Ok(Flow::Quit);
            }
        }

        // ── Files ─────────────────────────────────────────────────────────────
        "open" => {
            let id = app.open_file(Path::new(rest))?;
            report(&app.wait_for_load(id, LOAD_WAIT), out)?;
            writeln!(out, "{}", app.window_title())?;
        }
        "reload" => {
            let id = active(app)?;
            app.reload(id)?;
            report(&app.wait_for_load(id, LOAD_WAIT), out)?;
        }
        "new" => {
            app.new_file();
            writeln!(out, "{}", app.window_title())?;
        }
        "save" => {
            app.save(active(app)?)?;
            writeln!(out, "saved")?;
        }
        "saveas" => {
            app.save_as(active(app)?, Path::new(rest))?;
            writeln!(out, "{}", app.window_title())?;
        }
        "encoding" => {
            app.save_with_encoding(active(app)?, rest)?;
            writeln!(out, "saved as {rest}")?;
        }
        "close" | "close!" => match app.close_tab(active(app)?, command == "close!")? {
            CloseOutcome::Closed => writeln!(out, "{}", app.window_title())?,
            CloseOutcome::NeedsConfirmation => writeln!(out, "unsaved changes; use close! to discard")?,
        },

        // ── Tabs & buffer ─────────────────────────────────────────────────────
        "tabs" => {
            let current = app.active_id();
            for (n, (id, label)) in app.tabs().iter().zip(app.tab_labels()).enumerate() {
                let marker = if Some(*id) == current { ">" } else { " " };
                writeln!(out, "{marker}{} {label}", n + 1)?;
            }
        }
        "switch" => {
            let n = index_arg(rest)?;
            let id = *app.tabs().get(n).ok_or(ConstructError::NoSuchSurface)?;
            app.set_active(id)?;
            writeln!(out, "{}", app.window_title())?;
        }
        "insert" => {
            let surface = app.surface_mut(active(app)?)?;
            let at = surface.cursor();
            surface.insert(at, &rest.replace("\\n", "\n"));
        }
        "goto" => {
            let line = index_arg(rest)?;
            let surface = app.surface_mut(active(app)?)?;
            let text = surface.text();
            let target = text.line_to_char(line.min(text.len_lines().saturating_sub(1)));
            surface.set_cursor(target);
        }
        "show" => write!(out, "{}", app.surface(active(app)?)?.contents())?,
        "status" => {
            if let Some(status) = app.status_line() {
                writeln!(out, "{status}")?;
            }
        }

        // ── Search ────────────────────────────────────────────────────────────
        "find" => {
            let id = active(app)?;
            let found = if rest.is_empty() {
                app.find_again(id)?
            } else {
                app.find_next(id, SearchOptions::new(rest))?
            };
            match found {
                Some(m) => writeln!(out, "found at {}..{}", m.start, m.end)?,
                None => writeln!(out, "not found")?,
            }
        }
        "replace" | "replaceall" => {
            let (from, to) = split_word(rest);
            let options = SearchOptions::new(from);
            let id = active(app)?;
            if command == "replace" {
                match app.replace(id, &options, to)? {
                    Some(_) => writeln!(out, "replaced 1")?,
                    None => writeln!(out, "not found")?,
                }
            } else {
                writeln!(out, "replaced {}", app.replace_all(id, &options, to)?)?;
            }
        }

        // ── Recent files & language ───────────────────────────────────────────
        "recent" => {
            for (n, path) in app.recent_files().iter().enumerate() {
                writeln!(out, "{} {}", n + 1, path.display())?;
            }
        }
        "openrecent" => {
            let n = index_arg(rest)?;
            let path = app
                .recent_files()
                .get(n)
                .cloned()
                .ok_or_else(|| ConstructError::InvalidName(rest.to_owned()))?;
            let id = app.open_recent(&path)?;
            report(&app.wait_for_load(id, LOAD_WAIT), out)?;
        }
        "clearrecent" => app.clear_recent(),
        "lang" => {
            let id = active(app)?;
            match rest {
                "" => {}
                "-" => app.set_language_override(id, None)?,
                tag => app.set_language_override(id, Some(tag))?,
            }
            writeln!(out, "{}", app.surface(id)?.language.display_name())?;
        }
        "highlight" => {
            let id = active(app)?;
            let line = if rest.is_empty() {
                app.surface(id)?.cursor_position().0
            } else {
                index_arg(rest)?
            };
            let spans = app.highlight_line(id, line)?;
            if spans.is_empty() {
                writeln!(out, "no spans")?;
            } else {
                let text = app.surface(id)?.text().line(line).to_string();
                for span in spans {
                    let token = text.get(span.start..span.end).unwrap_or_default();
                    writeln!(out, "{} {}..{} {token:?}", span.kind.as_str(), span.start, span.end)?;
                }
            }
        }

        // ── Import, explorer, git, plugins ────────────────────────────────────
        "import" => {
            app.import_from_web(rest)?;
            let events = app.pump_blocking(IMPORT_WAIT);
            report(&events, out)?;
        }
        "ls" => {
            let dir = if rest.is_empty() { PathBuf::from(".") } else { PathBuf::from(rest) };
            for entry in app.list_dir(&dir)? {
                let suffix = if entry.kind == EntryKind::Folder { "/" } else { "" };
                writeln!(out, "{}{suffix}", entry.name())?;
            }
        }
        "mkfile" => {
            let (dir, name) = split_word(rest);
            let id = app.create_file(Path::new(dir), name)?;
            report(&app.wait_for_load(id, LOAD_WAIT), out)?;
        }
        "mkdir" => {
            let (dir, name) = split_word(rest);
            let created = app.create_dir(Path::new(dir), name)?;
            writeln!(out, "created {}", created.display())?;
        }
        "git" => git(app, rest, out)?,
        "plugins" => {
            for plugin in app.plugins().plugins() {
                writeln!(out, "{} ({})", plugin.name, plugin.path.display())?;
            }
            for failure in app.plugins().failures() {
                writeln!(out, "failed: {failure}")?;
            }
            for name in app.plugins().command_names() {
                writeln!(out, "  {name}")?;
            }
        }
        "run" => app.run_plugin_command(rest)?,

        other => writeln!(out, "unknown command {other:?}; try help")?,
    }
    Ok(Flow::Continue)
}

fn git(app: &mut App, args: &str, out: &mut impl Write) -> Result<()> {
    let (sub, rest) = split_word(args);
    if sub == "open" {
        app.open_repository(Path::new(rest))?;
        if let Some(status) = app.status_line() {
            writeln!(out, "{status}")?;
        }
        return Ok(());
    }
    let repo = app.repo()?;
    let output = match sub {
        "status" => repo.status()?,
        "add" => repo.add_all()?,
        "commit" => repo.commit(rest)?,
        "fetch" => repo.fetch()?,
        "pull" => repo.pull()?,
        "push" => repo.push()?,
        "checkout" => repo.checkout(rest)?,
        "log" => repo.log(20)?,
        "diff" => repo.diff()?,
        other => format!("unknown git command {other:?}"),
    };
    write!(out, "{output}")?;
    if !output.is_empty() && !output.ends_with('\n') {
        writeln!(out)?;
    }
    app.refresh_branch();
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{app::AppConfig, settings::MemoryStore};
    use std::fs;

    fn run_script(app: &mut App, script: &str) -> String {
        let mut out = Vec::new();
        run(app, script.as_bytes(), &mut out).expect("run");
        String::from_utf8(out).expect("utf-8 output")
    }

    fn new_app() -> App {
        App::new(AppConfig::default(), Box::new(MemoryStore::default()))
    }

    #[test]
    fn words_split_on_first_space() {
        assert_eq!(split_word("replace a b c"), ("replace", "a b c"));
        assert_eq!(split_word("tabs"), ("tabs", ""));
        assert!(index_arg("0").is_err());
        assert_eq!(index_arg("2").expect("index"), 1);
    }

    #[test]
    fn open_edit_save_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notes.txt");
        fs::write(&path, b"one\r\ntwo\r\n").expect("write");

        let mut app = new_app();
        let script = format!(
            "open {}\nshow\ngoto 2\ninsert zero\\n\nstatus\nsave\nquit\nshow\n",
            path.display()
        );
        let out = run_script(&mut app, &script);

        assert!(out.contains("loaded "), "{out}");
        assert!(out.contains("Construct - notes.txt"), "{out}");
        assert!(out.contains("one\ntwo\n"), "{out}");
        assert!(out.contains("Line: 3 | Column: 1"), "{out}");
        assert!(out.contains("saved"), "{out}");
        assert_eq!(fs::read(&path).expect("read"), b"one\r\nzero\r\ntwo\r\n");
    }

    #[test]
    fn dirty_close_asks_first() {
        let mut app = new_app();
        let out = run_script(&mut app, "insert draft\nclose\nclose!\ntabs\n");
        assert!(out.contains("unsaved changes"), "{out}");
        assert!(out.ends_with(">1 Untitled\n"), "{out}");
    }

    #[test]
    fn errors_are_reported_and_the_loop_continues() {
        let mut app = new_app();
        let out = run_script(&mut app, "save\nbogus\nlang\n");
        assert!(out.contains("error: the document has no file path"), "{out}");
        assert!(out.contains("unknown command \"bogus\""), "{out}");
        assert!(out.ends_with("Plain Text\n"), "{out}");
    }

    #[test]
    fn replace_all_counts() {
        let mut app = new_app();
        let out = run_script(&mut app, "insert a-a-a\nreplaceall a b\nshow\n");
        assert!(out.contains("replaced 3"), "{out}");
        assert!(out.contains("b-b-b"), "{out}");
    }

    #[test]
    fn quit_guards_unsaved_work() {
        let mut app = new_app();
        let out = run_script(&mut app, "insert draft\nquit\nshow\nquit!\nshow\n");
        assert!(out.contains("unsaved changes; use quit! to discard"), "{out}");
        // `show` after the refused quit still runs; the one after `quit!` does not.
        assert_eq!(out.matches("draft").count(), 1, "{out}");
        assert!(!out.contains("discarded"), "{out}");
    }

    #[test]
    fn end_of_input_warns_about_unsaved_work() {
        let mut app = new_app();
        let out = run_script(&mut app, "insert draft\n");
        assert!(out.ends_with("warning: unsaved changes discarded\n"), "{out}");

        let mut clean = new_app();
        let out = run_script(&mut clean, "tabs\n");
        assert!(!out.contains("warning"), "{out}");
    }

    #[test]
    fn highlight_prints_spans_for_a_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = new_app();
        let script = format!(
            "mkfile {} main.py\ninsert def f(): pass  # done\nhighlight\nhighlight 1\nhighlight 9\n",
            dir.path().display()
        );
        let out = run_script(&mut app, &script);
        assert_eq!(out.matches("keyword 0..3 \"def\"\n").count(), 2, "{out}");
        assert!(out.contains("keyword 9..13 \"pass\"\n"), "{out}");
        assert!(out.contains("comment 15..21 \"# done\"\n"), "{out}");
        assert!(out.contains("no spans\n"), "{out}");
    }

    #[test]
    fn run_reports_plugin_messages() {
        let mut app = new_app();
        app.set_plugins(crate::plugins::shout_manager());
        let out = run_script(&mut app, "insert hey\nrun demo.shout\nshow\nplugins\nquit!\n");
        assert!(out.contains("[demo] shouted\n"), "{out}");
        assert!(out.contains("HEY"), "{out}");
        assert!(out.contains("  demo.shout\n"), "{out}");
    }

    #[test]
    fn explorer_commands() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut app = new_app();
        let script = format!(
            "mkdir {d} src\nmkfile {d}/src lib.rs\nls {d}\nls {d}/src\nlang\n",
            d = dir.path().display()
        );
        let out = run_script(&mut app, &script);
        assert!(out.contains("src/\n"), "{out}");
        assert!(out.contains("lib.rs\n"), "{out}");
        assert!(out.ends_with("Rust\n"), "{out}");
    }

    #[test]
    fn git_without_repository() {
        let mut app = new_app();
        let out = run_script(&mut app, "git status\n");
        assert!(out.contains("no repository is currently open"), "{out}");
    }
}
