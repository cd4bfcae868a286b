// ── Plugins ───────────────────────────────────────────────────────────────────
//
// Native plugins are dynamic libraries in `~/constructplugins`.  Each one
// exports
//
//     int32_t register_plugin(const PluginContext *ctx);
//
// which is called once at startup and returns 0 on success.  Commands it
// registers receive the same kind of context when they run, so both can reach
// the editor through the host callbacks.  Files whose name starts with `_` are
// skipped.  One broken plugin never stops the others.
//
// This module is the only place allowed to use `unsafe`; every block carries
// a `// SAFETY:` comment.
#![allow(unsafe_code)]

use std::{
    collections::BTreeMap,
    ffi::{c_char, c_void, CStr, OsStr},
    fs,
    path::{Path, PathBuf},
    ptr,
};

use libloading::{Library, Symbol};

use crate::error::{ConstructError, Result};

/// Bumped on any incompatible change to `PluginContext`.
pub(crate) const PLUGIN_ABI_VERSION: u32 = 2;

/// Name of the exported entry point, NUL-terminated for `dlsym`.
const ENTRY_SYMBOL: &[u8] = b"register_plugin\0";

// ── Editor access ─────────────────────────────────────────────────────────────

/// What a plugin can do to the running editor.  Implemented by `App`.
pub(crate) trait PluginEditor {
    /// Text of the active tab, or `None` when no tab is open.
    fn active_text(&self) -> Option<String>;
    /// Replace the active tab's text as a user edit.  `false` when no tab is
    /// open.
    fn replace_active_text(&mut self, text: &str) -> bool;
    fn show_message(&mut self, plugin: &str, message: &str);
}

// ── C ABI ─────────────────────────────────────────────────────────────────────

/// Handler for a plugin-registered command.  Returns 0 on success.
pub(crate) type CommandFn = unsafe extern "C" fn(ctx: *const PluginContext, user_data: *mut c_void) -> i32;

type RegisterFn = unsafe extern "C" fn(ctx: *const PluginContext) -> i32;

/// Passed to `register_plugin` and to every command handler.  All pointers
/// are valid only for the duration of that call.
#[repr(C)]
pub(crate) struct PluginContext {
    pub(crate) abi_version: u32,
    /// The host application for this call; pass it back to the callbacks.
    pub(crate) app: *mut c_void,
    pub(crate) log: extern "C" fn(app: *mut c_void, message: *const c_char),
    /// Only succeeds inside `register_plugin`; returns -1 elsewhere.
    pub(crate) register_command: extern "C" fn(
        app: *mut c_void,
        name: *const c_char,
        handler: Option<CommandFn>,
        user_data: *mut c_void,
    ) -> i32,
    /// Copies the active tab's UTF-8 text plus a NUL into `buf` when `cap`
    /// is large enough.  Always returns the text length in bytes.
    pub(crate) get_text: extern "C" fn(app: *mut c_void, buf: *mut c_char, cap: usize) -> usize,
    /// Replaces the active tab's text.  Returns 0 on success.
    pub(crate) replace_text: extern "C" fn(app: *mut c_void, text: *const c_char) -> i32,
    pub(crate) show_message: extern "C" fn(app: *mut c_void, message: *const c_char),
}

// ── Host side ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
struct Command {
    handler: CommandFn,
    user_data: *mut c_void,
}

struct RegisteredCommand {
    plugin: String,
    command: Command,
}

/// What `PluginContext::app` points at during one call into a plugin.
struct HostCall<'a> {
    plugin: &'a str,
    /// Present only while the plugin registers.
    commands: Option<&'a mut BTreeMap<String, RegisteredCommand>>,
    editor: &'a mut dyn PluginEditor,
}

impl HostCall<'_> {
    /// Build the context, call `f` with it, and return `f`'s status.
    fn with_context(&mut self, f: impl FnOnce(&PluginContext) -> i32) -> i32 {
        let ctx = PluginContext {
            abi_version: PLUGIN_ABI_VERSION,
            app: self as *mut HostCall<'_> as *mut c_void,
            log: host_log,
            register_command: host_register_command,
            get_text: host_get_text,
            replace_text: host_replace_text,
            show_message: host_show_message,
        };
        f(&ctx)
    }
}

/// SAFETY contract shared by the callbacks below: a non-null `app` is the
/// `HostCall` set up by `with_context`, alive and not otherwise borrowed for
/// the whole plugin call; strings are NUL-terminated and owned by the plugin.
unsafe fn host_call<'a>(app: *mut c_void) -> Option<&'a mut HostCall<'a>> {
    // SAFETY: see the contract above.
    unsafe { (app as *mut HostCall<'a>).as_mut() }
}

unsafe fn plugin_str(s: *const c_char) -> Option<String> {
    // SAFETY: see the contract above.
    (!s.is_null()).then(|| unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned())
}

extern "C" fn host_log(app: *mut c_void, message: *const c_char) {
    // SAFETY: called by a plugin under the `host_call` contract.
    let (Some(call), Some(message)) = (unsafe { host_call(app) }, unsafe { plugin_str(message) }) else {
        return;
    };
    log::info!("[{}] {message}", call.plugin);
}

extern "C" fn host_register_command(
    app: *mut c_void,
    name: *const c_char,
    handler: Option<CommandFn>,
    user_data: *mut c_void,
) -> i32 {
    // SAFETY: called by a plugin under the `host_call` contract.
    let (Some(call), Some(name), Some(handler)) = (unsafe { host_call(app) }, unsafe { plugin_str(name) }, handler)
    else {
        return -1;
    };
    let plugin = call.plugin;
    let Some(commands) = call.commands.as_deref_mut() else {
        log::warn!("[{plugin}] register_command outside register_plugin ignored");
        return -1;
    };
    let name = name.trim().to_owned();
    if name.is_empty() {
        return -1;
    }
    log::debug!("[{plugin}] registered command {name}");
    commands.insert(
        name,
        RegisteredCommand {
            plugin: plugin.to_owned(),
            command: Command { handler, user_data },
        },
    );
    0
}

extern "C" fn host_get_text(app: *mut c_void, buf: *mut c_char, cap: usize) -> usize {
    // SAFETY: called by a plugin under the `host_call` contract.
    let Some(call) = (unsafe { host_call(app) }) else {
        return 0;
    };
    let text = call.editor.active_text().unwrap_or_default();
    let bytes = text.as_bytes();
    if !buf.is_null() && cap > bytes.len() {
        // SAFETY: the plugin guarantees `buf` is writable for `cap` bytes,
        // and `cap` exceeds the text plus its terminator.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), buf.cast::<u8>(), bytes.len());
            *buf.add(bytes.len()) = 0;
        }
    }
    bytes.len()
}

extern "C" fn host_replace_text(app: *mut c_void, text: *const c_char) -> i32 {
    // SAFETY: called by a plugin under the `host_call` contract.
    let (Some(call), Some(text)) = (unsafe { host_call(app) }, unsafe { plugin_str(text) }) else {
        return -1;
    };
    if call.editor.replace_active_text(&text) {
        0
    } else {
        -1
    }
}

extern "C" fn host_show_message(app: *mut c_void, message: *const c_char) {
    // SAFETY: called by a plugin under the `host_call` contract.
    let (Some(call), Some(message)) = (unsafe { host_call(app) }, unsafe { plugin_str(message) }) else {
        return;
    };
    call.editor.show_message(call.plugin, &message);
}

// ── Manager ───────────────────────────────────────────────────────────────────

pub(crate) struct LoadedPlugin {
    pub(crate) name: String,
    pub(crate) path: PathBuf,
    _library: Library,
}

/// Owns every loaded library.  Commands are declared before `plugins` so
/// their function pointers are dropped before the code they point into.
#[derive(Default)]
pub(crate) struct PluginManager {
    commands: BTreeMap<String, RegisteredCommand>,
    plugins: Vec<LoadedPlugin>,
    failures: Vec<ConstructError>,
}

/// `~/constructplugins`.
pub(crate) fn default_dir() -> Result<PathBuf> {
    let home = etcetera::home_dir().map_err(|e| ConstructError::Io(std::io::Error::other(e.to_string())))?;
    Ok(home.join("constructplugins"))
}

fn is_dynamic_lib(path: &Path) -> bool {
    matches!(
        path.extension().and_then(OsStr::to_str),
        Some("so") | Some("dylib") | Some("dll")
    )
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(OsStr::to_str)
        .is_some_and(|n| n.starts_with('_'))
}

impl PluginManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Scan `dir` (creating it if missing) and load every plugin in it.
    /// Returns how many loaded; failures are kept in `failures()`.
    pub(crate) fn load_dir(&mut self, dir: &Path, editor: &mut dyn PluginEditor) -> Result<usize> {
        fs::create_dir_all(dir)?;
        let mut candidates: Vec<PathBuf> = fs::read_dir(dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && is_dynamic_lib(p) && !is_hidden(p))
            .collect();
        candidates.sort();

        let before = self.plugins.len();
        for path in candidates {
            if let Err(e) = self.load_one(&path, editor) {
                log::warn!("{e}");
                self.failures.push(e);
            }
        }
        Ok(self.plugins.len() - before)
    }

    fn load_one(&mut self, path: &Path, editor: &mut dyn PluginEditor) -> Result<()> {
        let fail = |message: String| ConstructError::Plugin {
            path: path.to_path_buf(),
            message,
        };
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        // SAFETY: loading a library runs its initialisers.  Plugins are code
        // the user placed in their own plugin directory and are trusted as
        // such.
        let library = unsafe { Library::new(path) }.map_err(|e| fail(e.to_string()))?;

        let status = {
            // SAFETY: the symbol type matches the documented entry point
            // signature; the `Symbol` does not outlive `library`.
            let entry: Symbol<RegisterFn> =
                unsafe { library.get(ENTRY_SYMBOL) }.map_err(|e| fail(e.to_string()))?;

            let mut call = HostCall {
                plugin: &name,
                commands: Some(&mut self.commands),
                editor,
            };
            // SAFETY: `ctx` and the `HostCall` it points to outlive the call.
            call.with_context(|ctx| unsafe { entry(ctx) })
        };

        if status != 0 {
            self.commands.retain(|_, c| c.plugin != name);
            return Err(fail(format!("register_plugin returned {status}")));
        }

        log::info!("loaded plugin {name}");
        self.plugins.push(LoadedPlugin {
            name,
            path: path.to_path_buf(),
            _library: library,
        });
        Ok(())
    }

    pub(crate) fn plugins(&self) -> &[LoadedPlugin] {
        &self.plugins
    }

    pub(crate) fn failures(&self) -> &[ConstructError] {
        &self.failures
    }

    pub(crate) fn command_names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    /// Invoke a registered command on the control thread with access to
    /// `editor`.
    pub(crate) fn run_command(&self, name: &str, editor: &mut dyn PluginEditor) -> Result<()> {
        let registered = self.commands.get(name).ok_or_else(|| ConstructError::Plugin {
            path: PathBuf::from(name),
            message: "no such command".to_owned(),
        })?;
        let Command { handler, user_data } = registered.command;
        let mut call = HostCall {
            plugin: &registered.plugin,
            commands: None,
            editor,
        };
        // SAFETY: the handler and its user data were supplied by a plugin
        // whose library is still loaded (owned by `self.plugins`); `ctx`
        // outlives the call.
        let status = call.with_context(|ctx| unsafe { handler(ctx, user_data) });
        if status != 0 {
            return Err(ConstructError::Plugin {
                path: PathBuf::from(&registered.plugin),
                message: format!("command {name} returned {status}"),
            });
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn with_commands(commands: impl IntoIterator<Item = (&'static str, CommandFn, *mut c_void)>) -> Self {
        let commands = commands
            .into_iter()
            .map(|(name, handler, user_data)| {
                (
                    name.to_owned(),
                    RegisteredCommand {
                        plugin: "demo".to_owned(),
                        command: Command { handler, user_data },
                    },
                )
            })
            .collect();
        Self {
            commands,
            ..Self::default()
        }
    }
}

/// A manager holding one `demo.shout` command, for tests elsewhere in the
/// crate.
#[cfg(test)]
pub(crate) fn shout_manager() -> PluginManager {
    PluginManager::with_commands([("demo.shout", tests::shout as CommandFn, ptr::null_mut())])
}

// ── Tests ─────────────────────────────────────────────────────────────────────
