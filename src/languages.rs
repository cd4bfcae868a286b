// ── Language detection ────────────────────────────────────────────────────────
//
// Maps file paths to `Language` values, and language tags to highlighter
// implementations.  Rendering is the front end's business; a highlighter only
// classifies byte ranges of a line.

use std::{collections::HashMap, path::Path};

// ── Language enum ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Language {
    PlainText,
    C,
    Cpp,
    Python,
    Rust,
    JavaScript,
    TypeScript,
    Java,
    Lua,
    Ruby,
    Html,
    Xml,
    Css,
    Json,
    Sql,
    Toml,
    Ini,
    Batch,
    Makefile,
    Diff,
    Shell,
    Markdown,
    Yaml,
    PowerShell,
}

impl Language {
    pub(crate) const ALL: [Language; 24] = [
        Language::PlainText,
        Language::C,
        Language::Cpp,
        Language::Python,
        Language::Rust,
        Language::JavaScript,
        Language::TypeScript,
        Language::Java,
        Language::Lua,
        Language::Ruby,
        Language::Html,
        Language::Xml,
        Language::Css,
        Language::Json,
        Language::Sql,
        Language::Toml,
        Language::Ini,
        Language::Batch,
        Language::Makefile,
        Language::Diff,
        Language::Shell,
        Language::Markdown,
        Language::Yaml,
        Language::PowerShell,
    ];

    /// Canonical tag, used as the registry key and in persisted overrides.
    pub(crate) fn tag(self) -> &'static str {
        match self {
            Language::PlainText => "text",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Python => "python",
            Language::Rust => "rust",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Java => "java",
            Language::Lua => "lua",
            Language::Ruby => "ruby",
            Language::Html => "html",
            Language::Xml => "xml",
            Language::Css => "css",
            Language::Json => "json",
            Language::Sql => "sql",
            Language::Toml => "toml",
            Language::Ini => "ini",
            Language::Batch => "batch",
            Language::Makefile => "makefile",
            Language::Diff => "diff",
            Language::Shell => "shell",
            Language::Markdown => "markdown",
            Language::Yaml => "yaml",
            Language::PowerShell => "powershell",
        }
    }

    /// Inverse of `tag`.  Case-insensitive.
    pub(crate) fn from_tag(tag: &str) -> Option<Language> {
        let tag = tag.trim();
        Self::ALL.into_iter().find(|l| l.tag().eq_ignore_ascii_case(tag))
    }

    /// Human-readable name for the status bar.
    pub(crate) fn display_name(self) -> &'static str {
        match self {
            Language::PlainText => "Plain Text",
            Language::C => "C",
            Language::Cpp => "C++",
            Language::Python => "Python",
            Language::Rust => "Rust",
            Language::JavaScript => "JavaScript",
            Language::TypeScript => "TypeScript",
            Language::Java => "Java",
            Language::Lua => "Lua",
            Language::Ruby => "Ruby",
            Language::Html => "HTML",
            Language::Xml => "XML",
            Language::Css => "CSS",
            Language::Json => "JSON",
            Language::Sql => "SQL",
            Language::Toml => "TOML",
            Language::Ini => "INI",
            Language::Batch => "Batch",
            Language::Makefile => "Makefile",
            Language::Diff => "Diff",
            Language::Shell => "Shell",
            Language::Markdown => "Markdown",
            Language::Yaml => "YAML",
            Language::PowerShell => "PowerShell",
        }
    }

    /// Token that starts a comment running to end of line, if the language
    /// has one.
    pub(crate) fn line_comment(self) -> Option<&'static str> {
        match self {
            Language::C
            | Language::Cpp
            | Language::Rust
            | Language::JavaScript
            | Language::TypeScript
            | Language::Java => Some("//"),
            Language::Python
            | Language::Ruby
            | Language::Shell
            | Language::Toml
            | Language::Yaml
            | Language::Makefile
            | Language::PowerShell => Some("#"),
            Language::Lua | Language::Sql => Some("--"),
            Language::Ini => Some(";"),
            Language::Batch => Some("REM "),
            _ => None,
        }
    }
}

// ── Language detection ────────────────────────────────────────────────────────

/// Detect the language from a file path by inspecting the filename and
/// extension.  Returns `Language::PlainText` when no match is found.
pub(crate) fn language_from_path(path: &Path) -> Language {
    // Check extension-less special filenames first.
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        match name {
            "Makefile" | "GNUmakefile" | "makefile" => return Language::Makefile,
            "Gemfile" | "Rakefile" => return Language::Ruby,
            _ => {}
        }
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("c") | Some("h") => Language::C,
        Some("cpp") | Some("cc") | Some("cxx") | Some("hpp") | Some("hh") | Some("hxx")
        | Some("inl") => Language::Cpp,
        Some("py") | Some("pyw") | Some("pyi") => Language::Python,
        Some("rs") => Language::Rust,
        Some("js") | Some("mjs") | Some("cjs") => Language::JavaScript,
        Some("ts") | Some("mts") | Some("cts") => Language::TypeScript,
        Some("java") => Language::Java,
        Some("lua") => Language::Lua,
        Some("rb") | Some("rake") | Some("gemspec") => Language::Ruby,
        Some("html") | Some("htm") | Some("xhtml") | Some("shtml") => Language::Html,
        Some("xml") | Some("xsl") | Some("xslt") | Some("svg") | Some("xaml") | Some("csproj")
        | Some("vbproj") => Language::Xml,
        Some("css") | Some("scss") | Some("less") => Language::Css,
        Some("json") | Some("jsonc") => Language::Json,
        Some("sql") => Language::Sql,
        Some("toml") => Language::Toml,
        Some("ini") | Some("cfg") | Some("conf") | Some("properties") | Some("editorconfig") => {
            Language::Ini
        }
        Some("bat") | Some("cmd") => Language::Batch,
        Some("mk") | Some("mak") => Language::Makefile,
        Some("diff") | Some("patch") => Language::Diff,
        Some("sh") | Some("bash") | Some("zsh") | Some("ksh") | Some("ash") => Language::Shell,
        Some("md") | Some("markdown") | Some("mdown") | Some("mkd") => Language::Markdown,
        Some("yaml") | Some("yml") => Language::Yaml,
        Some("ps1") | Some("psm1") | Some("psd1") => Language::PowerShell,
        _ => Language::PlainText,
    }
}

// ── Highlighters ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Keyword,
    Comment,
}

impl TokenKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            TokenKind::Keyword => "keyword",
            TokenKind::Comment => "comment",
        }
    }
}

/// A classified byte range within one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) kind: TokenKind,
}

/// One lexer.  Implementations must tolerate arbitrary text.
pub(crate) trait Highlighter: Send + Sync {
    fn language(&self) -> Language;

    /// Spans for a single line, in order, non-overlapping.  Unclassified text
    /// has no span.
    fn highlight_line(&self, line: &str) -> Vec<Span>;
}

/// The fallback: classifies nothing.
#[derive(Debug, Default)]
pub(crate) struct PlainText;

impl Highlighter for PlainText {
    fn language(&self) -> Language {
        Language::PlainText
    }

    fn highlight_line(&self, _line: &str) -> Vec<Span> {
        Vec::new()
    }
}

/// Keyword and line-comment lexer driven by the tables below.
#[derive(Debug)]
pub(crate) struct KeywordHighlighter {
    language: Language,
    words: Vec<&'static str>,
    case_insensitive: bool,
}

impl KeywordHighlighter {
    /// `None` when `language` has no keyword table.
    pub(crate) fn new(language: Language) -> Option<Self> {
        let table = keywords(language);
        if table.is_empty() {
            return None;
        }
        let mut words: Vec<&'static str> = table.iter().flat_map(|set| set.split_whitespace()).collect();
        words.sort_unstable();
        words.dedup();
        Some(Self {
            language,
            words,
            case_insensitive: matches!(language, Language::Sql | Language::PowerShell | Language::Batch),
        })
    }

    fn is_keyword(&self, word: &str) -> bool {
        if self.case_insensitive {
            self.words.iter().any(|w| w.eq_ignore_ascii_case(word))
        } else {
            self.words.binary_search(&word).is_ok()
        }
    }
}

impl Highlighter for KeywordHighlighter {
    fn language(&self) -> Language {
        self.language
    }

    fn highlight_line(&self, line: &str) -> Vec<Span> {
        let code_end = self
            .language
            .line_comment()
            .and_then(|marker| line.find(marker))
            .unwrap_or(line.len());

        let mut spans = Vec::new();
        let mut word_start: Option<usize> = None;
        for (i, ch) in line[..code_end].char_indices().chain(std::iter::once((code_end, ' '))) {
            let is_word = ch.is_alphanumeric() || ch == '_';
            match (word_start, is_word) {
                (None, true) => word_start = Some(i),
                (Some(start), false) => {
                    if self.is_keyword(&line[start..i]) {
                        spans.push(Span {
                            start,
                            end: i,
                            kind: TokenKind::Keyword,
                        });
                    }
                    word_start = None;
                }
                _ => {}
            }
        }

        if code_end < line.len() {
            spans.push(Span {
                start: code_end,
                end: line.len(),
                kind: TokenKind::Comment,
            });
        }
        spans
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Maps language tags to highlighter instances.  Unknown tags and languages
/// without a registered highlighter resolve to `PlainText`.
pub(crate) struct LexerRegistry {
    by_tag: HashMap<&'static str, Box<dyn Highlighter>>,
    fallback: PlainText,
}

impl LexerRegistry {
    pub(crate) fn empty() -> Self {
        Self {
            by_tag: HashMap::new(),
            fallback: PlainText,
        }
    }

    /// A registry with a keyword highlighter for every language that has a
    /// keyword table.
    pub(crate) fn with_builtin() -> Self {
        let mut registry = Self::empty();
        for language in Language::ALL {
            if let Some(h) = KeywordHighlighter::new(language) {
                registry.register(Box::new(h));
            }
        }
        registry
    }

    /// Install or replace the highlighter for its language's tag.
    pub(crate) fn register(&mut self, highlighter: Box<dyn Highlighter>) {
        self.by_tag.insert(highlighter.language().tag(), highlighter);
    }

    pub(crate) fn resolve(&self, tag: &str) -> &dyn Highlighter {
        match self.by_tag.get(tag) {
            Some(h) => h.as_ref(),
            None => &self.fallback,
        }
    }
}

// ── Keyword lists ─────────────────────────────────────────────────────────────

/// Whitespace-separated keyword sets for `lang`.  Languages without keyword
/// sets return an empty slice.
pub(crate) fn keywords(lang: Language) -> &'static [&'static str] {
    match lang {
        Language::C => C_KEYWORDS,
        Language::Cpp => CPP_KEYWORDS,
        Language::JavaScript => JS_KEYWORDS,
        Language::TypeScript => TS_KEYWORDS,
        Language::Python => PY_KEYWORDS,
        Language::Rust => RUST_KEYWORDS,
        Language::Java => JAVA_KEYWORDS,
        Language::Lua => LUA_KEYWORDS,
        Language::Ruby => RUBY_KEYWORDS,
        Language::Sql => SQL_KEYWORDS,
        Language::PowerShell => PS_KEYWORDS,
        _ => &[],
    }
}

// ── Keyword tables ────────────────────────────────────────────────────────────

static C_KEYWORDS: &[&str] = &["auto break case char const continue default do double else enum extern \
float for goto if inline int long register restrict return short signed sizeof \
static struct switch typedef union unsigned void volatile while _Bool _Complex \
_Imaginary"];

static CPP_KEYWORDS: &[&str] = &[
    "alignas alignof and and_eq asm auto bitand bitor bool break case catch char \
char8_t char16_t char32_t class compl concept const consteval constexpr constinit \
const_cast continue co_await co_return co_yield decltype default delete do double \
dynamic_cast else enum explicit export extern false float for friend goto if \
inline int long mutable namespace new noexcept not not_eq nullptr operator or \
or_eq private protected public register reinterpret_cast requires return short \
signed sizeof static static_assert static_cast struct switch template this \
thread_local throw true try typedef typeid typename union unsigned using virtual \
void volatile wchar_t while xor xor_eq",
    "int8_t int16_t int32_t int64_t uint8_t uint16_t uint32_t uint64_t \
size_t ssize_t ptrdiff_t intptr_t uintptr_t nullptr_t",
];

static JS_KEYWORDS: &[&str] = &["break case catch class const continue debugger default delete do else export \
extends false finally for function if import in instanceof let new null of return \
static super switch this throw true try typeof undefined var void while with yield \
async await"];

static TS_KEYWORDS: &[&str] = &["abstract any as async await boolean break case catch class const constructor \
continue declare default delete do else enum export extends false finally for \
from function get if implements import in infer instanceof interface is keyof \
let module namespace never new null number object of override private protected \
public readonly return set static string super switch symbol this throw true try \
type typeof undefined unique unknown var void while with yield"];

static PY_KEYWORDS: &[&str] = &["False None True and as assert async await break class continue def del elif \
else except finally for from global if import in is lambda nonlocal not or pass \
raise return try while with yield"];

static RUST_KEYWORDS: &[&str] = &[
    "as async await break const continue crate dyn else enum extern false fn for \
if impl in let loop match mod move mut pub ref return self Self static struct \
super trait true type union unsafe use where while",
    "bool char f32 f64 i8 i16 i32 i64 i128 isize str u8 u16 u32 u64 u128 usize \
String Vec Option Result Box Rc Arc HashMap HashSet",
];

static JAVA_KEYWORDS: &[&str] = &["abstract assert boolean break byte case catch char class const continue \
default do double else enum extends final finally float for goto if implements \
import instanceof int interface long native new package private protected public \
record return sealed short static strictfp super switch synchronized this throw \
throws transient try var void volatile while yield true false null"];

static LUA_KEYWORDS: &[&str] = &["and break do else elseif end false for function goto if in local nil not or \
repeat return then true until while"];

static RUBY_KEYWORDS: &[&str] = &["BEGIN END alias and begin break case class def defined? do else elsif end \
ensure false for if in module next nil not or redo rescue retry return self super \
then true undef unless until when while yield"];

static SQL_KEYWORDS: &[&str] = &["ADD ALL ALTER AND AS ASC BETWEEN BY CASE CHECK COLUMN CONSTRAINT CREATE \
CROSS DATABASE DEFAULT DELETE DESC DISTINCT DROP ELSE END EXCEPT EXISTS FOREIGN \
FROM FULL GROUP HAVING IN INDEX INNER INSERT INTERSECT INTO IS JOIN KEY LEFT LIKE \
LIMIT NOT NULL ON OR ORDER OUTER PRIMARY REFERENCES RIGHT ROLLBACK SELECT SET \
TABLE TOP TRUNCATE UNION UNIQUE UPDATE VALUES VIEW WHERE WITH"];

static PS_KEYWORDS: &[&str] = &["begin break catch class continue data define do dynamicparam else elseif end \
exit filter finally for foreach from function hidden if in inlinescript parallel \
param pipeline process return sequence switch throw trap try until using var \
while workflow"];

// ── Tests ─────────────────────────────────────────────────────────────────────
