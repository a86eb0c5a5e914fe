//! Template expansion for config files.
//!
//! Supports the subset of EJS that imposter config files use:
//!
//! - `<%- expr %>` - output without escaping
//! - `<%= expr %>` - HTML-escaped output
//! - `<%# comment %>` - dropped
//! - `<%%` - a literal `<%`
//! - `-%>` - closing tag that also swallows the following newline
//!
//! where `expr` is a variable (`filename` is always defined) or one of
//! the calls `stringify(path)`, `inject(path)`, `stringify(filename, path)`
//! and `include(path)`.
//!
//! # Example
//!
//! ```json
//! {
//!   "port": 4545,
//!   "stubs": [{ "responses": [{ "is": { "body": "<%- stringify('body.json') %>" } }] }]
//! }
//! ```
//!
//! Every path is resolved against the directory of the top-level config
//! file, however deeply the include is nested.

use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

/// Include nesting beyond this is treated as a cycle.
pub const MAX_INCLUDE_DEPTH: usize = 32;

/// `name` or `name(args)`, with an optional trailing semicolon.
static EXPR_REGEX: OnceLock<Regex> = OnceLock::new();
/// One call argument followed by a comma or the end of the list.
static ARG_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_expr_regex() -> &'static Regex {
    EXPR_REGEX.get_or_init(|| {
        Regex::new(r"(?s)^\s*([A-Za-z_$][\w$]*)\s*(?:\((.*)\))?\s*;?\s*$").unwrap()
    })
}

fn get_arg_regex() -> &'static Regex {
    ARG_REGEX.get_or_init(|| {
        Regex::new(
            r#"^\s*(?:'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)"|([A-Za-z_$][\w$]*))\s*(,|$)"#,
        )
        .unwrap()
    })
}

/// Errors raised while expanding a template.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("{}: unterminated tag at byte {offset}", file.display())]
    Unterminated { file: PathBuf, offset: usize },
    #[error("{}: unsupported template code `{code}`", file.display())]
    Unsupported { file: PathBuf, code: String },
    #[error("{}: `{name}` is not defined", file.display())]
    UndefinedVariable { file: PathBuf, name: String },
    #[error("{}: unknown function `{name}`", file.display())]
    UnknownFunction { file: PathBuf, name: String },
    #[error("{}: {name}() expects a file path", file.display())]
    BadArguments { file: PathBuf, name: String },
    #[error("No such file: {}", .0.display())]
    IncludeMissing(PathBuf),
    #[error("Failed to read {}: {source}", path.display())]
    IncludeRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Include depth limit ({MAX_INCLUDE_DEPTH}) exceeded at {}", .0.display())]
    TooDeep(PathBuf),
}

/// Context shared by every nested render of one config file.
///
/// Threaded explicitly through each call so includes always resolve against
/// the same root no matter which file is currently being expanded.
#[derive(Debug, Clone)]
pub struct RenderContext {
    root: PathBuf,
    variables: BTreeMap<String, String>,
}

impl RenderContext {
    /// Context rooted at the config file being loaded.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut variables = BTreeMap::new();
        variables.insert("filename".to_string(), root.display().to_string());
        Self { root, variables }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory every include is resolved against.
    pub fn root_dir(&self) -> &Path {
        match self.root.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.root_dir().join(relative)
    }

    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }
}

/// Expand the top-level config text.
pub fn render(source: &str, ctx: &RenderContext) -> Result<String, TemplateError> {
    render_file(source, ctx.root(), ctx, 0)
}

/// Read `relative`, expand it, and return it as the inside of a JSON string
/// literal (surrounding quotes removed; the template supplies them).
pub fn stringify(relative: &str, ctx: &RenderContext) -> Result<String, TemplateError> {
    stringify_at(relative, ctx, 1)
}

fn stringify_at(relative: &str, ctx: &RenderContext, depth: usize) -> Result<String, TemplateError> {
    let rendered = include_at(relative, ctx, depth)?;
    // U+FEFF counts as whitespace here, so a leading BOM is dropped too
    let trimmed = rendered.trim_matches(|c: char| c.is_whitespace() || c == '\u{feff}');
    let quoted = serde_json::Value::String(trimmed.to_string()).to_string();
    Ok(quoted[1..quoted.len() - 1].to_string())
}

fn include_at(relative: &str, ctx: &RenderContext, depth: usize) -> Result<String, TemplateError> {
    let path = ctx.resolve(relative);
    if depth > MAX_INCLUDE_DEPTH {
        return Err(TemplateError::TooDeep(path));
    }
    let contents = fs::read_to_string(&path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            TemplateError::IncludeMissing(path.clone())
        } else {
            TemplateError::IncludeRead {
                path: path.clone(),
                source: e,
            }
        }
    })?;
    render_file(&contents, &path, ctx, depth)
}

fn render_file(
    source: &str,
    file: &Path,
    ctx: &RenderContext,
    depth: usize,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = rest.find("<%") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];

        if let Some(stripped) = after_open.strip_prefix('%') {
            out.push_str("<%");
            rest = stripped;
            continue;
        }

        let Some(end) = after_open.find("%>") else {
            return Err(TemplateError::Unterminated {
                file: file.to_path_buf(),
                offset: source.len() - rest.len() + start,
            });
        };
        let tag = &after_open[..end];
        let mut tail = &after_open[end + 2..];

        let (body, trim_newline) = match tag.strip_suffix('-') {
            Some(body) => (body, true),
            None => (tag, false),
        };

        match body.chars().next() {
            Some('#') => {}
            Some('-') => out.push_str(&evaluate(&body[1..], file, ctx, depth)?),
            Some('=') => out.push_str(&escape_html(&evaluate(&body[1..], file, ctx, depth)?)),
            _ => {
                return Err(TemplateError::Unsupported {
                    file: file.to_path_buf(),
                    code: body.trim().to_string(),
                })
            }
        }

        if trim_newline {
            tail = tail
                .strip_prefix("\r\n")
                .or_else(|| tail.strip_prefix('\n'))
                .unwrap_or(tail);
        }

        rest = tail;
    }

    out.push_str(rest);
    Ok(out)
}

enum Arg {
    Literal(String),
    Variable(String),
}

fn evaluate(
    expr: &str,
    file: &Path,
    ctx: &RenderContext,
    depth: usize,
) -> Result<String, TemplateError> {
    let unsupported = || TemplateError::Unsupported {
        file: file.to_path_buf(),
        code: expr.trim().to_string(),
    };

    let caps = get_expr_regex().captures(expr).ok_or_else(unsupported)?;
    let name = &caps[1];

    let Some(arg_list) = caps.get(2) else {
        return lookup(name, file, ctx);
    };

    let args = parse_args(arg_list.as_str()).ok_or_else(unsupported)?;
    let path_arg = |max_args: usize| -> Result<String, TemplateError> {
        if args.is_empty() || args.len() > max_args {
            return Err(TemplateError::BadArguments {
                file: file.to_path_buf(),
                name: name.to_string(),
            });
        }
        // Legacy two-argument form: stringify(filename, path)
        match &args[args.len() - 1] {
            Arg::Literal(value) => Ok(value.clone()),
            Arg::Variable(var) => lookup(var, file, ctx),
        }
    };

    match name {
        "stringify" | "inject" => stringify_at(&path_arg(2)?, ctx, depth + 1),
        "include" => include_at(&path_arg(1)?, ctx, depth + 1),
        _ => Err(TemplateError::UnknownFunction {
            file: file.to_path_buf(),
            name: name.to_string(),
        }),
    }
}

fn lookup(name: &str, file: &Path, ctx: &RenderContext) -> Result<String, TemplateError> {
    ctx.variable(name)
        .map(str::to_string)
        .ok_or_else(|| TemplateError::UndefinedVariable {
            file: file.to_path_buf(),
            name: name.to_string(),
        })
}

fn parse_args(list: &str) -> Option<Vec<Arg>> {
    let mut args = Vec::new();
    let mut rest = list;
    if rest.trim().is_empty() {
        return Some(args);
    }

    loop {
        let caps = get_arg_regex().captures(rest)?;
        let arg = if let Some(single) = caps.get(1) {
            Arg::Literal(unescape(single.as_str()))
        } else if let Some(double) = caps.get(2) {
            Arg::Literal(unescape(double.as_str()))
        } else {
            Arg::Variable(caps[3].to_string())
        };
        args.push(arg);

        let whole = caps.get(0)?;
        rest = &rest[whole.end()..];
        if &caps[4] != "," {
            return Some(args);
        }
        if rest.trim().is_empty() {
            // trailing comma
            return None;
        }
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
