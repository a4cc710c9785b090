//! `.env` files: names, parsing and change detection.
//!
//! Files are line oriented. A line is blank, a comment (first non-whitespace
//! byte is `#`), or `NAME=VALUE` where the value is the rest of the line,
//! verbatim. Contents are never rewritten: pushes send the file bytes as they
//! are and pulls write back exactly what the remote stored.

use crate::error::EnvNameError;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const DEFAULT_ENV: &str = "default";
pub const ENV_FILE: &str = ".env";
const LOCAL_SUFFIX: &str = ".local";

fn valid_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9](?:[a-z0-9_-]*[a-z0-9])?$").unwrap())
}

fn disallowed_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9_-]+").unwrap())
}

fn hyphen_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-{2,}").unwrap())
}

fn variable_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^#=\s][^=]*=").unwrap())
}

/// Canonical environment name.
///
/// `Default` is the environment backed by the plain `.env` file. It has no
/// project-level descriptor on the remote but is always addressable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnvName {
    Default,
    Named(String),
}

impl EnvName {
    /// Canonicalise user input: lowercase, `default` for empty input.
    pub fn parse(input: &str) -> Result<Self, EnvNameError> {
        let name = input.trim().to_lowercase();
        if name.is_empty() || name == DEFAULT_ENV {
            return Ok(EnvName::Default);
        }

        if valid_name_re().is_match(&name) {
            return Ok(EnvName::Named(name));
        }

        Err(EnvNameError {
            input: input.to_string(),
            suggestion: suggest(&name),
        })
    }

    /// Accept an `alternateId` from the remote only if it is already a
    /// canonical environment name; it ends up in a file path.
    pub fn from_remote(alternate_id: &str) -> Result<Self, EnvNameError> {
        match EnvName::parse(alternate_id) {
            Ok(EnvName::Named(name)) if name == alternate_id => Ok(EnvName::Named(name)),
            _ => Err(EnvNameError {
                input: alternate_id.to_string(),
                suggestion: suggest(&alternate_id.to_lowercase()),
            }),
        }
    }

    /// Map a file name in the workspace to its environment.
    ///
    /// Returns `Ok(None)` for files that are not env files, including private
    /// `.env.local` overrides.
    pub fn from_file_name(file_name: &str) -> Result<Option<Self>, EnvNameError> {
        if file_name == ENV_FILE {
            return Ok(Some(EnvName::Default));
        }
        let Some(suffix) = file_name.strip_prefix(".env.") else {
            return Ok(None);
        };
        if suffix.is_empty() || file_name.ends_with(LOCAL_SUFFIX) {
            return Ok(None);
        }

        match EnvName::parse(suffix)? {
            EnvName::Named(name) if name == suffix => Ok(Some(EnvName::Named(name))),
            _ => Err(EnvNameError {
                input: file_name.to_string(),
                suggestion: format!(".env.{}", suggest(&suffix.to_lowercase())),
            }),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EnvName::Default => DEFAULT_ENV,
            EnvName::Named(name) => name,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, EnvName::Default)
    }

    pub fn file_name(&self) -> String {
        match self {
            EnvName::Default => ENV_FILE.to_string(),
            EnvName::Named(name) => format!(".env.{name}"),
        }
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

/// Lexicographic, with `default` last.
impl Ord for EnvName {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (EnvName::Default, EnvName::Default) => Ordering::Equal,
            (EnvName::Default, EnvName::Named(_)) => Ordering::Greater,
            (EnvName::Named(_), EnvName::Default) => Ordering::Less,
            (EnvName::Named(a), EnvName::Named(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for EnvName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EnvName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn suggest(lowercased: &str) -> String {
    let replaced = disallowed_run_re().replace_all(lowercased, "-");
    let collapsed = hyphen_run_re().replace_all(&replaced, "-");
    collapsed.trim_matches(|c| c == '-' || c == '_').to_string()
}

/// One classified line of an env file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line<'a> {
    Blank,
    Comment(&'a str),
    Variable { name: &'a str, value: &'a str },
    /// Not blank, not a comment, and not a well-formed variable.
    Other(&'a str),
}

impl<'a> Line<'a> {
    pub fn classify(raw: &'a str) -> Self {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            return Line::Blank;
        }
        if trimmed.starts_with('#') {
            return Line::Comment(line);
        }
        if variable_re().is_match(line) {
            if let Some((name, value)) = line.split_once('=') {
                return Line::Variable { name, value };
            }
        }
        Line::Other(line)
    }
}

/// Plaintext contents of one environment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvFile {
    text: String,
}

impl EnvFile {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Read a file verbatim
    pub fn read(path: &Path) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        let text = String::from_utf8(bytes).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not valid UTF-8: {e}", path.display()),
            )
        })?;
        Ok(Self { text })
    }

    /// Read a file if it exists
    pub fn read_optional(path: &Path) -> io::Result<Option<Self>> {
        match Self::read(path) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Accept decrypted bytes only if they look like an env file.
    ///
    /// Every line that is neither blank nor a comment must contain `=`; this is
    /// how a payload decrypted with the wrong key is told apart.
    pub fn from_decrypted(bytes: Vec<u8>) -> Option<Self> {
        let text = String::from_utf8(bytes).ok()?;
        let file = Self { text };
        file.is_well_formed().then_some(file)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    pub fn lines(&self) -> impl Iterator<Item = Line<'_>> {
        self.text.split('\n').map(Line::classify)
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &str)> {
        self.lines().filter_map(|line| match line {
            Line::Variable { name, value } => Some((name, value)),
            _ => None,
        })
    }

    pub fn count_variables(&self) -> u32 {
        self.variables().count() as u32
    }

    pub fn is_well_formed(&self) -> bool {
        self.lines().all(|line| match line {
            Line::Other(text) => text.contains('='),
            _ => true,
        })
    }

    /// Size reported to the remote: bytes of line content, excluding line breaks
    pub fn size(&self) -> String {
        let bytes = self.text.len() - self.text.matches('\n').count();
        format!("{bytes} bytes")
    }

    pub fn hash(&self) -> String {
        content_hash(&self.text)
    }
}

/// SHA-256 hex of plaintext contents
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Emit `NAME=VALUE` lines in order, each terminated by a newline
pub fn render<K, V>(pairs: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    pairs.iter().fold(String::new(), |mut out, (name, value)| {
        out.push_str(name.as_ref());
        out.push('=');
        out.push_str(value.as_ref());
        out.push('\n');
        out
    })
}

/// An env file found on disk.
#[derive(Debug)]
pub struct Discovered {
    pub file_name: String,
    pub name: Result<EnvName, EnvNameError>,
}

/// List `.env` and `.env.<name>` files in `dir`, skipping `.env.local` overrides.
pub fn discover(dir: &Path) -> io::Result<Vec<Discovered>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        match EnvName::from_file_name(&file_name) {
            Ok(Some(name)) => found.push(Discovered {
                file_name,
                name: Ok(name),
            }),
            Ok(None) => {}
            Err(e) => found.push(Discovered {
                file_name,
                name: Err(e),
            }),
        }
    }
    found.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(found)
}
