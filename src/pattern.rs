use fnv::FnvBuildHasher;
use regex::Regex;
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use thiserror::Error;

/// Prefix for internally generated wildcard group names. Groups with this
/// prefix are positional-only and never appear in the named capture map.
const RESERVED_PREFIX: &str = "__";

/// Errors that can occur while compiling a route pattern.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Pattern '{pattern}' contains a parameter with an empty name.")]
    EmptyParamName { pattern: String },

    #[error("Pattern '{pattern}' did not compile to a valid matcher.")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

impl CompileError {
    #[inline]
    fn empty_param_name(pattern: impl Into<String>) -> Self {
        Self::EmptyParamName {
            pattern: pattern.into(),
        }
    }

    #[inline]
    fn regex(pattern: impl Into<String>, source: regex::Error) -> Self {
        Self::Regex {
            pattern: pattern.into(),
            source,
        }
    }
}

/// A compiled route pattern.
///
/// Patterns are `/`-delimited and support three token forms:
/// - `:name` is a required parameter matching one path segment.
/// - `:name?` is an optional parameter; the rest of the pattern still
///   applies whether or not the parameter is present.
/// - `*` is a greedy, unnamed wildcard spanning one or more path segments
///   up to the next fixed part of the pattern.
///
/// Everything else is literal text. The compiled matcher is anchored at both
/// ends and tolerates a single trailing slash. Compilation is deterministic:
/// the same pattern always produces a structurally equivalent matcher.
#[derive(Debug, Clone)]
pub struct Matcher {
    pattern: String,
    regex: Regex,
    depth: usize,
    wildcards: usize,
    params: usize,
}

impl Matcher {
    /// Compiles a route pattern string into a matcher.
    ///
    /// Fails only on structurally malformed patterns, i.e. a parameter token
    /// with an empty name such as `/:` or `/:?`.
    pub fn compile(pattern: &str) -> Result<Self, CompileError> {
        let normalized = if pattern.starts_with('/') {
            pattern.to_string()
        } else {
            format!("/{pattern}")
        };

        let mut source = String::with_capacity(normalized.len() + 8);
        let mut structure = Structure::default();
        source.push('^');
        compile_source(&normalized, &mut source, &mut structure)?;
        source.push_str("/?$");

        let regex =
            Regex::new(&source).map_err(|e| CompileError::regex(&normalized, e))?;
        let depth = normalized.split('/').filter(|s| !s.is_empty()).count();

        Ok(Self {
            pattern: normalized,
            regex,
            depth,
            wildcards: structure.wildcards,
            params: structure.params,
        })
    }

    /// The normalized pattern this matcher was compiled from.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Number of segments in the pattern. Optional segments count as if they
    /// were required.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Number of wildcard tokens in the pattern.
    pub fn wildcards(&self) -> usize {
        self.wildcards
    }

    /// Number of named parameter tokens in the pattern, optional ones
    /// included.
    pub fn params(&self) -> usize {
        self.params
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Tests a path against this matcher, yielding the captured parameters on
    /// success.
    ///
    /// Optional and wildcard groups that did not participate are captured as
    /// absent or empty rather than failing the match.
    pub fn captures(&self, path: &str) -> Option<Captures> {
        let caps = self.regex.captures(path)?;

        let mut positional = Vec::with_capacity(caps.len());
        // Placeholder so positional captures are 1-based, like the full-match
        // slot of a regex capture list.
        positional.push(None);
        for i in 1..caps.len() {
            positional.push(caps.get(i).map(|m| m.as_str().to_string()));
        }

        let mut named = HashMap::with_hasher(FnvBuildHasher::default());
        for name in self.regex.capture_names().flatten() {
            if name.starts_with(RESERVED_PREFIX) {
                continue;
            }
            if let Some(m) = caps.name(name) {
                named.insert(name.to_string(), m.as_str().to_string());
            }
        }

        Some(Captures { positional, named })
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.regex.as_str() == other.regex.as_str()
            && self.depth == other.depth
            && self.wildcards == other.wildcards
            && self.params == other.params
    }
}

impl Display for Matcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

#[derive(Default)]
struct Structure {
    wildcards: usize,
    params: usize,
}

fn compile_source(
    pattern: &str,
    out: &mut String,
    structure: &mut Structure,
) -> Result<(), CompileError> {
    let bytes = pattern.as_bytes();
    let mut lit_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let token_start = bytes[i] == b'/'
            && i + 1 < bytes.len()
            && (bytes[i + 1] == b'*' || bytes[i + 1] == b':');
        if !token_start {
            i += 1;
            continue;
        }

        out.push_str(&regex::escape(&pattern[lit_start..i]));

        if bytes[i + 1] == b'*' {
            out.push_str(&format!("/(?P<{RESERVED_PREFIX}{}>.*?)", structure.wildcards));
            structure.wildcards += 1;
            i += 2;
        } else {
            let name_start = i + 2;
            let mut name_end = name_start;
            while name_end < bytes.len()
                && bytes[name_end] != b'/'
                && bytes[name_end] != b'?'
            {
                name_end += 1;
            }
            if name_end == name_start {
                return Err(CompileError::empty_param_name(pattern));
            }

            let name = &pattern[name_start..name_end];
            structure.params += 1;
            let optional = name_end < bytes.len() && bytes[name_end] == b'?';
            if optional {
                out.push_str(&format!("(?:/(?P<{name}>[^/]+))?"));
                i = name_end + 1;
            } else {
                out.push_str(&format!("/(?P<{name}>[^/]+)"));
                i = name_end;
            }
        }
        lit_start = i;
    }

    out.push_str(&regex::escape(&pattern[lit_start..]));
    Ok(())
}

/// The parameters extracted by a successful match.
///
/// Positional captures are 1-based (index 0 is a placeholder) and cover every
/// group in the pattern, wildcards included. The named map covers named
/// parameters only; wildcard groups use reserved names that are stripped
/// before the map is built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Captures {
    positional: Vec<Option<String>>,
    named: HashMap<String, String, FnvBuildHasher>,
}

impl Captures {
    /// Positional capture by 1-based index.
    pub fn get(&self, index: usize) -> Option<&str> {
        if index == 0 {
            return None;
        }
        self.positional.get(index).and_then(|v| v.as_deref())
    }

    /// Named capture by parameter name.
    pub fn name(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }

    /// Number of positional capture slots, excluding the placeholder.
    pub fn len(&self) -> usize {
        self.positional.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
