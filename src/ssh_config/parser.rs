//! Line-oriented parser for OpenSSH client configuration files.
//!
//! The parser keeps enough structure for two consumers: the record builder,
//! which wants the directives of each `Host` block in file order, and the
//! serializer, which needs the exact line span of every block so it can
//! rewrite one block and leave the rest of the file byte-for-byte intact.
//! Both views are derived from the same line classification, so their idea
//! of where a block starts and ends can never disagree.

use std::ops::Range;

use super::pattern;

/// Marker written in front of forwarding directives whose rule is disabled.
/// `ssh` sees an ordinary comment; the builder restores the rule as disabled.
pub const DISABLED_RULE_MARKER: &str = "# sshpilot:disabled ";

/// A single `Key value` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// Key as written in the file (original case)
    pub key: String,
    /// Raw value, surrounding whitespace removed, quotes kept
    pub value: String,
    /// Zero-based line number
    pub line: usize,
}

impl Directive {
    /// Case-insensitive key comparison
    pub fn is(&self, key: &str) -> bool {
        self.key.eq_ignore_ascii_case(key)
    }
}

/// One line inside a `Host` block, in file order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockLine {
    Directive(Directive),
    /// A forwarding directive commented out with [`DISABLED_RULE_MARKER`]
    Disabled(Directive),
    Comment(String),
}

/// A `Host` block: its patterns and everything up to the next block
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostBlock {
    /// Patterns from the `Host` line with quotes removed
    pub patterns: Vec<String>,
    pub lines: Vec<BlockLine>,
    /// Zero-based line number of the `Host` line
    pub line: usize,
}

impl HostBlock {
    /// Active directives in file order
    pub fn directives(&self) -> impl Iterator<Item = &Directive> {
        self.lines.iter().filter_map(|l| match l {
            BlockLine::Directive(d) => Some(d),
            _ => None,
        })
    }

    /// Value of the first occurrence of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.directives()
            .find(|d| d.is(key))
            .map(|d| d.value.as_str())
    }

    /// Values of every occurrence of `key`, in file order
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.directives()
            .filter(|d| d.is(key))
            .map(|d| d.value.as_str())
            .collect()
    }

    /// Blocks with wildcard or negated patterns hold defaults, not connections
    pub fn is_rule(&self) -> bool {
        self.patterns.iter().any(|p| pattern::is_pattern(p))
    }
}

/// A `Match` block, kept verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchBlock {
    pub criteria: String,
    /// Full text of the block without trailing blank lines
    pub raw: String,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Host(HostBlock),
    Match(MatchBlock),
}

/// Parsed content of one config file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SshConfig {
    /// Directives before the first block (global options, `Include`)
    pub preamble: Vec<Directive>,
    pub blocks: Vec<Block>,
}

impl SshConfig {
    /// Parse config text. Never fails: malformed lines degrade to directives
    /// with empty values, unknown structure is carried along verbatim.
    pub fn parse(content: &str) -> Self {
        let mut config = SshConfig::default();
        let mut current: Option<Block> = None;

        for (idx, raw_line) in content.lines().enumerate() {
            match classify(raw_line) {
                LineKind::HostStart(patterns) => {
                    flush(&mut config, current.take());
                    current = Some(Block::Host(HostBlock {
                        patterns,
                        lines: Vec::new(),
                        line: idx,
                    }));
                }
                LineKind::MatchStart(criteria) => {
                    flush(&mut config, current.take());
                    current = Some(Block::Match(MatchBlock {
                        criteria: criteria.to_string(),
                        raw: raw_line.trim_end().to_string(),
                        line: idx,
                    }));
                }
                kind => match current.as_mut() {
                    Some(Block::Match(block)) => {
                        block.raw.push('\n');
                        block.raw.push_str(raw_line.trim_end());
                    }
                    Some(Block::Host(block)) => match kind {
                        LineKind::Directive(key, value) => {
                            block.lines.push(BlockLine::Directive(Directive {
                                key: key.to_string(),
                                value: value.to_string(),
                                line: idx,
                            }));
                        }
                        LineKind::Disabled(key, value) => {
                            block.lines.push(BlockLine::Disabled(Directive {
                                key: key.to_string(),
                                value: value.to_string(),
                                line: idx,
                            }));
                        }
                        LineKind::Comment(text) => {
                            block.lines.push(BlockLine::Comment(text.to_string()));
                        }
                        _ => {}
                    },
                    None => {
                        if let LineKind::Directive(key, value) = kind {
                            config.preamble.push(Directive {
                                key: key.to_string(),
                                value: value.to_string(),
                                line: idx,
                            });
                        }
                    }
                },
            }
        }

        flush(&mut config, current);
        config
    }

    /// All `Host` blocks in file order
    pub fn host_blocks(&self) -> impl Iterator<Item = &HostBlock> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Host(h) => Some(h),
            Block::Match(_) => None,
        })
    }

    /// Every pattern named by an `Include` directive, wherever it appears
    pub fn include_patterns(&self) -> Vec<String> {
        let in_blocks = self
            .host_blocks()
            .flat_map(|b| b.directives())
            .filter(|d| d.is("include"));

        self.preamble
            .iter()
            .filter(|d| d.is("include"))
            .chain(in_blocks)
            .flat_map(|d| split_tokens(&d.value))
            .collect()
    }
}

fn flush(config: &mut SshConfig, block: Option<Block>) {
    match block {
        Some(Block::Match(mut m)) => {
            let trimmed = m.raw.trim_end().len();
            m.raw.truncate(trimmed);
            config.blocks.push(Block::Match(m));
        }
        Some(block) => config.blocks.push(block),
        None => {}
    }
}

/// Location of a block within the file's lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BlockSpan {
    /// `None` for `Match` blocks
    pub patterns: Option<Vec<String>>,
    /// From the block's header line up to the next header (or EOF)
    pub lines: Range<usize>,
    /// End of the block's content; trailing blank and comment lines after
    /// this index are separators and belong to nobody
    pub body_end: usize,
}

/// Compute block spans over `lines` (as produced by `split_inclusive('\n')`)
pub(crate) fn block_spans(lines: &[&str]) -> Vec<BlockSpan> {
    let mut spans: Vec<BlockSpan> = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let kind = classify(line);
        let patterns = match kind {
            LineKind::HostStart(patterns) => Some(patterns),
            LineKind::MatchStart(_) => None,
            LineKind::Blank | LineKind::Comment(_) => continue,
            LineKind::Directive(..) | LineKind::Disabled(..) => {
                if let Some(span) = spans.last_mut() {
                    span.body_end = idx + 1;
                }
                continue;
            }
        };

        if let Some(span) = spans.last_mut() {
            span.lines.end = idx;
        }
        spans.push(BlockSpan {
            patterns,
            lines: idx..lines.len(),
            body_end: idx + 1,
        });
    }

    spans
}

#[derive(Debug, PartialEq, Eq)]
enum LineKind<'a> {
    Blank,
    Comment(&'a str),
    Disabled(&'a str, &'a str),
    HostStart(Vec<String>),
    MatchStart(&'a str),
    Directive(&'a str, &'a str),
}

fn classify(raw_line: &str) -> LineKind<'_> {
    let line = raw_line.trim();
    if line.is_empty() {
        return LineKind::Blank;
    }

    if line.starts_with('#') {
        if let Some(rest) = line.strip_prefix(DISABLED_RULE_MARKER.trim_end()) {
            let (key, value) = split_directive(rest.trim_start());
            if is_forward_key(key) {
                return LineKind::Disabled(key, value);
            }
        }
        return LineKind::Comment(line);
    }

    let (key, value) = split_directive(line);
    if key.eq_ignore_ascii_case("host") {
        LineKind::HostStart(split_tokens(value))
    } else if key.eq_ignore_ascii_case("match") {
        LineKind::MatchStart(value)
    } else {
        LineKind::Directive(key, value)
    }
}

fn is_forward_key(key: &str) -> bool {
    ["LocalForward", "RemoteForward", "DynamicForward"]
        .iter()
        .any(|k| k.eq_ignore_ascii_case(key))
}

/// Split `Key value`, `Key=value` or `Key = value`. A key with no value
/// yields an empty value.
fn split_directive(line: &str) -> (&str, &str) {
    let key_end = line
        .find(|c: char| c.is_whitespace() || c == '=')
        .unwrap_or(line.len());
    let key = &line[..key_end];
    let rest = line[key_end..].trim_start();
    let rest = rest.strip_prefix('=').unwrap_or(rest);
    (key, rest.trim())
}

/// Split on whitespace, keeping double-quoted runs together (quotes removed)
pub fn split_tokens(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quoted = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                quoted = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() || quoted {
                    tokens.push(std::mem::take(&mut current));
                }
                quoted = false;
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() || quoted {
        tokens.push(current);
    }

    tokens
}

/// Remove one pair of surrounding double quotes
pub fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}
