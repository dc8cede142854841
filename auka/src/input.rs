//! Parsing of the three input file kinds: character lists, variation
//! sequence files and alternate substitution rule files.
//!
//! All three formats allow characters to be written as numeric character
//! references (`&#x4E08;` or `&#19976;`) next to literal text. The parsers
//! work on file contents; attaching file names to errors is the caller's
//! business.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use indexmap::{IndexMap, IndexSet};
use regex::{Captures, Regex};
use write_fonts::types::{GlyphId, Tag};

use crate::AugmentError;

static CHAR_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(?:[xX]([0-9a-fA-F]+)|([0-9]+));").unwrap());

/// A syntax error in an input file, located by 1-based line number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        SyntaxError { line, message: message.into() }
    }

    fn for_file(self, path: &Path) -> AugmentError {
        AugmentError::Syntax {
            file: path.display().to_string(),
            line: self.line,
            message: self.message,
        }
    }
}

/// One thing a substitution rule can refer to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GlyphKey {
    /// A plain character.
    Scalar(char),
    /// A base character qualified by a variation selector.
    Sequence { base: char, selector: char },
    /// A raw glyph identifier, written `\123`.
    Glyph(GlyphId),
}

impl fmt::Display for GlyphKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlyphKey::Scalar(c) => write!(f, "U+{:04X}", *c as u32),
            GlyphKey::Sequence { base, selector } => {
                write!(f, "U+{:04X} U+{:04X}", *base as u32, *selector as u32)
            }
            GlyphKey::Glyph(glyph) => write!(f, "\\{}", glyph.to_u32()),
        }
    }
}

/// A parsed substitution rule line: input glyph and its alternates under a
/// feature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleRecord {
    pub feature: Tag,
    pub target: GlyphKey,
    pub alternates: Vec<GlyphKey>,
}

/// `true` for the standardized variation selectors, including the Mongolian
/// free variation selectors.
pub fn is_variation_selector(c: char) -> bool {
    matches!(c, '\u{180b}'..='\u{180d}' | '\u{180f}' | '\u{fe00}'..='\u{fe0f}' | '\u{e0100}'..='\u{e01ef}')
}

/// Replaces numeric character references in `text` with the characters they
/// name. References to surrogates or values beyond U+10FFFF are errors.
pub fn decode_references(text: &str) -> Result<String, String> {
    let mut bad: Option<String> = None;
    let decoded = CHAR_REFERENCE.replace_all(text, |caps: &Captures| {
        let value = match caps.get(1) {
            Some(hex) => u32::from_str_radix(hex.as_str(), 16).ok(),
            None => caps[2].parse::<u32>().ok(),
        };
        match value.and_then(char::from_u32) {
            Some(c) => c.to_string(),
            None => {
                bad.get_or_insert_with(|| caps[0].to_string());
                String::new()
            }
        }
    });
    match bad {
        Some(reference) => Err(format!("invalid character reference: {reference}")),
        None => Ok(decoded.into_owned()),
    }
}

/// Parses a character list: every character of the decoded text except line
/// and tab controls, deduplicated in order of first appearance.
pub fn parse_character_list(text: &str) -> Result<IndexSet<char>, SyntaxError> {
    let mut characters = IndexSet::new();
    for (ix, line) in text.lines().enumerate() {
        let decoded =
            decode_references(line).map_err(|message| SyntaxError::new(ix + 1, message))?;
        characters.extend(decoded.chars().filter(|c| !matches!(c, '\t' | '\r' | '\n')));
    }
    Ok(characters)
}

/// Parses a variation sequence file.
///
/// One record per non-blank line: a base character immediately followed by a
/// selector, optionally followed by a lone `D` marking the sequence as a
/// default one. A later record for the same sequence overrides the flag.
pub fn parse_sequence_file(
    text: &str,
) -> Result<IndexMap<(char, char), bool>, SyntaxError> {
    let mut sequences = IndexMap::new();
    for (ix, line) in text.lines().enumerate() {
        let line_no = ix + 1;
        let mut columns = Vec::new();
        for column in line.split_whitespace() {
            columns
                .push(decode_references(column).map_err(|m| SyntaxError::new(line_no, m))?);
        }
        if columns.is_empty() {
            continue;
        }
        if columns.len() > 2 {
            return Err(SyntaxError::new(
                line_no,
                format!("invalid number of columns: {}", columns.len()),
            ));
        }
        let sequence: Vec<char> = columns[0].chars().collect();
        let &[base, selector] = sequence.as_slice() else {
            return Err(SyntaxError::new(
                line_no,
                format!("invalid variation sequence length: {}", sequence.len()),
            ));
        };
        if !is_variation_selector(selector) {
            return Err(SyntaxError::new(
                line_no,
                format!("invalid variation selector: U+{:04X}", selector as u32),
            ));
        }
        let default = match columns.get(1).map(String::as_str) {
            Some("D") => true,
            None => false,
            Some(other) => {
                return Err(SyntaxError::new(
                    line_no,
                    format!("invalid default variation sequence option: {other}"),
                ))
            }
        };
        sequences.insert((base, selector), default);
    }
    Ok(sequences)
}

/// Parses a substitution rule file.
///
/// One record per non-blank line, exactly three columns: a 4-character
/// feature tag, a single input glyph key, and one or more output glyph keys
/// written back to back.
pub fn parse_rule_file(text: &str) -> Result<Vec<RuleRecord>, SyntaxError> {
    let mut records = Vec::new();
    for (ix, line) in text.lines().enumerate() {
        let line_no = ix + 1;
        let columns: Vec<&str> = line.split_whitespace().collect();
        if columns.is_empty() {
            continue;
        }
        if columns.len() != 3 {
            return Err(SyntaxError::new(
                line_no,
                format!("invalid number of columns: {}", columns.len()),
            ));
        }
        let feature = parse_feature_tag(columns[0])
            .ok_or_else(|| SyntaxError::new(line_no, format!("invalid feature tag: {}", columns[0])))?;
        let targets = parse_glyph_keys(columns[1]).map_err(|m| SyntaxError::new(line_no, m))?;
        let &[target] = targets.as_slice() else {
            return Err(SyntaxError::new(
                line_no,
                format!("invalid input glyph: {}", columns[1]),
            ));
        };
        let alternates =
            parse_glyph_keys(columns[2]).map_err(|m| SyntaxError::new(line_no, m))?;
        if alternates.is_empty() {
            return Err(SyntaxError::new(
                line_no,
                format!("invalid alternate glyphs: {}", columns[2]),
            ));
        }
        records.push(RuleRecord { feature, target, alternates });
    }
    Ok(records)
}

fn parse_feature_tag(raw: &str) -> Option<Tag> {
    let bytes = raw.as_bytes();
    if bytes.len() != 4 || !bytes.iter().all(|b| (0x20..=0x7e).contains(b)) {
        return None;
    }
    Some(Tag::new(&[bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Scans a column into glyph keys: `\NNN` names a raw glyph id, a character
/// followed by a variation selector forms a sequence, anything else stands
/// alone.
fn parse_glyph_keys(column: &str) -> Result<Vec<GlyphKey>, String> {
    let decoded = decode_references(column)?;
    let mut keys = Vec::new();
    let mut chars = decoded.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek().is_some_and(|n| n.is_ascii_digit()) {
            let mut digits = String::new();
            while let Some(&d) = chars.peek() {
                if !d.is_ascii_digit() {
                    break;
                }
                digits.push(d);
                chars.next();
            }
            let glyph: u32 = digits
                .parse()
                .map_err(|_| format!("invalid glyph id: \\{digits}"))?;
            keys.push(GlyphKey::Glyph(GlyphId::new(glyph)));
            continue;
        }
        match chars.peek() {
            Some(&selector) if is_variation_selector(selector) => {
                chars.next();
                keys.push(GlyphKey::Sequence { base: c, selector });
            }
            _ => keys.push(GlyphKey::Scalar(c)),
        }
    }
    Ok(keys)
}

fn read_input(path: &Path) -> Result<String, AugmentError> {
    let text = fs::read_to_string(path)
        .map_err(|source| AugmentError::Io { path: path.to_path_buf(), source })?;
    // tolerate a UTF-8 byte order mark
    Ok(text.strip_prefix('\u{feff}').map(str::to_owned).unwrap_or(text))
}

/// Reads and parses character list files, merging them into one set.
pub fn load_characters(paths: &[PathBuf]) -> Result<IndexSet<char>, AugmentError> {
    let mut characters = IndexSet::new();
    for path in paths {
        let text = read_input(path)?;
        characters.extend(parse_character_list(&text).map_err(|e| e.for_file(path))?);
    }
    Ok(characters)
}

/// Reads and parses variation sequence files; later files override earlier
/// ones per sequence.
pub fn load_sequences(
    paths: &[PathBuf],
) -> Result<IndexMap<(char, char), bool>, AugmentError> {
    let mut sequences = IndexMap::new();
    for path in paths {
        let text = read_input(path)?;
        for (sequence, default) in parse_sequence_file(&text).map_err(|e| e.for_file(path))? {
            sequences.insert(sequence, default);
        }
    }
    Ok(sequences)
}

/// Reads and parses substitution rule files in order.
pub fn load_rules(paths: &[PathBuf]) -> Result<Vec<RuleRecord>, AugmentError> {
    let mut records = Vec::new();
    for path in paths {
        let text = read_input(path)?;
        records.extend(parse_rule_file(&text).map_err(|e| e.for_file(path))?);
    }
    Ok(records)
}
