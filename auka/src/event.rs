//! Observable events emitted while a font is being augmented.
//!
//! The core components never log directly; they hand typed events to an
//! [`EventSink`] and the caller decides what to do with them. The binary
//! forwards them to `log`, tests collect them in a `Vec`.

use std::fmt;

use write_fonts::types::{GlyphId, Tag};

use crate::input::GlyphKey;

/// Which character-mapping subtable an event refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MappingKind {
    /// Format 4, Windows BMP encoding.
    Bmp,
    /// Format 12, Windows full-repertoire encoding.
    Supplementary,
    /// Format 14, Unicode variation sequences.
    Variation,
}

/// Why a substitution record, or one of its alternates, was not applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The referenced character or sequence has no glyph in the font.
    NotInFont,
    /// The alternate resolved to the same glyph as the input.
    SameAsTarget,
    /// Every alternate was dropped, leaving nothing to merge.
    NoAlternates,
    /// The glyph id does not fit in the 16 bits a substitution can address.
    NotAddressable,
}

/// Legacy-rasterizer requirements worth pointing out; never fatal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advisory {
    SpaceNotMapped,
    NoSupplementaryCharacters,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    MappingCreated(MappingKind),
    ScalarAdded(char),
    SequenceAdded { base: char, selector: char, default: bool },
    BaseCharacterAdded(char),
    AlreadyPresent(GlyphKey),
    ScriptCreated(Tag),
    DefaultLangSysCreated(Tag),
    FeatureCreated(Tag),
    RuleAdded { feature: Tag, target: GlyphId, alternates: Vec<GlyphId> },
    RuleUnchanged { feature: Tag, target: GlyphId, alternates: Vec<GlyphId> },
    AlternateDropped { feature: Tag, key: GlyphKey, reason: SkipReason },
    RuleSkipped { feature: Tag, key: GlyphKey, reason: SkipReason },
    Advisory(Advisory),
    Finished { glyphs_added: usize },
}

pub trait EventSink {
    fn emit(&mut self, event: Event);
}

impl EventSink for Vec<Event> {
    fn emit(&mut self, event: Event) {
        self.push(event);
    }
}

/// Forwards events to the `log` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&mut self, event: Event) {
        match event {
            Event::Advisory(_) => log::warn!("{event}"),
            _ => log::info!("{event}"),
        }
    }
}

fn write_glyph_list(f: &mut fmt::Formatter<'_>, glyphs: &[GlyphId]) -> fmt::Result {
    for (i, glyph) in glyphs.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", glyph.to_u32())?;
    }
    Ok(())
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::MappingCreated(MappingKind::Bmp) => write!(f, "cmap subtable (format=4) created"),
            Event::MappingCreated(MappingKind::Supplementary) => {
                write!(f, "cmap subtable (format=12) created")
            }
            Event::MappingCreated(MappingKind::Variation) => {
                write!(f, "cmap subtable (format=14) created")
            }
            Event::ScalarAdded(c) => write!(f, "added: U+{:04X}", *c as u32),
            Event::SequenceAdded { base, selector, default } => write!(
                f,
                "added: U+{:04X} U+{:04X} as {}",
                *base as u32,
                *selector as u32,
                if *default { "default" } else { "non-default" }
            ),
            Event::BaseCharacterAdded(c) => {
                write!(f, "added base character: U+{:04X}", *c as u32)
            }
            Event::AlreadyPresent(key) => write!(f, "already in font: {key}"),
            Event::ScriptCreated(tag) => write!(f, "script '{tag}' created"),
            Event::DefaultLangSysCreated(tag) => {
                write!(f, "default langsys for script '{tag}' created")
            }
            Event::FeatureCreated(tag) => write!(f, "feature '{tag}' created"),
            Event::RuleAdded { feature, target, alternates } => {
                write!(f, "added: {feature}: {} -> ", target.to_u32())?;
                write_glyph_list(f, alternates)
            }
            Event::RuleUnchanged { feature, target, alternates } => {
                write!(f, "already in font: {feature}: {} -> ", target.to_u32())?;
                write_glyph_list(f, alternates)
            }
            Event::AlternateDropped { feature, key, reason } => match reason {
                SkipReason::SameAsTarget => {
                    write!(f, "{feature}: input and alternate glyph are the same: {key}")
                }
                SkipReason::NotAddressable => {
                    write!(f, "{feature}: glyph for {key} cannot be referenced from GSUB")
                }
                _ => write!(f, "{feature}: alternate glyph not found: {key}"),
            },
            Event::RuleSkipped { feature, key, reason } => match reason {
                SkipReason::NoAlternates => {
                    write!(f, "{feature}: no alternates remain for {key}, record skipped")
                }
                SkipReason::NotAddressable => {
                    write!(f, "{feature}: glyph for {key} cannot be referenced from GSUB")
                }
                _ => write!(f, "{feature}: input glyph not found: {key}"),
            },
            Event::Advisory(Advisory::SpaceNotMapped) => {
                write!(f, "U+0020 should be added for variation sequences to work in legacy rasterizers")
            }
            Event::Advisory(Advisory::NoSupplementaryCharacters) => write!(
                f,
                "at least one character beyond the BMP should be added for variation sequences to work in legacy rasterizers"
            ),
            Event::Finished { glyphs_added } => write!(f, "{glyphs_added} glyphs added!"),
        }
    }
}
