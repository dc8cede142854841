//! Adding blank glyphs to a font file.
//!
//! Takes a TrueType font plus text, variation sequence and substitution
//! rule inputs, and produces a new font in which every requested character,
//! sequence and alternate rule is a valid lookup. Added glyphs are empty
//! placeholders; glyphs and rules already in the font are never removed or
//! replaced.
//!
//! The work happens in a single pass over an in-memory snapshot: characters
//! and sequences are registered first (allocating glyph ids as needed),
//! substitution rules are then merged by looking those ids up, and finally
//! the mapping subtables are recompiled and the font is reassembled. A
//! fatal error anywhere means no output is produced.

use std::path::PathBuf;

use thiserror::Error;
use write_fonts::read::{FontRef, ReadError};
use write_fonts::BuilderError;

mod cmap;
pub mod event;
mod font;
mod gsub;
pub mod input;
mod registry;
#[cfg(test)]
mod testfont;

pub use event::{Advisory, Event, EventSink, LogSink, MappingKind, SkipReason};
pub use font::output_path;
pub use input::{
    load_characters, load_rules, load_sequences, parse_character_list, parse_rule_file,
    parse_sequence_file, GlyphKey, RuleRecord, SyntaxError,
};

use indexmap::{IndexMap, IndexSet};

#[derive(Debug, Error)]
pub enum AugmentError {
    #[error("error while loading '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Usage(String),
    #[error("file '{file}', line {line}: {message}")]
    Syntax { file: String, line: usize, message: String },
    #[error("error while parsing font: {0}")]
    Font(#[from] ReadError),
    #[error("{0}")]
    Unsupported(String),
    #[error("cannot change the font safely: {0}")]
    Invariant(String),
    #[error(transparent)]
    Build(#[from] BuilderError),
}

impl AugmentError {
    /// Process exit code: user-facing problems exit with 2, internal
    /// failures with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            AugmentError::Build(_) => 1,
            _ => 2,
        }
    }
}

/// Everything one invocation should add to the font.
#[derive(Clone, Debug, Default)]
pub struct Additions {
    /// Characters to back with an empty glyph.
    pub characters: IndexSet<char>,
    /// Variation sequences, `true` marking the default ones.
    pub sequences: IndexMap<(char, char), bool>,
    /// Alternate substitution rules, in input order.
    pub rules: Vec<RuleRecord>,
}

/// Runs one load→register→merge→synthesize→assemble pass and returns the
/// new font binary. The input bytes are left untouched.
pub fn augment(
    font_bytes: &[u8],
    additions: &Additions,
    events: &mut dyn EventSink,
) -> Result<Vec<u8>, AugmentError> {
    let font = FontRef::new(font_bytes)?;
    let charmap = cmap::CharacterMap::from_font(&font)?;
    let mut registry = registry::GlyphRegistry::new(&charmap, font::glyph_count(&font)?);

    for &c in &additions.characters {
        registry.ensure_character(c, events);
    }
    for (&(base, selector), &default) in &additions.sequences {
        registry.ensure_sequence(base, selector, default, events);
    }

    // rules only look glyphs up; every allocation has happened by now
    let gsub = if additions.rules.is_empty() {
        None
    } else {
        let mut merger = gsub::RuleMerger::from_font(&font)?;
        for rule in &additions.rules {
            merger.merge(rule, &registry, events)?;
        }
        Some(merger.into_table())
    };

    let sequences_registered = !additions.sequences.is_empty();
    if sequences_registered {
        if registry.resolve(&GlyphKey::Scalar(' ')).is_none() {
            events.emit(Event::Advisory(Advisory::SpaceNotMapped));
        }
        if !registry.maps_beyond_bmp() {
            events.emit(Event::Advisory(Advisory::NoSupplementaryCharacters));
        }
    }

    let cmap_table = charmap.build(&registry, events)?;
    let bytes = font::assemble(&font, &registry, cmap_table, gsub, sequences_registered)?;
    events.emit(Event::Finished { glyphs_added: registry.added_count() });
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testfont::TestFont;
    use pretty_assertions::assert_eq;
    use write_fonts::from_obj::ToOwnedTable;
    use write_fonts::read::tables::cmap::{CmapSubtable, MapVariant, PlatformId};
    use write_fonts::read::TableProvider;
    use write_fonts::tables::gsub::SubstitutionLookup;
    use write_fonts::types::{GlyphId, Tag};

    fn characters(text: &str) -> Additions {
        Additions {
            characters: parse_character_list(text).unwrap(),
            ..Default::default()
        }
    }

    fn read_variant(bytes: &[u8], base: u32, selector: u32) -> Option<MapVariant> {
        let font = FontRef::new(bytes).unwrap();
        let cmap = font.cmap().unwrap();
        let record = cmap
            .encoding_records()
            .iter()
            .find(|r| r.platform_id() == PlatformId::Unicode && r.encoding_id() == 5)?;
        let CmapSubtable::Format14(sub) = record.subtable(cmap.offset_data()).unwrap() else {
            panic!("expected format 14");
        };
        sub.map_variant(base, selector)
    }

    #[test]
    fn characters_get_blank_glyphs_and_mappings() {
        let fixture = TestFont::new(3).mapping(' ', 1).mapping('A', 2).build();
        let mut events = Vec::new();

        let output = augment(&fixture, &characters("&#x4E08;&#x1F600;"), &mut events).unwrap();

        assert_eq!(
            events,
            vec![
                Event::ScalarAdded('丈'),
                Event::ScalarAdded('\u{1f600}'),
                Event::MappingCreated(MappingKind::Supplementary),
                Event::Finished { glyphs_added: 2 },
            ]
        );

        let font = FontRef::new(&output).unwrap();
        assert_eq!(font.maxp().unwrap().num_glyphs(), 5);
        let cmap = font.cmap().unwrap();
        assert_eq!(cmap.map_codepoint(0x4E08u32), Some(GlyphId::new(3)));
        assert_eq!(cmap.map_codepoint(0x1F600u32), Some(GlyphId::new(4)));
        assert_eq!(cmap.map_codepoint(0x20u32), Some(GlyphId::new(1)));

        // blank glyphs: repeated loca offsets, long format, full metrics
        assert_eq!(font.head().unwrap().index_to_loc_format(), 1);
        let loca = font.loca(None).unwrap();
        assert_eq!(loca.len(), 5);
        let hmtx = font.hmtx().unwrap();
        assert_eq!(hmtx.h_metrics().len(), 5);
        assert_eq!(hmtx.h_metrics()[3].advance(), 1024);
        assert_eq!(hmtx.h_metrics()[1].advance(), 500);
    }

    #[test]
    fn a_second_run_finds_everything_present() {
        let fixture = TestFont::new(3).mapping(' ', 1).mapping('A', 2).build();
        let additions = characters("&#x4E08;&#x1F600;");
        let mut events = Vec::new();
        let output = augment(&fixture, &additions, &mut events).unwrap();

        events.clear();
        let again = augment(&output, &additions, &mut events).unwrap();
        assert_eq!(
            events,
            vec![
                Event::AlreadyPresent(GlyphKey::Scalar('丈')),
                Event::AlreadyPresent(GlyphKey::Scalar('\u{1f600}')),
                Event::Finished { glyphs_added: 0 },
            ]
        );
        let font = FontRef::new(&again).unwrap();
        assert_eq!(font.maxp().unwrap().num_glyphs(), 5);
    }

    #[test]
    fn variation_sequences_share_or_get_glyphs() {
        let fixture = TestFont::new(3).mapping(' ', 1).mapping('丈', 2).build();
        let additions = Additions {
            sequences: parse_sequence_file("丈&#xE0100; D\n丈&#xE0101;\n").unwrap(),
            ..Default::default()
        };
        let mut events = Vec::new();
        let output = augment(&fixture, &additions, &mut events).unwrap();

        assert_eq!(
            events,
            vec![
                Event::SequenceAdded { base: '丈', selector: '\u{e0100}', default: true },
                Event::SequenceAdded { base: '丈', selector: '\u{e0101}', default: false },
                Event::Advisory(Advisory::NoSupplementaryCharacters),
                Event::MappingCreated(MappingKind::Variation),
                Event::Finished { glyphs_added: 1 },
            ]
        );

        assert_eq!(read_variant(&output, 0x4E08, 0xE0100), Some(MapVariant::UseDefault));
        assert_eq!(
            read_variant(&output, 0x4E08, 0xE0101),
            Some(MapVariant::Variant(GlyphId::new(3)))
        );

        // the variation-selector bit of OS/2 is on, other bits untouched
        let font = FontRef::new(&output).unwrap();
        assert_eq!(font.os2().unwrap().ul_unicode_range_2(), 1 << 25);

        // a second run adds nothing
        events.clear();
        augment(&output, &additions, &mut events).unwrap();
        assert_eq!(
            events[..2],
            [
                Event::AlreadyPresent(GlyphKey::Sequence { base: '丈', selector: '\u{e0100}' }),
                Event::AlreadyPresent(GlyphKey::Sequence { base: '丈', selector: '\u{e0101}' }),
            ]
        );
        assert!(events.contains(&Event::Finished { glyphs_added: 0 }));
    }

    #[test]
    fn default_sequence_for_unmapped_base_adds_the_base() {
        let fixture = TestFont::new(2).mapping(' ', 1).build();
        let additions = Additions {
            sequences: parse_sequence_file("丈&#xE0100; D\n").unwrap(),
            ..Default::default()
        };
        let mut events = Vec::new();
        let output = augment(&fixture, &additions, &mut events).unwrap();

        assert_eq!(events[0], Event::BaseCharacterAdded('丈'));
        assert!(events.contains(&Event::Finished { glyphs_added: 1 }));
        let font = FontRef::new(&output).unwrap();
        assert_eq!(font.cmap().unwrap().map_codepoint(0x4E08u32), Some(GlyphId::new(2)));
        assert_eq!(read_variant(&output, 0x4E08, 0xE0100), Some(MapVariant::UseDefault));
    }

    fn output_alternates(bytes: &[u8]) -> Vec<(u16, Vec<u16>)> {
        let font = FontRef::new(bytes).unwrap();
        let gsub: write_fonts::tables::gsub::Gsub = font.gsub().unwrap().to_owned_table();
        let lookups = &gsub.lookup_list.as_ref().lookups;
        let SubstitutionLookup::Alternate(lookup) = lookups[0].as_ref() else {
            panic!("expected an alternate lookup");
        };
        let subtable = lookup.subtables[0].as_ref();
        subtable
            .coverage
            .as_ref()
            .iter()
            .zip(&subtable.alternate_sets)
            .map(|(glyph, set)| {
                (
                    glyph.to_u16(),
                    set.as_ref().alternate_glyph_ids.iter().map(|g| g.to_u16()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn alternate_rules_build_the_hierarchy_then_merge_idempotently() {
        let fixture = TestFont::new(4)
            .mapping('亀', 1)
            .mapping('龜', 2)
            .mapping('龟', 3)
            .build();
        let additions = Additions {
            rules: parse_rule_file("aalt 亀 龜龟\n").unwrap(),
            ..Default::default()
        };
        let mut events = Vec::new();
        let output = augment(&fixture, &additions, &mut events).unwrap();

        assert_eq!(
            events,
            vec![
                Event::ScriptCreated(Tag::new(b"DFLT")),
                Event::DefaultLangSysCreated(Tag::new(b"DFLT")),
                Event::FeatureCreated(Tag::new(b"aalt")),
                Event::RuleAdded {
                    feature: Tag::new(b"aalt"),
                    target: GlyphId::new(1),
                    alternates: vec![GlyphId::new(2), GlyphId::new(3)],
                },
                Event::Finished { glyphs_added: 0 },
            ]
        );
        assert_eq!(output_alternates(&output), vec![(1, vec![2, 3])]);

        // running the same rules over the output only reports them present
        events.clear();
        let again = augment(&output, &additions, &mut events).unwrap();
        assert_eq!(
            events,
            vec![
                Event::RuleUnchanged {
                    feature: Tag::new(b"aalt"),
                    target: GlyphId::new(1),
                    alternates: vec![GlyphId::new(2), GlyphId::new(3)],
                },
                Event::Finished { glyphs_added: 0 },
            ]
        );
        assert_eq!(output_alternates(&again), vec![(1, vec![2, 3])]);
    }

    #[test]
    fn rules_can_reference_glyphs_added_this_run() {
        let fixture = TestFont::new(2).mapping('亀', 1).build();
        let additions = Additions {
            characters: parse_character_list("&#x9F9C;").unwrap(),
            rules: parse_rule_file("aalt 亀 &#x9F9C;\n").unwrap(),
            ..Default::default()
        };
        let mut events = Vec::new();
        let output = augment(&fixture, &additions, &mut events).unwrap();
        assert_eq!(output_alternates(&output), vec![(1, vec![2])]);
        assert!(events.contains(&Event::Finished { glyphs_added: 1 }));
    }

    #[test]
    fn hierarchy_violations_abort_without_output() {
        let fixture = TestFont::new(4)
            .mapping('亀', 1)
            .mapping('龜', 2)
            .two_lookup_feature(Tag::new(b"aalt"))
            .build();
        let additions = Additions {
            rules: parse_rule_file("aalt 亀 龜\n").unwrap(),
            ..Default::default()
        };
        let mut events = Vec::new();
        let err = augment(&fixture, &additions, &mut events).unwrap_err();
        assert!(matches!(err, AugmentError::Invariant(_)), "{err}");
    }

    #[test]
    fn vertical_metrics_are_extended_too() {
        let fixture = TestFont::new(2).mapping(' ', 1).vertical().build();
        let mut events = Vec::<Event>::new();
        let output = augment(&fixture, &characters("&#x4E08;"), &mut events).unwrap();

        let font = FontRef::new(&output).unwrap();
        let vmtx = font.vmtx().unwrap();
        assert_eq!(vmtx.v_metrics().len(), 3);
        assert_eq!(vmtx.v_metrics()[0].advance(), 1000);
        assert_eq!(vmtx.v_metrics()[2].advance(), 1024);
    }

    #[test]
    fn post_version_2_gets_names_for_new_glyphs() {
        let fixture = TestFont::new(2).mapping(' ', 1).post_v2().build();
        let mut events = Vec::new();
        let output = augment(&fixture, &characters("&#x4E08;"), &mut events).unwrap();

        let font = FontRef::new(&output).unwrap();
        let post = font.data_for_tag(Tag::new(b"post")).unwrap();
        let post = post.as_bytes();
        // still version 2.0, now covering the new glyph
        assert_eq!(&post[0..4], &0x0002_0000u32.to_be_bytes());
        assert_eq!(&post[32..34], &3u16.to_be_bytes());
    }
}
