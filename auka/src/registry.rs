//! Glyph bookkeeping: which characters and variation sequences already have
//! a glyph, and allocation of identifiers for the ones that do not.
//!
//! The registry is seeded from the decoded character map and is the only
//! place new glyph identifiers come from. Allocation is idempotent per key;
//! a default variation sequence reuses its base character's glyph and never
//! allocates one of its own.

use std::collections::BTreeMap;

use write_fonts::types::GlyphId;

use crate::cmap::CharacterMap;
use crate::event::{Event, EventSink};
use crate::input::GlyphKey;

/// How a variation sequence resolves inside the font.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceGlyph {
    /// Rendered as the base character; shares its glyph.
    Default,
    /// Has a glyph of its own.
    Variant(GlyphId),
}

pub struct GlyphRegistry {
    scalars: BTreeMap<u32, GlyphId>,
    sequences: BTreeMap<(u32, u32), SequenceGlyph>,
    next_glyph: u32,
    added_scalars: Vec<(u32, GlyphId)>,
    added_defaults: Vec<(u32, u32)>,
    added_variants: Vec<(u32, u32, GlyphId)>,
}

impl GlyphRegistry {
    pub(crate) fn new(charmap: &CharacterMap, glyph_count: u32) -> Self {
        GlyphRegistry {
            scalars: charmap.scalar_view(),
            sequences: charmap.sequence_view(),
            next_glyph: glyph_count,
            added_scalars: Vec::new(),
            added_defaults: Vec::new(),
            added_variants: Vec::new(),
        }
    }

    /// Glyph count after the additions made so far.
    pub fn glyph_count(&self) -> u32 {
        self.next_glyph
    }

    /// How many glyphs this run has allocated.
    pub fn added_count(&self) -> usize {
        self.added_scalars.len() + self.added_variants.len()
    }

    pub(crate) fn added_scalars(&self) -> &[(u32, GlyphId)] {
        &self.added_scalars
    }

    pub(crate) fn added_defaults(&self) -> &[(u32, u32)] {
        &self.added_defaults
    }

    pub(crate) fn added_variants(&self) -> &[(u32, u32, GlyphId)] {
        &self.added_variants
    }

    /// `true` if any mapped character lies beyond the BMP.
    pub(crate) fn maps_beyond_bmp(&self) -> bool {
        self.scalars.keys().next_back().is_some_and(|&c| c > 0xFFFF)
    }

    fn allocate(&mut self) -> GlyphId {
        let glyph = GlyphId::new(self.next_glyph);
        self.next_glyph += 1;
        glyph
    }

    fn add_scalar(&mut self, c: char) -> GlyphId {
        let glyph = self.allocate();
        self.scalars.insert(c as u32, glyph);
        self.added_scalars.push((c as u32, glyph));
        glyph
    }

    /// Makes sure `c` has a glyph, allocating an empty one if needed.
    pub fn ensure_character(&mut self, c: char, events: &mut dyn EventSink) -> GlyphId {
        if let Some(&glyph) = self.scalars.get(&(c as u32)) {
            events.emit(Event::AlreadyPresent(GlyphKey::Scalar(c)));
            return glyph;
        }
        let glyph = self.add_scalar(c);
        events.emit(Event::ScalarAdded(c));
        glyph
    }

    /// Registers a variation sequence, making sure the base character is
    /// representable first.
    pub fn ensure_sequence(
        &mut self,
        base: char,
        selector: char,
        default: bool,
        events: &mut dyn EventSink,
    ) {
        let key = (base as u32, selector as u32);
        if self.sequences.contains_key(&key) {
            events.emit(Event::AlreadyPresent(GlyphKey::Sequence { base, selector }));
            return;
        }
        if !self.scalars.contains_key(&(base as u32)) {
            self.add_scalar(base);
            events.emit(Event::BaseCharacterAdded(base));
        }
        if default {
            self.sequences.insert(key, SequenceGlyph::Default);
            self.added_defaults.push(key);
        } else {
            let glyph = self.allocate();
            self.sequences.insert(key, SequenceGlyph::Variant(glyph));
            self.added_variants.push((key.0, key.1, glyph));
        }
        events.emit(Event::SequenceAdded { base, selector, default });
    }

    /// Looks a key up without allocating anything.
    pub fn resolve(&self, key: &GlyphKey) -> Option<GlyphId> {
        match *key {
            GlyphKey::Scalar(c) => self.scalars.get(&(c as u32)).copied(),
            GlyphKey::Sequence { base, selector } => {
                match self.sequences.get(&(base as u32, selector as u32))? {
                    SequenceGlyph::Default => self.scalars.get(&(base as u32)).copied(),
                    SequenceGlyph::Variant(glyph) => Some(*glyph),
                }
            }
            GlyphKey::Glyph(glyph) => (glyph.to_u32() < self.next_glyph).then_some(glyph),
        }
    }

    /// Names for the glyphs this run allocated, in glyph id order, for the
    /// `post` table.
    pub(crate) fn new_glyph_names(&self) -> Vec<String> {
        let mut named: Vec<(GlyphId, String)> = self
            .added_scalars
            .iter()
            .map(|&(c, glyph)| (glyph, scalar_glyph_name(c)))
            .chain(
                self.added_variants
                    .iter()
                    .map(|&(base, selector, glyph)| (glyph, format!("u{base:04X}u{selector:04X}"))),
            )
            .collect();
        named.sort_by_key(|&(glyph, _)| glyph);
        named.into_iter().map(|(_, name)| name).collect()
    }
}

fn scalar_glyph_name(c: u32) -> String {
    if c < 0x10000 {
        format!("uni{c:04X}")
    } else {
        format!("u{c:04X}")
    }
}
