//! The character map model: decoding the subtables this tool owns, merging
//! in the registry's additions, and compiling replacements.
//!
//! Three encoding records are owned and rewritten: the Windows BMP record
//! (format 4), the Windows full-repertoire record (format 12) and the
//! Unicode variation-sequence record (format 14). Every other record is
//! carried through untouched.

use std::collections::{BTreeMap, BTreeSet};

use write_fonts::from_obj::ToOwnedTable;
use write_fonts::read::tables::cmap::{
    CmapSubtable as ReadSubtable, MapVariant, PlatformId,
};
use write_fonts::read::{FontRef, TableProvider};
use write_fonts::tables::cmap::{
    Cmap, CmapSubtable, DefaultUvs, EncodingRecord, NonDefaultUvs, SequentialMapGroup,
    UnicodeRange, UvsMapping, VariationSelector,
};
use write_fonts::types::{GlyphId, Uint24};
use write_fonts::{NullableOffsetMarker, OffsetMarker};

use crate::event::{Event, EventSink, MappingKind};
use crate::registry::{GlyphRegistry, SequenceGlyph};
use crate::AugmentError;

// https://learn.microsoft.com/en-us/typography/opentype/spec/cmap#windows-platform-platform-id--3
const WINDOWS_BMP_ENCODING: u16 = 1;
const WINDOWS_FULL_REPERTOIRE_ENCODING: u16 = 10;
// https://learn.microsoft.com/en-us/typography/opentype/spec/cmap#unicode-platform-platform-id--0
const UNICODE_VARIATION_ENCODING: u16 = 5;

/// The default and non-default sequences recorded under one selector.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct SelectorMapping {
    pub(crate) default: BTreeSet<u32>,
    pub(crate) non_default: BTreeMap<u32, GlyphId>,
}

/// Decoded cmap content plus the owned table the compiled subtables are
/// written back into.
pub(crate) struct CharacterMap {
    table: Cmap,
    bmp: Option<BTreeMap<u32, GlyphId>>,
    full: Option<BTreeMap<u32, GlyphId>>,
    selectors: Option<BTreeMap<u32, SelectorMapping>>,
}

impl CharacterMap {
    pub(crate) fn from_font(font: &FontRef) -> Result<Self, AugmentError> {
        let cmap = font.cmap()?;
        let data = cmap.offset_data();
        let mut bmp = None;
        let mut full = None;
        let mut selectors = None;
        for record in cmap.encoding_records() {
            let subtable = record.subtable(data)?;
            if matches!(&subtable, ReadSubtable::Format2(_)) {
                return Err(AugmentError::Unsupported(
                    "cmap format 2 subtables cannot be rewritten".into(),
                ));
            }
            match (record.platform_id(), record.encoding_id()) {
                (PlatformId::Windows, WINDOWS_BMP_ENCODING) => match subtable {
                    ReadSubtable::Format4(subtable) if bmp.is_none() => {
                        bmp = Some(subtable.iter().collect());
                    }
                    ReadSubtable::Format4(_) => {}
                    _ => {
                        return Err(AugmentError::Unsupported(
                            "cmap subtable (platform=3, encoding=1) is not format 4".into(),
                        ))
                    }
                },
                (PlatformId::Windows, WINDOWS_FULL_REPERTOIRE_ENCODING) => match subtable {
                    ReadSubtable::Format12(subtable) if full.is_none() => {
                        full = Some(subtable.iter().collect());
                    }
                    ReadSubtable::Format12(_) => {}
                    _ => {
                        return Err(AugmentError::Unsupported(
                            "cmap subtable (platform=3, encoding=10) is not format 12".into(),
                        ))
                    }
                },
                (PlatformId::Unicode, UNICODE_VARIATION_ENCODING) => match subtable {
                    ReadSubtable::Format14(subtable) if selectors.is_none() => {
                        let mut decoded: BTreeMap<u32, SelectorMapping> = BTreeMap::new();
                        for (codepoint, selector, variant) in subtable.iter() {
                            let entry = decoded.entry(selector).or_default();
                            match variant {
                                MapVariant::UseDefault => {
                                    entry.default.insert(codepoint);
                                }
                                MapVariant::Variant(glyph) => {
                                    entry.non_default.insert(codepoint, glyph);
                                }
                            }
                        }
                        selectors = Some(decoded);
                    }
                    ReadSubtable::Format14(_) => {}
                    _ => {
                        return Err(AugmentError::Unsupported(
                            "cmap subtable (platform=0, encoding=5) is not format 14".into(),
                        ))
                    }
                },
                _ => {}
            }
        }
        Ok(CharacterMap { table: cmap.to_owned_table(), bmp, full, selectors })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        bmp: Option<BTreeMap<u32, GlyphId>>,
        full: Option<BTreeMap<u32, GlyphId>>,
        selectors: Option<BTreeMap<u32, SelectorMapping>>,
    ) -> Self {
        CharacterMap { table: Cmap::default(), bmp, full, selectors }
    }

    /// The scalar→glyph view presence checks go through: the
    /// full-repertoire map when the font has one, else the BMP map.
    pub(crate) fn scalar_view(&self) -> BTreeMap<u32, GlyphId> {
        self.full.as_ref().or(self.bmp.as_ref()).cloned().unwrap_or_default()
    }

    pub(crate) fn sequence_view(&self) -> BTreeMap<(u32, u32), SequenceGlyph> {
        let mut view = BTreeMap::new();
        for (&selector, mapping) in self.selectors.iter().flatten() {
            for &base in &mapping.default {
                view.insert((base, selector), SequenceGlyph::Default);
            }
            for (&base, &glyph) in &mapping.non_default {
                view.insert((base, selector), SequenceGlyph::Variant(glyph));
            }
        }
        view
    }

    /// Applies the registry's additions and compiles the owned subtables
    /// back into the cmap table.
    pub(crate) fn build(
        mut self,
        registry: &GlyphRegistry,
        events: &mut dyn EventSink,
    ) -> Result<Cmap, AugmentError> {
        for &(codepoint, glyph) in registry.added_scalars() {
            if codepoint > 0xFFFF && self.full.is_none() {
                // seeded with everything mapped so far, like the original tool
                self.full = Some(self.bmp.clone().unwrap_or_default());
                events.emit(Event::MappingCreated(MappingKind::Supplementary));
            }
            if codepoint <= 0xFFFF {
                if self.bmp.is_none() {
                    self.bmp = Some(BTreeMap::new());
                    events.emit(Event::MappingCreated(MappingKind::Bmp));
                }
                if let Some(bmp) = self.bmp.as_mut() {
                    // an existing BMP entry wins over the new glyph
                    bmp.entry(codepoint).or_insert(glyph);
                }
            }
            if let Some(full) = self.full.as_mut() {
                full.insert(codepoint, glyph);
            }
        }

        let defaults = registry.added_defaults();
        let variants = registry.added_variants();
        if (!defaults.is_empty() || !variants.is_empty()) && self.selectors.is_none() {
            self.selectors = Some(BTreeMap::new());
            events.emit(Event::MappingCreated(MappingKind::Variation));
        }
        if let Some(selectors) = self.selectors.as_mut() {
            for &(base, selector) in defaults {
                selectors.entry(selector).or_default().default.insert(base);
            }
            for &(base, selector, glyph) in variants {
                selectors.entry(selector).or_default().non_default.insert(base, glyph);
            }
        }

        if let Some(bmp) = self.bmp.as_ref() {
            set_record(
                &mut self.table,
                PlatformId::Windows,
                WINDOWS_BMP_ENCODING,
                build_format_4(bmp)?,
            );
        }
        if let Some(full) = self.full.as_ref() {
            set_record(
                &mut self.table,
                PlatformId::Windows,
                WINDOWS_FULL_REPERTOIRE_ENCODING,
                build_format_12(full),
            );
        }
        if let Some(selectors) = self.selectors.as_ref() {
            set_record(
                &mut self.table,
                PlatformId::Unicode,
                UNICODE_VARIATION_ENCODING,
                build_format_14(selectors)?,
            );
        }
        Ok(self.table)
    }
}

/// Replaces the subtable of the (platform, encoding) record, adding the
/// record at its sorted position when the font had none.
fn set_record(table: &mut Cmap, platform: PlatformId, encoding: u16, subtable: CmapSubtable) {
    let records = &mut table.encoding_records;
    if let Some(record) = records
        .iter_mut()
        .find(|r| r.platform_id == platform && r.encoding_id == encoding)
    {
        record.subtable = OffsetMarker::new(subtable);
        return;
    }
    let key = (platform as u16, encoding);
    let position = records
        .iter()
        .position(|r| (r.platform_id as u16, r.encoding_id) > key)
        .unwrap_or(records.len());
    records.insert(position, EncodingRecord::new(platform, encoding, subtable));
}

fn format_4_binary_search(seg_count: u16) -> (u16, u16, u16) {
    // searchRange = 2 * 2^floor(log2(segCount)), entrySelector = log2(searchRange / 2)
    let entry_selector = 15 - (seg_count | 1).leading_zeros() as u16;
    let search_range = 2u16 << entry_selector;
    let range_shift = seg_count * 2 - search_range;
    (search_range, entry_selector, range_shift)
}

fn size_of_format_4(seg_count: u32) -> u32 {
    // 8 uint16 header fields, 4 parallel arrays of seg_count uint16s
    // (the reserved pad rides with the header), empty glyphIdArray
    8 * 2 + seg_count * 4 * 2
}

/// Compiles a format 4 subtable from the merged BMP map. Segments are runs
/// where codepoint and glyph id advance together, so idRangeOffset stays 0
/// throughout.
fn build_format_4(mappings: &BTreeMap<u32, GlyphId>) -> Result<CmapSubtable, AugmentError> {
    let mut start_code: Vec<u16> = Vec::new();
    let mut end_code: Vec<u16> = Vec::new();
    let mut id_delta: Vec<i16> = Vec::new();

    fn delta(codepoint: u16, glyph: u16) -> i16 {
        (glyph as i32 - codepoint as i32).rem_euclid(0x10000) as u16 as i16
    }

    let mut sentinel_glyph = None;
    let mut prev: Option<(u16, u16)> = None;
    for (&codepoint, &glyph) in mappings {
        if codepoint > 0xFFFF {
            break;
        }
        let Ok(glyph) = u16::try_from(glyph.to_u32()) else {
            // not representable here; the full-repertoire subtable has it
            continue;
        };
        let codepoint = codepoint as u16;
        if codepoint == 0xFFFF {
            // rides in the closing segment
            sentinel_glyph = Some(glyph);
            continue;
        }
        if prev == Some((codepoint.wrapping_sub(1), glyph.wrapping_sub(1))) {
            *end_code.last_mut().unwrap() = codepoint;
        } else {
            start_code.push(codepoint);
            end_code.push(codepoint);
            id_delta.push(delta(codepoint, glyph));
        }
        prev = Some((codepoint, glyph));
    }

    start_code.push(0xFFFF);
    end_code.push(0xFFFF);
    id_delta.push(match sentinel_glyph {
        Some(glyph) => delta(0xFFFF, glyph),
        None => 1,
    });

    let seg_count = start_code.len() as u32;
    let length = size_of_format_4(seg_count);
    if length > u16::MAX as u32 {
        return Err(AugmentError::Unsupported(format!(
            "cmap format 4 subtable overflows with {seg_count} segments"
        )));
    }
    let seg_count = seg_count as u16;
    Ok(CmapSubtable::format_4(
        0, // language, zero outside the Macintosh platform
        end_code,
        start_code,
        id_delta,
        vec![0; seg_count as usize],
        vec![],
    ))
}

/// Compiles a format 12 subtable: maximal sequential map groups.
fn build_format_12(mappings: &BTreeMap<u32, GlyphId>) -> CmapSubtable {
    let mut groups: Vec<SequentialMapGroup> = Vec::new();
    for (&codepoint, &glyph) in mappings {
        let glyph = glyph.to_u32();
        match groups.last_mut() {
            Some(group)
                if group.end_char_code + 1 == codepoint
                    && group.start_glyph_id + (codepoint - group.start_char_code) == glyph =>
            {
                group.end_char_code = codepoint;
            }
            _ => groups.push(SequentialMapGroup::new(codepoint, codepoint, glyph)),
        }
    }
    CmapSubtable::format_12(0, groups)
}

fn unicode_ranges(values: &BTreeSet<u32>) -> Vec<UnicodeRange> {
    let mut ranges: Vec<UnicodeRange> = Vec::new();
    for &value in values {
        match ranges.last_mut() {
            Some(range)
                if u32::from(range.start_unicode_value) + range.additional_count as u32 + 1
                    == value
                    && range.additional_count < u8::MAX =>
            {
                range.additional_count += 1;
            }
            _ => ranges.push(UnicodeRange {
                start_unicode_value: Uint24::new(value),
                additional_count: 0,
            }),
        }
    }
    ranges
}

/// Compiles a format 14 subtable. Subtable length and record counts are
/// computed here; selector records, ranges and mappings are emitted sorted
/// as the format requires.
pub(crate) fn build_format_14(
    selectors: &BTreeMap<u32, SelectorMapping>,
) -> Result<CmapSubtable, AugmentError> {
    const HEADER_LEN: u32 = 2 + 4 + 4;
    const SELECTOR_RECORD_LEN: u32 = 3 + 4 + 4;
    const RANGE_LEN: u32 = 3 + 1;
    const MAPPING_LEN: u32 = 3 + 2;

    let mut records = Vec::with_capacity(selectors.len());
    let mut length = HEADER_LEN + SELECTOR_RECORD_LEN * selectors.len() as u32;
    for (&selector, mapping) in selectors {
        let default_uvs = if mapping.default.is_empty() {
            None
        } else {
            let ranges = unicode_ranges(&mapping.default);
            length += 4 + RANGE_LEN * ranges.len() as u32;
            Some(DefaultUvs { num_unicode_value_ranges: ranges.len() as u32, ranges })
        };
        let non_default_uvs = if mapping.non_default.is_empty() {
            None
        } else {
            let mut uvs_mapping = Vec::with_capacity(mapping.non_default.len());
            for (&codepoint, &glyph) in &mapping.non_default {
                let glyph = u16::try_from(glyph.to_u32()).map_err(|_| {
                    AugmentError::Unsupported(format!(
                        "glyph id {} does not fit in the variation subtable",
                        glyph.to_u32()
                    ))
                })?;
                uvs_mapping
                    .push(UvsMapping { unicode_value: Uint24::new(codepoint), glyph_id: glyph });
            }
            length += 4 + MAPPING_LEN * uvs_mapping.len() as u32;
            Some(NonDefaultUvs { num_uvs_mappings: uvs_mapping.len() as u32, uvs_mapping })
        };
        records.push(VariationSelector {
            var_selector: Uint24::new(selector),
            default_uvs: NullableOffsetMarker::new(default_uvs),
            non_default_uvs: NullableOffsetMarker::new(non_default_uvs),
        });
    }
    Ok(CmapSubtable::format_14(length, records.len() as u32, records))
}
