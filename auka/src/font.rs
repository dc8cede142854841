//! Font-level plumbing: the snapshot the run works from, blank-glyph
//! bookkeeping across `loca`/`hmtx`/`vmtx`/`maxp`/`post`, and assembly of
//! the output font.
//!
//! A blank glyph contributes no `glyf` data at all, so appending glyphs
//! means repeating the final `loca` offset. The output always carries the
//! long `loca` format and one long metric per glyph, which is what the
//! original tool serialized as well.

use std::path::{Path, PathBuf};

use write_fonts::from_obj::FromTableRef;
use write_fonts::read::tables::post::DEFAULT_GLYPH_NAMES;
use write_fonts::read::{FontRef, TableProvider};
use write_fonts::tables::cmap::Cmap;
use write_fonts::tables::gsub::Gsub;
use write_fonts::tables::maxp::Maxp;
use write_fonts::tables::post::Post;
use write_fonts::types::Tag;
use write_fonts::FontBuilder;

use crate::registry::GlyphRegistry;
use crate::AugmentError;

/// Advance given to every blank glyph, in font units.
const BLANK_ADVANCE: u16 = 1024;

const SFNT_CHECKSUM: u32 = 0xB1B0_AFBA;

// head field offsets
const CHECKSUM_ADJUSTMENT_RANGE: std::ops::Range<usize> = 8..12;
const INDEX_TO_LOC_FORMAT_RANGE: std::ops::Range<usize> = 50..52;
// hhea/vhea keep their metric count at the same offset
const NUM_LONG_METRICS_RANGE: std::ops::Range<usize> = 34..36;

pub(crate) fn glyph_count(font: &FontRef) -> Result<u32, AugmentError> {
    Ok(font.maxp()?.num_glyphs() as u32)
}

/// Puts the run's tables together into a new font binary.
pub(crate) fn assemble(
    font: &FontRef,
    registry: &GlyphRegistry,
    cmap: Cmap,
    gsub: Option<Gsub>,
    sequences_registered: bool,
) -> Result<Vec<u8>, AugmentError> {
    let mut builder = FontBuilder::new();
    builder.add_table(&cmap)?;
    if let Some(gsub) = &gsub {
        builder.add_table(gsub)?;
    }
    if registry.added_count() > 0 {
        append_blank_glyphs(font, registry, &mut builder)?;
    }
    if sequences_registered {
        set_variation_range_bit(font, &mut builder);
    }
    builder.copy_missing_tables(font.clone());
    let mut bytes = builder.build();
    update_checksum_adjustment(&mut bytes);
    Ok(bytes)
}

fn append_blank_glyphs(
    font: &FontRef,
    registry: &GlyphRegistry,
    builder: &mut FontBuilder,
) -> Result<(), AugmentError> {
    let added = registry.added_count() as u32;
    let old_count = glyph_count(font)?;
    let new_count = u16::try_from(old_count + added).map_err(|_| {
        AugmentError::Unsupported(format!(
            "cannot add {added} glyphs to a font that already has {old_count}"
        ))
    })?;

    if font.data_for_tag(Tag::new(b"glyf")).is_none() {
        return Err(AugmentError::Unsupported(
            "only fonts with glyf outlines are supported".into(),
        ));
    }

    // loca: blank glyphs repeat the final offset; always written long
    let head = font.head()?;
    let loca = font
        .data_for_tag(Tag::new(b"loca"))
        .ok_or_else(|| AugmentError::Unsupported("font has no loca table".into()))?;
    let loca = loca.as_bytes();
    let mut offsets: Vec<u32> = if head.index_to_loc_format() == 0 {
        loca.chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]) as u32 * 2)
            .collect()
    } else {
        loca.chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    };
    let last = *offsets
        .last()
        .ok_or_else(|| AugmentError::Unsupported("font has an empty loca table".into()))?;
    offsets.extend(std::iter::repeat(last).take(added as usize));
    let mut loca_out = Vec::with_capacity(offsets.len() * 4);
    for offset in &offsets {
        loca_out.extend_from_slice(&offset.to_be_bytes());
    }
    builder.add_raw(Tag::new(b"loca"), loca_out);

    // head: long loca, checksum adjustment zeroed until assembly
    let mut head_out = head.offset_data().as_bytes().to_vec();
    head_out
        .get_mut(CHECKSUM_ADJUSTMENT_RANGE)
        .unwrap()
        .copy_from_slice(&[0; 4]);
    head_out
        .get_mut(INDEX_TO_LOC_FORMAT_RANGE)
        .unwrap()
        .copy_from_slice(&1i16.to_be_bytes());
    builder.add_raw(Tag::new(b"head"), head_out);

    // horizontal metrics, one long record per glyph
    let hmtx = font.hmtx()?;
    let metrics: Vec<(u16, i16)> =
        hmtx.h_metrics().iter().map(|m| (m.advance(), m.side_bearing())).collect();
    let bearings: Vec<i16> = hmtx.left_side_bearings().iter().map(|b| b.get()).collect();
    builder.add_raw(Tag::new(b"hmtx"), expand_metrics(&metrics, &bearings, old_count, added));
    let hhea = font.hhea()?;
    let mut hhea_out = hhea.offset_data().as_bytes().to_vec();
    hhea_out
        .get_mut(NUM_LONG_METRICS_RANGE)
        .unwrap()
        .copy_from_slice(&new_count.to_be_bytes());
    builder.add_raw(Tag::new(b"hhea"), hhea_out);

    // vertical metrics too, when the font has them
    if let (Ok(vmtx), Ok(vhea)) = (font.vmtx(), font.vhea()) {
        let metrics: Vec<(u16, i16)> =
            vmtx.v_metrics().iter().map(|m| (m.advance(), m.side_bearing())).collect();
        let bearings: Vec<i16> = vmtx.top_side_bearings().iter().map(|b| b.get()).collect();
        builder.add_raw(Tag::new(b"vmtx"), expand_metrics(&metrics, &bearings, old_count, added));
        let mut vhea_out = vhea.offset_data().as_bytes().to_vec();
        vhea_out
            .get_mut(NUM_LONG_METRICS_RANGE)
            .unwrap()
            .copy_from_slice(&new_count.to_be_bytes());
        builder.add_raw(Tag::new(b"vhea"), vhea_out);
    }

    let mut maxp = Maxp::from_table_ref(&font.maxp()?);
    maxp.num_glyphs = new_count;
    builder.add_table(&maxp)?;

    if let Ok(post) = font.post() {
        if let Some(post) = extend_post(&post, registry) {
            builder.add_table(&post)?;
        }
    }

    Ok(())
}

/// One long metric per glyph: existing metrics expanded (the trailing
/// side-bearing run reuses the final advance), blanks appended.
fn expand_metrics(
    long_metrics: &[(u16, i16)],
    bearings: &[i16],
    glyph_count: u32,
    added: u32,
) -> Vec<u8> {
    let last_advance = long_metrics.last().map(|m| m.0).unwrap_or_default();
    let mut out = Vec::with_capacity((glyph_count + added) as usize * 4);
    for glyph in 0..glyph_count as usize {
        let (advance, side_bearing) = match long_metrics.get(glyph) {
            Some(&metric) => metric,
            None => (
                last_advance,
                bearings.get(glyph - long_metrics.len()).copied().unwrap_or_default(),
            ),
        };
        out.extend_from_slice(&advance.to_be_bytes());
        out.extend_from_slice(&side_bearing.to_be_bytes());
    }
    for _ in 0..added {
        out.extend_from_slice(&BLANK_ADVANCE.to_be_bytes());
        out.extend_from_slice(&0i16.to_be_bytes());
    }
    out
}

/// Extends a version 2 `post` table with names for the new glyphs. Any
/// other version needs no update.
fn extend_post(
    post: &write_fonts::read::tables::post::Post,
    registry: &GlyphRegistry,
) -> Option<Post> {
    let mut owned = Post::from_table_ref(post);
    let name_index = owned.glyph_name_index.as_ref()?;
    let mut names: Vec<String> = Vec::with_capacity(name_index.len() + registry.added_count());
    for &index in name_index {
        let index = index as usize;
        let name = match DEFAULT_GLYPH_NAMES.get(index) {
            Some(name) => (*name).to_string(),
            None => owned
                .string_data
                .as_ref()
                .and_then(|data| data.get(index - DEFAULT_GLYPH_NAMES.len()))
                .map(|s| s.as_ref().to_string())
                .unwrap_or_default(),
        };
        names.push(name);
    }
    names.extend(registry.new_glyph_names());
    let built = Post::new_v2(names.iter().map(String::as_str));
    owned.num_glyphs = built.num_glyphs;
    owned.glyph_name_index = built.glyph_name_index;
    owned.string_data = built.string_data;
    Some(owned)
}

/// Sets the Variation Selectors bit (Unicode range 57) of
/// `OS/2.ulUnicodeRange2`, leaving every other bit alone.
fn set_variation_range_bit(font: &FontRef, builder: &mut FontBuilder) {
    let Some(data) = font.data_for_tag(Tag::new(b"OS/2")) else {
        return;
    };
    let mut out = data.as_bytes().to_vec();
    if out.len() < 50 {
        return;
    }
    let mut range = u32::from_be_bytes([out[46], out[47], out[48], out[49]]);
    range |= 1 << (57 - 32);
    out[46..50].copy_from_slice(&range.to_be_bytes());
    builder.add_raw(Tag::new(b"OS/2"), out);
}

/// Recomputes `head.checkSumAdjustment` over the assembled font, refreshing
/// the head entry of the table directory along the way (both are defined
/// over a zeroed adjustment field).
fn update_checksum_adjustment(bytes: &mut [u8]) {
    let Some((record_offset, head_offset, head_len)) = head_directory_entry(bytes) else {
        return;
    };
    let start = head_offset + CHECKSUM_ADJUSTMENT_RANGE.start;
    let end = head_offset + CHECKSUM_ADJUSTMENT_RANGE.end;
    if end > bytes.len() || head_offset + head_len > bytes.len() {
        return;
    }
    bytes[start..end].copy_from_slice(&[0; 4]);
    let head_sum =
        write_fonts::read::tables::compute_checksum(&bytes[head_offset..head_offset + head_len]);
    bytes[record_offset + 4..record_offset + 8].copy_from_slice(&head_sum.to_be_bytes());
    let sum = write_fonts::read::tables::compute_checksum(bytes);
    let adjustment = SFNT_CHECKSUM.wrapping_sub(sum);
    bytes[start..end].copy_from_slice(&adjustment.to_be_bytes());
}

/// Locates head in the table directory: (record offset, table offset,
/// table length).
fn head_directory_entry(bytes: &[u8]) -> Option<(usize, usize, usize)> {
    let num_tables = u16::from_be_bytes([*bytes.get(4)?, *bytes.get(5)?]) as usize;
    for index in 0..num_tables {
        let record_offset = 12 + index * 16;
        let record = bytes.get(record_offset..record_offset + 16)?;
        if &record[..4] == b"head" {
            let offset = u32::from_be_bytes([record[8], record[9], record[10], record[11]]);
            let length = u32::from_be_bytes([record[12], record[13], record[14], record[15]]);
            return Some((record_offset, offset as usize, length as usize));
        }
    }
    None
}

/// The default output path: a sibling of the input with `_new` appended to
/// the stem.
pub fn output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("font");
    let name = match input.extension().and_then(|e| e.to_str()) {
        Some(extension) => format!("{stem}_new.{extension}"),
        None => format!("{stem}_new"),
    };
    input.with_file_name(name)
}
