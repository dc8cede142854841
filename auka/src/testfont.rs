//! In-memory fixture fonts for tests: just enough of a TrueType binary for
//! a run to load, mutate and reassemble.

use write_fonts::tables::cmap::Cmap;
use write_fonts::tables::gsub::{
    AlternateSet, AlternateSubstFormat1, Gsub, SubstitutionLookup, SubstitutionLookupList,
};
use write_fonts::tables::layout::{
    Feature, FeatureList, FeatureRecord, LangSys, Lookup, LookupFlag, Script, ScriptList,
    ScriptRecord,
};
use write_fonts::tables::post::Post;
use write_fonts::types::{GlyphId, GlyphId16, Tag};
use write_fonts::{FontBuilder, NullableOffsetMarker, OffsetMarker};

pub(crate) struct TestFont {
    glyphs: u16,
    mappings: Vec<(char, u32)>,
    gsub: Option<Gsub>,
    post_v2: bool,
    vertical: bool,
}

impl TestFont {
    pub(crate) fn new(glyphs: u16) -> Self {
        TestFont { glyphs, mappings: Vec::new(), gsub: None, post_v2: false, vertical: false }
    }

    pub(crate) fn mapping(mut self, c: char, glyph: u32) -> Self {
        self.mappings.push((c, glyph));
        self
    }

    pub(crate) fn post_v2(mut self) -> Self {
        self.post_v2 = true;
        self
    }

    pub(crate) fn vertical(mut self) -> Self {
        self.vertical = true;
        self
    }

    /// Wires `feature` under DFLT/dflt to two alternate lookups, a shape
    /// the merger must refuse to touch.
    pub(crate) fn two_lookup_feature(mut self, feature: Tag) -> Self {
        fn alternate_lookup() -> SubstitutionLookup {
            SubstitutionLookup::Alternate(Lookup::new(
                LookupFlag::empty(),
                vec![AlternateSubstFormat1::new(
                    std::iter::once(GlyphId16::new(1)).collect(),
                    vec![AlternateSet::new(vec![GlyphId16::new(2)])],
                )],
            ))
        }
        let script_list = ScriptList {
            script_records: vec![ScriptRecord {
                script_tag: Tag::new(b"DFLT"),
                script: OffsetMarker::new(Script {
                    default_lang_sys: NullableOffsetMarker::new(Some(LangSys {
                        required_feature_index: 0xFFFF,
                        feature_indices: vec![0],
                    })),
                    lang_sys_records: Vec::new(),
                }),
            }],
        };
        let feature_list = FeatureList {
            feature_records: vec![FeatureRecord {
                feature_tag: feature,
                feature: OffsetMarker::new(Feature {
                    feature_params: NullableOffsetMarker::new(None),
                    lookup_list_indices: vec![0, 1],
                }),
            }],
        };
        let lookup_list = SubstitutionLookupList::new(vec![alternate_lookup(), alternate_lookup()]);
        self.gsub = Some(Gsub::new(script_list, feature_list, lookup_list));
        self
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let mut builder = FontBuilder::new();
        let cmap =
            Cmap::from_mappings(self.mappings.iter().map(|&(c, g)| (c, GlyphId::new(g)))).unwrap();
        builder.add_table(&cmap).unwrap();
        if let Some(gsub) = &self.gsub {
            builder.add_table(gsub).unwrap();
        }
        builder.add_raw(Tag::new(b"head"), head_bytes());
        builder.add_raw(Tag::new(b"maxp"), maxp_bytes(self.glyphs));
        builder.add_raw(Tag::new(b"hhea"), hea_bytes(self.glyphs));
        builder.add_raw(Tag::new(b"hmtx"), metrics_bytes(self.glyphs, 500));
        builder.add_raw(Tag::new(b"loca"), vec![0u8; (self.glyphs as usize + 1) * 4]);
        builder.add_raw(Tag::new(b"glyf"), Vec::new());
        builder.add_raw(Tag::new(b"OS/2"), os2_bytes());
        if self.post_v2 {
            let names: Vec<String> = (0..self.glyphs)
                .map(|i| if i == 0 { ".notdef".to_string() } else { format!("g{i}") })
                .collect();
            let post = Post::new_v2(names.iter().map(String::as_str));
            builder.add_table(&post).unwrap();
        } else {
            builder.add_raw(Tag::new(b"post"), post_v3_bytes());
        }
        if self.vertical {
            builder.add_raw(Tag::new(b"vhea"), hea_bytes(self.glyphs));
            builder.add_raw(Tag::new(b"vmtx"), metrics_bytes(self.glyphs, 1000));
        }
        builder.build()
    }
}

fn head_bytes() -> Vec<u8> {
    let mut head = vec![0u8; 54];
    head[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes()); // version
    head[12..16].copy_from_slice(&0x5F0F_3CF5u32.to_be_bytes()); // magic
    head[18..20].copy_from_slice(&1024u16.to_be_bytes()); // unitsPerEm
    head[46..48].copy_from_slice(&8u16.to_be_bytes()); // lowestRecPPEM
    head[50..52].copy_from_slice(&1i16.to_be_bytes()); // indexToLocFormat: long
    head
}

fn maxp_bytes(glyphs: u16) -> Vec<u8> {
    let mut maxp = vec![0u8; 32];
    maxp[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    maxp[4..6].copy_from_slice(&glyphs.to_be_bytes());
    maxp
}

/// hhea and vhea share their layout, including the metric count at 34.
fn hea_bytes(glyphs: u16) -> Vec<u8> {
    let mut hea = vec![0u8; 36];
    hea[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes());
    hea[4..6].copy_from_slice(&800i16.to_be_bytes()); // ascender
    hea[6..8].copy_from_slice(&(-200i16).to_be_bytes()); // descender
    hea[34..36].copy_from_slice(&glyphs.to_be_bytes());
    hea
}

fn metrics_bytes(glyphs: u16, advance: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(glyphs as usize * 4);
    for _ in 0..glyphs {
        out.extend_from_slice(&advance.to_be_bytes());
        out.extend_from_slice(&0i16.to_be_bytes());
    }
    out
}

fn os2_bytes() -> Vec<u8> {
    let mut os2 = vec![0u8; 96];
    os2[0..2].copy_from_slice(&4u16.to_be_bytes()); // version
    os2
}

fn post_v3_bytes() -> Vec<u8> {
    let mut post = vec![0u8; 32];
    post[0..4].copy_from_slice(&0x0003_0000u32.to_be_bytes());
    post
}
