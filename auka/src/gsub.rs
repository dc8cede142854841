//! Merging alternate substitution rules into the font's GSUB table.
//!
//! Rules live under the `DFLT` script's default language system. A feature
//! managed by this tool references exactly one plain alternate-substitution
//! lookup; anything else found under a requested feature means the table's
//! structure is not ours to change, and the run aborts before the font is
//! written.

use write_fonts::read::{FontRef, ReadError, TableProvider};
use write_fonts::from_obj::ToOwnedTable;
use write_fonts::tables::gsub::{
    AlternateSet, AlternateSubstFormat1, Gsub, SubstitutionLookup, SubstitutionLookupList,
};
use write_fonts::tables::layout::{
    CoverageTable, Feature, FeatureList, FeatureRecord, LangSys, Lookup, LookupFlag, Script,
    ScriptList, ScriptRecord,
};
use write_fonts::types::{GlyphId, GlyphId16, Tag};
use write_fonts::{NullableOffsetMarker, OffsetMarker};

use crate::event::{Event, EventSink, SkipReason};
use crate::input::{GlyphKey, RuleRecord};
use crate::registry::GlyphRegistry;
use crate::AugmentError;

const DEFAULT_SCRIPT: Tag = Tag::new(b"DFLT");

pub(crate) struct RuleMerger {
    gsub: Gsub,
}

impl RuleMerger {
    pub(crate) fn from_font(font: &FontRef) -> Result<Self, AugmentError> {
        let gsub = match font.gsub() {
            Ok(gsub) => gsub.to_owned_table(),
            Err(ReadError::TableIsMissing(_)) => Gsub::new(
                ScriptList::default(),
                FeatureList::default(),
                SubstitutionLookupList::new(Vec::new()),
            ),
            Err(err) => return Err(err.into()),
        };
        Ok(RuleMerger { gsub })
    }

    #[cfg(test)]
    pub(crate) fn from_table(gsub: Gsub) -> Self {
        RuleMerger { gsub }
    }

    pub(crate) fn into_table(self) -> Gsub {
        self.gsub
    }

    pub(crate) fn merge(
        &mut self,
        rule: &RuleRecord,
        registry: &GlyphRegistry,
        events: &mut dyn EventSink,
    ) -> Result<(), AugmentError> {
        let feature = rule.feature;
        let Some(target) = registry.resolve(&rule.target) else {
            events.emit(Event::RuleSkipped {
                feature,
                key: rule.target,
                reason: SkipReason::NotInFont,
            });
            return Ok(());
        };
        let Ok(target) = u16::try_from(target.to_u32()).map(GlyphId16::new) else {
            events.emit(Event::RuleSkipped {
                feature,
                key: rule.target,
                reason: SkipReason::NotAddressable,
            });
            return Ok(());
        };

        let mut alternates: Vec<GlyphId16> = Vec::new();
        for key in &rule.alternates {
            let Some(glyph) = registry.resolve(key) else {
                events.emit(Event::AlternateDropped {
                    feature,
                    key: *key,
                    reason: SkipReason::NotInFont,
                });
                continue;
            };
            let Ok(glyph) = u16::try_from(glyph.to_u32()).map(GlyphId16::new) else {
                events.emit(Event::AlternateDropped {
                    feature,
                    key: *key,
                    reason: SkipReason::NotAddressable,
                });
                continue;
            };
            if glyph == target {
                events.emit(Event::AlternateDropped {
                    feature,
                    key: *key,
                    reason: SkipReason::SameAsTarget,
                });
                continue;
            }
            if !alternates.contains(&glyph) {
                alternates.push(glyph);
            }
        }
        if alternates.is_empty() {
            // nothing left to merge; the hierarchy is left untouched
            events.emit(Event::RuleSkipped {
                feature,
                key: rule.target,
                reason: SkipReason::NoAlternates,
            });
            return Ok(());
        }

        let lookup_index = self.feature_lookup(feature, events)?;
        self.apply(lookup_index, feature, target, alternates, events)
    }

    /// The lookup list index the feature's rules go into, creating the
    /// script/langsys/feature/lookup levels that are missing.
    fn feature_lookup(
        &mut self,
        feature: Tag,
        events: &mut dyn EventSink,
    ) -> Result<usize, AugmentError> {
        let feature_index = self.ensure_feature(feature, events)?;
        let lookup_indices = self.gsub.feature_list.as_ref().feature_records[feature_index]
            .feature
            .as_ref()
            .lookup_list_indices
            .clone();
        match lookup_indices.as_slice() {
            [] => {
                let lookups = &mut self.gsub.lookup_list.as_mut().lookups;
                let lookup_index = lookups.len();
                let lookup_index16 = u16::try_from(lookup_index).map_err(|_| {
                    AugmentError::Invariant("the GSUB lookup list is full".into())
                })?;
                lookups.push(OffsetMarker::new(SubstitutionLookup::Alternate(Lookup::new(
                    LookupFlag::empty(),
                    Vec::new(),
                ))));
                self.gsub.feature_list.as_mut().feature_records[feature_index]
                    .feature
                    .as_mut()
                    .lookup_list_indices
                    .push(lookup_index16);
                Ok(lookup_index)
            }
            &[lookup_index] => {
                let lookup_index = lookup_index as usize;
                self.check_owned(feature, lookup_index)?;
                Ok(lookup_index)
            }
            _ => Err(AugmentError::Invariant(format!(
                "feature '{feature}' has multiple lookups: {lookup_indices:?}"
            ))),
        }
    }

    /// An existing lookup may only be touched when it is a plain alternate
    /// lookup that no differently-tagged feature also references.
    fn check_owned(&self, feature: Tag, lookup_index: usize) -> Result<(), AugmentError> {
        let lookup = self
            .gsub
            .lookup_list
            .as_ref()
            .lookups
            .get(lookup_index)
            .ok_or_else(|| {
                AugmentError::Invariant(format!(
                    "feature '{feature}' references missing lookup {lookup_index}"
                ))
            })?;
        if !matches!(lookup.as_ref(), SubstitutionLookup::Alternate(_)) {
            return Err(AugmentError::Invariant(format!(
                "feature '{feature}' has a {} substitution lookup where an alternate lookup was expected",
                lookup_kind(lookup.as_ref())
            )));
        }
        for record in &self.gsub.feature_list.as_ref().feature_records {
            if record.feature_tag != feature
                && record
                    .feature
                    .as_ref()
                    .lookup_list_indices
                    .contains(&(lookup_index as u16))
            {
                return Err(AugmentError::Invariant(format!(
                    "lookup {lookup_index} of feature '{feature}' is shared with feature '{}'",
                    record.feature_tag
                )));
            }
        }
        Ok(())
    }

    fn ensure_feature(
        &mut self,
        feature: Tag,
        events: &mut dyn EventSink,
    ) -> Result<usize, AugmentError> {
        let script_index = self.ensure_default_script(events);
        if let Some(found) = self.find_feature(script_index, feature) {
            return Ok(found);
        }
        let feature_list = self.gsub.feature_list.as_mut();
        let feature_index = feature_list.feature_records.len();
        let feature_index16 = u16::try_from(feature_index)
            .map_err(|_| AugmentError::Invariant("the GSUB feature list is full".into()))?;
        feature_list.feature_records.push(FeatureRecord {
            feature_tag: feature,
            feature: OffsetMarker::new(Feature {
                feature_params: NullableOffsetMarker::new(None),
                lookup_list_indices: Vec::new(),
            }),
        });
        events.emit(Event::FeatureCreated(feature));
        self.gsub.script_list.as_mut().script_records[script_index]
            .script
            .as_mut()
            .default_lang_sys
            .as_mut()
            .expect("ensured above")
            .feature_indices
            .push(feature_index16);
        Ok(feature_index)
    }

    fn find_feature(&self, script_index: usize, feature: Tag) -> Option<usize> {
        let feature_list = self.gsub.feature_list.as_ref();
        let langsys = self.gsub.script_list.as_ref().script_records[script_index]
            .script
            .as_ref()
            .default_lang_sys
            .as_ref()?;
        langsys
            .feature_indices
            .iter()
            .map(|&index| index as usize)
            .find(|&index| {
                feature_list.feature_records.get(index).map(|r| r.feature_tag) == Some(feature)
            })
    }

    /// Makes sure the `DFLT` script and its default language system exist,
    /// returning the script record index. Records stay sorted by tag.
    fn ensure_default_script(&mut self, events: &mut dyn EventSink) -> usize {
        let script_list = self.gsub.script_list.as_mut();
        let script_index = match script_list
            .script_records
            .iter()
            .position(|record| record.script_tag == DEFAULT_SCRIPT)
        {
            Some(index) => index,
            None => {
                let index = script_list
                    .script_records
                    .iter()
                    .position(|record| record.script_tag > DEFAULT_SCRIPT)
                    .unwrap_or(script_list.script_records.len());
                script_list.script_records.insert(
                    index,
                    ScriptRecord {
                        script_tag: DEFAULT_SCRIPT,
                        script: OffsetMarker::new(Script {
                            default_lang_sys: NullableOffsetMarker::new(None),
                            lang_sys_records: Vec::new(),
                        }),
                    },
                );
                events.emit(Event::ScriptCreated(DEFAULT_SCRIPT));
                index
            }
        };
        let script = script_list.script_records[script_index].script.as_mut();
        if script.default_lang_sys.as_ref().is_none() {
            script.default_lang_sys = NullableOffsetMarker::new(Some(LangSys {
                required_feature_index: 0xFFFF,
                feature_indices: Vec::new(),
            }));
            events.emit(Event::DefaultLangSysCreated(DEFAULT_SCRIPT));
        }
        script_index
    }

    /// Merges the rule into the owned alternate lookup: union with any
    /// existing set (existing order first), or a new coverage entry.
    fn apply(
        &mut self,
        lookup_index: usize,
        feature: Tag,
        target: GlyphId16,
        new_alternates: Vec<GlyphId16>,
        events: &mut dyn EventSink,
    ) -> Result<(), AugmentError> {
        let SubstitutionLookup::Alternate(lookup) =
            self.gsub.lookup_list.as_mut().lookups[lookup_index].as_mut()
        else {
            return Err(AugmentError::Invariant(format!(
                "lookup {lookup_index} of feature '{feature}' changed type mid-run"
            )));
        };

        for marker in &mut lookup.subtables {
            let subtable = marker.as_mut();
            let Some(position) = subtable.coverage.as_ref().iter().position(|g| g == target)
            else {
                continue;
            };
            let set = subtable
                .alternate_sets
                .get_mut(position)
                .ok_or_else(|| {
                    AugmentError::Invariant(format!(
                        "alternate set missing for a coverage entry of feature '{feature}'"
                    ))
                })?
                .as_mut();
            let before = set.alternate_glyph_ids.len();
            for glyph in &new_alternates {
                if !set.alternate_glyph_ids.contains(glyph) {
                    set.alternate_glyph_ids.push(*glyph);
                }
            }
            let alternates = set.alternate_glyph_ids.iter().map(|&g| g.into()).collect();
            let event = if set.alternate_glyph_ids.len() == before {
                Event::RuleUnchanged { feature, target: target.into(), alternates }
            } else {
                Event::RuleAdded { feature, target: target.into(), alternates }
            };
            events.emit(event);
            return Ok(());
        }

        let alternates: Vec<GlyphId> = new_alternates.iter().map(|&g| g.into()).collect();
        match lookup.subtables.first_mut() {
            None => {
                let coverage: CoverageTable = std::iter::once(target).collect();
                lookup.subtables.push(OffsetMarker::new(AlternateSubstFormat1::new(
                    coverage,
                    vec![AlternateSet::new(new_alternates)],
                )));
            }
            Some(marker) => {
                let subtable = marker.as_mut();
                let mut glyphs: Vec<GlyphId16> = subtable.coverage.as_ref().iter().collect();
                let position = glyphs.binary_search(&target).unwrap_or_else(|p| p);
                glyphs.insert(position, target);
                subtable.coverage = OffsetMarker::new(glyphs.into_iter().collect());
                subtable
                    .alternate_sets
                    .insert(position, OffsetMarker::new(AlternateSet::new(new_alternates)));
            }
        }
        events.emit(Event::RuleAdded { feature, target: target.into(), alternates });
        Ok(())
    }
}

fn lookup_kind(lookup: &SubstitutionLookup) -> &'static str {
    match lookup {
        SubstitutionLookup::Single(_) => "single",
        SubstitutionLookup::Multiple(_) => "multiple",
        SubstitutionLookup::Alternate(_) => "alternate",
        SubstitutionLookup::Ligature(_) => "ligature",
        SubstitutionLookup::Contextual(_) => "contextual",
        SubstitutionLookup::ChainContextual(_) => "chained contextual",
        SubstitutionLookup::Extension(_) => "extension",
        SubstitutionLookup::Reverse(_) => "reverse chained",
    }
}
