use serde::Serialize;

const AFFINITY_PREFIX: &str = "plb_include_";
const ANTI_AFFINITY_PREFIX: &str = "plb_exclude_";
const IGNORE_TAG: &str = "plb_ignore_vm";

/// A balancing directive carried in a VM's tag string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementTag {
    /// Co-locate with every VM carrying the same group name.
    Affinity(String),
    /// Spread away from every VM carrying the same group name.
    AntiAffinity(String),
    /// Never move this VM.
    Ignore,
}

impl PlacementTag {
    /// Parse a single tag. Tags that are not balancing directives yield `None`.
    pub fn parse(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        if tag == IGNORE_TAG {
            return Some(PlacementTag::Ignore);
        }
        if let Some(group) = tag.strip_prefix(AFFINITY_PREFIX) {
            return (!group.is_empty()).then(|| PlacementTag::Affinity(group.to_string()));
        }
        if let Some(group) = tag.strip_prefix(ANTI_AFFINITY_PREFIX) {
            return (!group.is_empty()).then(|| PlacementTag::AntiAffinity(group.to_string()));
        }
        None
    }
}

/// The resolved grouping of one VM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Grouping {
    pub affinity: Option<String>,
    pub anti_affinity: Option<String>,
    pub ignore: bool,
}

impl Grouping {
    /// Resolve a semicolon-delimited tag string. The first affinity and the
    /// first anti-affinity tag win; later ones of the same kind are dropped.
    pub fn from_tags(tags: &str) -> Self {
        let mut grouping = Grouping::default();
        for tag in tags.split(';').filter_map(PlacementTag::parse) {
            match tag {
                PlacementTag::Affinity(group) => {
                    grouping.affinity.get_or_insert(group);
                }
                PlacementTag::AntiAffinity(group) => {
                    grouping.anti_affinity.get_or_insert(group);
                }
                PlacementTag::Ignore => grouping.ignore = true,
            }
        }
        grouping
    }
}
