use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

static ACCESSION_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?P<current>[A-Z]{4}[0-9]{8})|(?P<intermediate>[A-Z]{2}[0-9]{6})|(?P<legacy>[A-Z][0-9]{5}))(?:\.[0-9]+)?$")
        .expect("accession shape pattern is valid")
});

/// Generation of the nucleotide accession format an identifier was issued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessionShape {
    /// One letter followed by five digits.
    Legacy,
    /// Two letters followed by six digits.
    Intermediate,
    /// Four letters followed by eight digits (WGS-style).
    Current,
}

/// A nucleotide accession without its version suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Accession(String);

impl Accession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Returns the shape of `value` when it is a well-formed accession, with or
/// without a `.version` suffix.
pub fn classify_shape(value: &str) -> Option<AccessionShape> {
    let captures = ACCESSION_SHAPE.captures(value)?;
    if captures.name("current").is_some() {
        Some(AccessionShape::Current)
    } else if captures.name("intermediate").is_some() {
        Some(AccessionShape::Intermediate)
    } else {
        Some(AccessionShape::Legacy)
    }
}

impl fmt::Display for Accession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Accession {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if classify_shape(normalized).is_none() {
            return Err(KiraError::InvalidAccession(value.to_string()));
        }
        let base = normalized
            .split_once('.')
            .map(|(base, _)| base)
            .unwrap_or(normalized);
        Ok(Self(base.to_string()))
    }
}

impl TryFrom<String> for Accession {
    type Error = KiraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Accession> for String {
    fn from(value: Accession) -> Self {
        value.0
    }
}

/// Sub-region of a deposited sequence, 1-based and inclusive on both ends as
/// in GenBank feature locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoordinateRange {
    pub start: u64,
    pub end: u64,
}

impl CoordinateRange {
    pub fn new(start: u64, end: u64) -> Result<Self, KiraError> {
        if start == 0 || end < start {
            return Err(KiraError::InvalidRange(format!("{start}.{end}")));
        }
        Ok(Self { start, end })
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Byte range into a 0-based sequence buffer, or `None` when the range
    /// runs past the end of a sequence of `sequence_len` bases.
    pub fn slice_bounds(&self, sequence_len: usize) -> Option<std::ops::Range<usize>> {
        let start = usize::try_from(self.start - 1).ok()?;
        let end = usize::try_from(self.end).ok()?;
        (end <= sequence_len).then_some(start..end)
    }
}

impl fmt::Display for CoordinateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}.{})", self.start, self.end)
    }
}

/// One resolved reference from a row's identifier field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessionDescriptor {
    pub accession: Accession,
    pub partition: Option<String>,
    pub range: Option<CoordinateRange>,
}

impl AccessionDescriptor {
    /// Number of bases this descriptor contributes from a full record of
    /// `full_len` bases.
    pub fn extracted_len(&self, full_len: u64) -> u64 {
        match self.range {
            Some(range) => range.len(),
            None => full_len,
        }
    }
}

impl fmt::Display for AccessionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(label) = &self.partition {
            write!(f, "{label}:")?;
        }
        write!(f, "{}", self.accession)?;
        if let Some(range) = &self.range {
            write!(f, "{range}")?;
        }
        Ok(())
    }
}

/// Synthesized `{speciesSortOrdinal}_{isolateOrdinal}` key of one isolate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey(String);

impl GroupKey {
    pub fn new(sort: &str, isolate: &str) -> Self {
        Self(format!("{sort}_{isolate}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for GroupKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rank {
    Realm,
    Subrealm,
    Kingdom,
    Subkingdom,
    Phylum,
    Subphylum,
    Class,
    Subclass,
    Order,
    Suborder,
    Family,
    Subfamily,
    Genus,
    Subgenus,
    Species,
}

impl Rank {
    pub const ALL: [Rank; 15] = [
        Rank::Realm,
        Rank::Subrealm,
        Rank::Kingdom,
        Rank::Subkingdom,
        Rank::Phylum,
        Rank::Subphylum,
        Rank::Class,
        Rank::Subclass,
        Rank::Order,
        Rank::Suborder,
        Rank::Family,
        Rank::Subfamily,
        Rank::Genus,
        Rank::Subgenus,
        Rank::Species,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Rank::Realm => "realm",
            Rank::Subrealm => "subrealm",
            Rank::Kingdom => "kingdom",
            Rank::Subkingdom => "subkingdom",
            Rank::Phylum => "phylum",
            Rank::Subphylum => "subphylum",
            Rank::Class => "class",
            Rank::Subclass => "subclass",
            Rank::Order => "order",
            Rank::Suborder => "suborder",
            Rank::Family => "family",
            Rank::Subfamily => "subfamily",
            Rank::Genus => "genus",
            Rank::Subgenus => "subgenus",
            Rank::Species => "species",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lineage {
    names: [Option<String>; 15],
}

impl Lineage {
    pub fn get(&self, rank: Rank) -> Option<&str> {
        self.names[rank.index()].as_deref()
    }

    pub fn set(&mut self, rank: Rank, name: Option<String>) {
        self.names[rank.index()] = name;
    }

    pub fn genus(&self) -> Option<&str> {
        self.get(Rank::Genus)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Rank, Option<&str>)> + '_ {
        Rank::ALL.iter().map(|rank| (*rank, self.get(*rank)))
    }
}

/// One spreadsheet row mapped onto the canonical schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTaxon {
    pub group_key: GroupKey,
    pub lineage: Lineage,
    pub virus_name: Option<String>,
    pub isolate: Option<String>,
    pub genome_coverage: Option<String>,
    pub genome_composition: Option<String>,
    pub host_source: Option<String>,
    pub exemplar: Option<String>,
    pub identifier_field: String,
}
