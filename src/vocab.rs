// src/vocab.rs
//
// Canonical virus and geography vocabulary. Free-text names from report
// tables are rewritten to short codes via whole-word, longest-alias-first
// substitution, and geography codes are classed as nation/region/etc from
// fixed membership sets.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// Classification of a geography code in the output schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GeoClass {
    Nation,
    Region,
    Province,
    Territory,
    Lab,
}

impl GeoClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoClass::Nation => "nation",
            GeoClass::Region => "region",
            GeoClass::Province => "province",
            GeoClass::Territory => "territory",
            GeoClass::Lab => "lab",
        }
    }

    pub fn parse(s: &str) -> Option<GeoClass> {
        match s {
            "nation" => Some(GeoClass::Nation),
            "region" => Some(GeoClass::Region),
            "province" => Some(GeoClass::Province),
            "territory" => Some(GeoClass::Territory),
            "lab" => Some(GeoClass::Lab),
            _ => None,
        }
    }
}

impl std::fmt::Display for GeoClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Virus name aliases, free text -> canonical code.
const VIRUS_ALIASES: &[(&str, &str)] = &[
    ("human parainfluenza", "hpiv"),
    ("parainfluenza", "hpiv"),
    ("piv", "hpiv"),
    ("para", "hpiv"),
    ("adenovirus", "adv"),
    ("adeno", "adv"),
    ("human metapneumovirus", "hmpv"),
    ("enterovirus/rhinovirus", "ev_rv"),
    ("rhinovirus", "ev_rv"),
    ("rhv", "ev_rv"),
    ("entero/rhino", "ev_rv"),
    ("rhino", "ev_rv"),
    ("ev/rv", "ev_rv"),
    ("coronavirus", "hcov"),
    ("coron", "hcov"),
    ("coro", "hcov"),
    ("respiratory syncytial virus", "rsv"),
    ("influenza", "flu"),
    ("sars-cov-2", "sarscov2"),
];

/// Geography name aliases, free text -> canonical code.
const GEO_ALIASES: &[(&str, &str)] = &[
    ("newfoundland", "nl"),
    ("newfoundland and labrador", "nl"),
    ("prince edward island", "pe"),
    ("nova scotia", "ns"),
    ("new brunswick", "nb"),
    ("québec", "qc"),
    ("quebec", "qc"),
    ("ontario", "on"),
    ("manitoba", "mb"),
    ("saskatchewan", "sk"),
    ("alberta", "ab"),
    ("british columbia", "bc"),
    ("yukon", "yk"),
    ("northwest territories", "nt"),
    ("nunavut", "nu"),
    ("canada", "ca"),
    ("can", "ca"),
    ("at", "atlantic"),
    ("atl", "atlantic"),
    ("pr", "prairies"),
    ("terr", "territories"),
];

/// Regions are groups of provinces that are geographically close together.
/// Some single provinces are reported as their own region (e.g. Québec,
/// Ontario).
const REGIONS: &[&str] = &[
    "atlantic",
    "atl",
    "at",
    "province of québec",
    "québec",
    "qc",
    "province of ontario",
    "ontario",
    "on",
    "prairies",
    "pr",
    "british columbia",
    "bc",
    "territories",
    "terr",
];

const NATION: &[&str] = &["canada", "can", "ca"];

/// Fixed classification of the canonical geography codes. This is the single
/// source of truth for `geo_type` in the merged output; any per-table guess
/// is overridden by it.
const GEO_CLASSES: &[(&str, GeoClass)] = &[
    ("ca", GeoClass::Nation),
    ("on", GeoClass::Province),
    ("qc", GeoClass::Province),
    ("ns", GeoClass::Province),
    ("nb", GeoClass::Province),
    ("mb", GeoClass::Province),
    ("bc", GeoClass::Province),
    ("pe", GeoClass::Province),
    ("sk", GeoClass::Province),
    ("ab", GeoClass::Province),
    ("nl", GeoClass::Province),
    ("nt", GeoClass::Territory),
    ("yk", GeoClass::Territory),
    ("nu", GeoClass::Territory),
    ("atlantic", GeoClass::Region),
    ("prairies", GeoClass::Region),
    ("territories", GeoClass::Region),
];

/// The canonical virus codes carried through the output schema.
pub const VIRUSES: &[&str] = &[
    "hcov", "hmpv", "sarscov2", "rsv", "hpiv", "flu", "adv", "ev_rv",
];

/// Compiled alias tables. Built once and passed explicitly into the column
/// rewriter and table builders so alias versions can be tested in isolation.
#[derive(Debug)]
pub struct Vocabulary {
    viruses: BTreeMap<String, String>,
    geos: BTreeMap<String, String>,
    virus_pattern: Regex,
    geo_pattern: Regex,
    geo_classes: BTreeMap<String, GeoClass>,
}

impl Vocabulary {
    pub fn new() -> Self {
        let viruses: BTreeMap<String, String> = VIRUS_ALIASES
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let geos: BTreeMap<String, String> = GEO_ALIASES
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        // Word-boundary anchoring prevents partial matches inside longer
        // tokens (e.g. "on" inside "london"); longest alias first so
        // "newfoundland and labrador" wins over "newfoundland".
        let virus_pattern =
            Regex::new(&format!(r"\b({})\b", alias_alternation(&viruses)))
                .expect("Failed to compile virus alias pattern");
        let geo_pattern =
            Regex::new(&format!(r"^\b({})\b$", alias_alternation(&geos)))
                .expect("Failed to compile geography alias pattern");

        let geo_classes = GEO_CLASSES
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();

        Self {
            viruses,
            geos,
            virus_pattern,
            geo_pattern,
            geo_classes,
        }
    }

    /// Rewrites any virus names embedded in `text` to their canonical codes.
    pub fn normalize_virus(&self, text: &str) -> String {
        let lowercase = text.to_lowercase();
        self.virus_pattern
            .replace_all(&lowercase, |caps: &regex::Captures| {
                self.viruses[&caps[0]].clone()
            })
            .into_owned()
    }

    /// Rewrites a full geography name to its canonical short code. Matching
    /// is anchored to the whole (cleaned) token.
    pub fn normalize_geo(&self, text: &str) -> String {
        static STRIP_RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"\.|\*").expect("Failed to compile geo strip pattern"));

        let mut lowercase = text.to_lowercase();
        lowercase = lowercase.replace("province of ", "");
        lowercase = STRIP_RE.replace_all(&lowercase, "").into_owned();
        lowercase = lowercase.replace("/territoires", "");
        if lowercase == "cana" {
            lowercase = "can".to_string();
        }

        self.geo_pattern
            .replace(&lowercase, |caps: &regex::Captures| {
                self.geos[&caps[0]].clone()
            })
            .into_owned()
    }

    /// Derives a geography's class from fixed membership sets, falling back
    /// to the caller-supplied default (`province` for dashboard feeds, `lab`
    /// for weekly lab-level feeds).
    pub fn geo_class(&self, geo: &str, default: GeoClass) -> GeoClass {
        if NATION.contains(&geo) {
            GeoClass::Nation
        } else if REGIONS.contains(&geo) {
            GeoClass::Region
        } else {
            default
        }
    }

    /// Fixed classification used by the revision merge engine. Returns None
    /// for codes outside the canonical geography set, which drops them from
    /// the merged output.
    pub fn fixed_geo_class(&self, geo: &str) -> Option<GeoClass> {
        self.geo_classes.get(geo).copied()
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}

fn alias_alternation(aliases: &BTreeMap<String, String>) -> String {
    let mut keys: Vec<&String> = aliases.keys().collect();
    // Longest alias first so the alternation prefers the most specific match.
    keys.sort_by_key(|k| std::cmp::Reverse(k.len()));
    keys.iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|")
}
