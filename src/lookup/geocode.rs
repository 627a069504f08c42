// src/lookup/geocode.rs
use anyhow::{Context, Result};
use csv::ReaderBuilder;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use tracing::{debug, warn};

/// Geocodes are fixed-width; the first `PREFIX_LEN` characters name the state.
pub const GEOCODE_LEN: usize = 12;
pub const PREFIX_LEN: usize = 4;
/// Suffix shared by every state-level geocode.
pub const STATE_SUFFIX: &str = "00000000";

static STATE_CODES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    [
        ("ALABAMA", "AL"),
        ("ALASKA", "AK"),
        ("ARIZONA", "AZ"),
        ("ARKANSAS", "AR"),
        ("CALIFORNIA", "CA"),
        ("COLORADO", "CO"),
        ("CONNECTICUT", "CT"),
        ("DELAWARE", "DE"),
        ("DISTRICT OF COLUMBIA", "DC"),
        ("FLORIDA", "FL"),
        ("GEORGIA", "GA"),
        ("HAWAII", "HI"),
        ("IDAHO", "ID"),
        ("ILLINOIS", "IL"),
        ("INDIANA", "IN"),
        ("IOWA", "IA"),
        ("KANSAS", "KS"),
        ("KENTUCKY", "KY"),
        ("LOUISIANA", "LA"),
        ("MAINE", "ME"),
        ("MARYLAND", "MD"),
        ("MASSACHUSETTS", "MA"),
        ("MICHIGAN", "MI"),
        ("MINNESOTA", "MN"),
        ("MISSISSIPPI", "MS"),
        ("MISSOURI", "MO"),
        ("MONTANA", "MT"),
        ("NEBRASKA", "NE"),
        ("NEVADA", "NV"),
        ("NEW HAMPSHIRE", "NH"),
        ("NEW JERSEY", "NJ"),
        ("NEW MEXICO", "NM"),
        ("NEW YORK", "NY"),
        ("NORTH CAROLINA", "NC"),
        ("NORTH DAKOTA", "ND"),
        ("OHIO", "OH"),
        ("OKLAHOMA", "OK"),
        ("OREGON", "OR"),
        ("PENNSYLVANIA", "PA"),
        ("RHODE ISLAND", "RI"),
        ("SOUTH CAROLINA", "SC"),
        ("SOUTH DAKOTA", "SD"),
        ("TENNESSEE", "TN"),
        ("TEXAS", "TX"),
        ("UTAH", "UT"),
        ("VERMONT", "VT"),
        ("VIRGINIA", "VA"),
        ("WASHINGTON", "WA"),
        ("WEST VIRGINIA", "WV"),
        ("WISCONSIN", "WI"),
        ("WYOMING", "WY"),
    ]
    .into_iter()
    .collect()
});

/// Two-letter code for a full US state name, case-insensitive.
pub fn state_code(name: &str) -> Option<&'static str> {
    STATE_CODES.get(name.trim().to_uppercase().as_str()).copied()
}

/// State-level geocode owning `geocode`: the prefix right-padded with `0`.
pub fn parent_geocode(geocode: &str) -> String {
    let prefix: String = geocode.trim().chars().take(PREFIX_LEN).collect();
    format!("{:0<width$}", prefix, width = GEOCODE_LEN)
}

pub fn is_state_geocode(geocode: &str) -> bool {
    geocode.ends_with(STATE_SUFFIX)
}

/// Jurisdiction named by a document, e.g. `"Chicago Sales Tax Research.xlsx"`
/// → `"Chicago"`. The suffix must end the name exactly.
pub fn jurisdiction_name(document_name: &str, suffix: &str) -> Option<String> {
    let trimmed = document_name.trim();
    // Only a short alphanumeric tail counts as an extension ("St. Louis" keeps its dot).
    let stem = match trimmed.rsplit_once('.') {
        Some((stem, ext))
            if (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            stem
        }
        _ => trimmed,
    };
    let upper = stem.to_uppercase();
    let suffix_upper = suffix.trim().to_uppercase();
    let name = if suffix_upper.is_empty() {
        upper.as_str()
    } else {
        upper.strip_suffix(suffix_upper.as_str())?
    };
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JurisdictionKind {
    State,
    City,
}

/// A resolved jurisdiction. States carry exactly one geocode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jurisdiction {
    pub name: String,
    pub kind: JurisdictionKind,
    pub geocodes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GeoRow {
    geocode: String,
    state: String,
    #[serde(default)]
    city: String,
    jurisdiction: String,
}

/// Jurisdiction name → geocode(s), built from `geo_state.csv`.
#[derive(Debug, Default, Clone)]
pub struct GeocodeTable {
    /// State code → its single geocode.
    states: HashMap<String, String>,
    /// Upper-cased city name → geocodes in file order.
    cities: HashMap<String, Vec<String>>,
}

impl GeocodeTable {
    pub fn from_reader<R: Read>(rdr: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
        let mut table = Self::default();
        for (i, row) in reader.deserialize::<GeoRow>().enumerate() {
            let row = row.with_context(|| format!("geo_state.csv row {}", i + 2))?;
            if row.geocode.is_empty() {
                continue;
            }
            match row.jurisdiction.to_uppercase().as_str() {
                "STATE" => {
                    if let Some(prev) = table
                        .states
                        .insert(row.state.to_uppercase(), row.geocode.clone())
                    {
                        warn!(state = %row.state, %prev, geocode = %row.geocode, "duplicate state geocode, keeping last");
                    }
                }
                "CITY" if !row.city.is_empty() => {
                    let codes = table.cities.entry(row.city.to_uppercase()).or_default();
                    if !codes.contains(&row.geocode) {
                        codes.push(row.geocode);
                    }
                }
                _ => {}
            }
        }
        debug!(
            states = table.states.len(),
            cities = table.cities.len(),
            "loaded geocode table"
        );
        Ok(table)
    }

    pub fn state_geocode(&self, code: &str) -> Option<&str> {
        self.states.get(&code.trim().to_uppercase()).map(String::as_str)
    }

    pub fn city_geocodes(&self, city: &str) -> Option<&[String]> {
        self.cities
            .get(&city.trim().to_uppercase())
            .map(Vec::as_slice)
            .filter(|codes| !codes.is_empty())
    }

    /// Exact state name first, then city name.
    pub fn resolve(&self, name: &str) -> Option<Jurisdiction> {
        let key = name.trim().to_uppercase();
        if let Some(geocode) = state_code(&key).and_then(|code| self.state_geocode(code)) {
            return Some(Jurisdiction {
                name: key,
                kind: JurisdictionKind::State,
                geocodes: vec![geocode.to_string()],
            });
        }
        self.city_geocodes(&key).map(|codes| Jurisdiction {
            name: key,
            kind: JurisdictionKind::City,
            geocodes: codes.to_vec(),
        })
    }

    /// Resolve the jurisdiction a document is named after.
    pub fn resolve_document(&self, document_name: &str, suffix: &str) -> Option<Jurisdiction> {
        jurisdiction_name(document_name, suffix).and_then(|name| self.resolve(&name))
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_GEO_CSV: &str = "geocode,state,county,city,tax_district,jurisdiction
US1700000000,IL,,,,STATE
US1800000000,IN,,,,STATE
US0800000000,CO,,,,STATE
US08013A0025,CO,BOULDER,BOULDER,,CITY
US08031A0002,CO,DENVER,DENVER,,CITY
US17031A0003,IL,COOK,CHICAGO,,CITY
US17031A0047,IL,COOK,CHICAGO,,CITY
US17043A0053,IL,DUPAGE,CHICAGO,,CITY
";
