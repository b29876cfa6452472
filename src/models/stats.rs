use std::fmt;
use std::marker::PhantomData;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::OneOrMany;

// ---------------------------------------------------------------------------
// OrderedMap: a JSON object that keeps the payload's key order
// ---------------------------------------------------------------------------

/// Key/value pairs in the order the backend sent them. Breakdown ties are
/// broken by this order, so a hash or sorted map would lose information.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderedMap<V>(Vec<(String, V)>);

pub type CountMap = OrderedMap<u64>;

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or overwrite. A new key goes to the end.
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn into_entries(self) -> Vec<(String, V)> {
        self.0
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = OrderedMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct OrderedMapVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
    type Value = OrderedMap<V>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = OrderedMap::new();
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
    }
}

// ---------------------------------------------------------------------------
// Per-session records
// ---------------------------------------------------------------------------

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(OneOrMany::<String>::deserialize(deserializer)?.into_vec())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDetail {
    #[serde(default)]
    pub job_title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub search_term: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub contract_type: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub remote_type: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApplicationTotals {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub successful: u64,
    #[serde(default)]
    pub failed: u64,
}

/// One automation run as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatisticsRecord {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub date: String,
    #[serde(default, alias = "application_details")]
    pub applications: Vec<ApplicationDetail>,
    #[serde(flatten)]
    pub totals: ApplicationTotals,
    #[serde(default)]
    pub success_rate: f64,
}

// ---------------------------------------------------------------------------
// Basic statistics (GET /statistics)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub total_applications: u64,
    pub successful_applications: u64,
    pub failed_applications: u64,
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub last_session: Option<String>,
    #[serde(default)]
    pub sessions: Vec<SessionStatisticsRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_excluded_keyword: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_already_applied: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_other: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_jobs_seen: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_attempted_applications: Option<u64>,
}

// ---------------------------------------------------------------------------
// Global statistics (GET /statistics/advanced)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchTermStats {
    #[serde(rename = "search_term", alias = "term", default)]
    pub term: String,
    #[serde(rename = "jobs_submitted", default)]
    pub submitted: u64,
    #[serde(rename = "jobs_found", default)]
    pub found: u64,
    #[serde(rename = "jobs_already_applied", default)]
    pub already_applied: u64,
    #[serde(rename = "jobs_excluded", default)]
    pub excluded: u64,
    #[serde(rename = "jobs_failed", default)]
    pub failed: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SearchTermEntry {
    Count(u64),
    Detailed(SearchTermStats),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PerSearchTermWire {
    List(Vec<SearchTermStats>),
    Map(OrderedMap<SearchTermEntry>),
}

/// Backends have sent `per_search_term` both as a list of records and as an
/// object keyed by term. Only the list form leaves this function.
fn per_search_term_compat<'de, D>(deserializer: D) -> Result<Vec<SearchTermStats>, D::Error>
where
    D: Deserializer<'de>,
{
    let wire = Option::<PerSearchTermWire>::deserialize(deserializer)?;
    Ok(match wire {
        None => Vec::new(),
        Some(PerSearchTermWire::List(list)) => list,
        Some(PerSearchTermWire::Map(map)) => map
            .into_entries()
            .into_iter()
            .map(|(term, entry)| match entry {
                SearchTermEntry::Count(count) => SearchTermStats {
                    term,
                    submitted: count,
                    ..SearchTermStats::default()
                },
                SearchTermEntry::Detailed(stats) => SearchTermStats { term, ..stats },
            })
            .collect(),
    })
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GlobalStatistics {
    #[serde(default)]
    pub total_applications: u64,
    #[serde(default)]
    pub successful_applications: u64,
    #[serde(default)]
    pub failed_applications: u64,
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub sessions: Vec<SessionStatisticsRecord>,
    #[serde(default, deserialize_with = "per_search_term_compat")]
    pub per_search_term: Vec<SearchTermStats>,
    #[serde(default)]
    pub per_contract_type: CountMap,
    #[serde(default)]
    pub per_remote_type: CountMap,
    #[serde(default)]
    pub per_day: CountMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_session: Option<String>,
}

impl GlobalStatistics {
    pub fn totals(&self) -> ApplicationTotals {
        ApplicationTotals {
            total: self.total_applications,
            successful: self.successful_applications,
            failed: self.failed_applications,
        }
    }

    pub fn has_search_terms(&self) -> bool {
        !self.per_search_term.is_empty()
    }

    pub fn has_contract_types(&self) -> bool {
        !self.per_contract_type.is_empty()
    }

    pub fn has_remote_types(&self) -> bool {
        !self.per_remote_type.is_empty()
    }

    pub fn has_daily_data(&self) -> bool {
        !self.per_day.is_empty()
    }
}
