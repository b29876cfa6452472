pub mod config;
pub mod search;
pub mod stats;

pub use config::{AuthMode, ClientConfig};
pub use search::{
    ConfigDraft, ConfigEdit, ContractType, Credentials, PublicationTimeframe, RemoteType,
    SearchConfiguration,
};
pub use stats::{
    ApplicationDetail, ApplicationTotals, GlobalStatistics, SearchTermStats,
    SessionStatisticsRecord, Statistics,
};

use serde::Deserialize;

/// Wire shim for fields the backend has sent both as a scalar and as a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub(crate) fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}
