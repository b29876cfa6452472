use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use super::OneOrMany;
use crate::errors::ValidationError;

pub const MIN_APPLICATIONS_PER_SESSION: u32 = 1;
pub const MAX_APPLICATIONS_PER_SESSION: u32 = 1000;
pub const MIN_DELAY_SECS: u32 = 1;
pub const MAX_DELAY_SECS: u32 = 60;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "email")]
    pub identity: String,
    #[serde(rename = "password")]
    pub secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }

    /// Structural check only: an email-shaped identity and a non-empty secret.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let identity = self.identity.trim();
        let well_formed = match identity.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.is_empty()
                    && !domain.contains('@')
                    && !identity.chars().any(char::is_whitespace)
            }
            None => false,
        };
        if !well_formed {
            return Err(ValidationError::InvalidIdentity);
        }
        if self.secret.is_empty() {
            return Err(ValidationError::MissingSecret);
        }
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.validate().is_ok()
    }
}

// ---------------------------------------------------------------------------
// Option enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ContractType {
    #[serde(rename = "permanent")]
    Permanent,
    #[serde(rename = "contractor")]
    Contractor,
    #[serde(rename = "fixed-term")]
    FixedTerm,
    #[serde(rename = "apprenticeship")]
    Apprenticeship,
    #[serde(rename = "internship")]
    Internship,
}

impl ContractType {
    pub const ALL: [ContractType; 5] = [
        ContractType::Permanent,
        ContractType::Contractor,
        ContractType::FixedTerm,
        ContractType::Apprenticeship,
        ContractType::Internship,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::Permanent => "permanent",
            ContractType::Contractor => "contractor",
            ContractType::FixedTerm => "fixed-term",
            ContractType::Apprenticeship => "apprenticeship",
            ContractType::Internship => "internship",
        }
    }
}

impl FromStr for ContractType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContractType::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownOption {
                field: "contract type",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteType {
    Partial,
    Full,
    None,
}

impl RemoteType {
    pub const ALL: [RemoteType; 3] = [RemoteType::Partial, RemoteType::Full, RemoteType::None];

    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteType::Partial => "partial",
            RemoteType::Full => "full",
            RemoteType::None => "none",
        }
    }
}

impl FromStr for RemoteType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RemoteType::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownOption {
                field: "remote type",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationTimeframe {
    LessThan24Hours,
    LessThan7Days,
    LessThan14Days,
    #[default]
    LessThan30Days,
}

impl PublicationTimeframe {
    pub const ALL: [PublicationTimeframe; 4] = [
        PublicationTimeframe::LessThan24Hours,
        PublicationTimeframe::LessThan7Days,
        PublicationTimeframe::LessThan14Days,
        PublicationTimeframe::LessThan30Days,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PublicationTimeframe::LessThan24Hours => "less_than_24_hours",
            PublicationTimeframe::LessThan7Days => "less_than_7_days",
            PublicationTimeframe::LessThan14Days => "less_than_14_days",
            PublicationTimeframe::LessThan30Days => "less_than_30_days",
        }
    }
}

impl FromStr for PublicationTimeframe {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PublicationTimeframe::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownOption {
                field: "publication timeframe",
                value: s.to_string(),
            })
    }
}

/// Older backends return the timeframe as a list; keep the first entry.
fn timeframe_one_or_many<'de, D>(deserializer: D) -> Result<PublicationTimeframe, D::Error>
where
    D: Deserializer<'de>,
{
    let value = OneOrMany::<PublicationTimeframe>::deserialize(deserializer)?;
    Ok(value.into_vec().into_iter().next().unwrap_or_default())
}

fn default_delay_secs() -> u32 {
    2
}

// ---------------------------------------------------------------------------
// SearchConfiguration (persisted form)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfiguration {
    pub search_terms: Vec<String>,
    #[serde(default)]
    pub contract_types: BTreeSet<ContractType>,
    #[serde(default)]
    pub remote_types: BTreeSet<RemoteType>,
    #[serde(
        rename = "publication_timeframes",
        default,
        deserialize_with = "timeframe_one_or_many"
    )]
    pub publication_timeframe: PublicationTimeframe,
    #[serde(default)]
    pub excluded_keywords: Vec<String>,
    pub application_message: String,
    pub max_applications_per_session: u32,
    #[serde(rename = "delay_between_applications", default = "default_delay_secs")]
    pub delay_between_applications_secs: u32,
}

fn non_blank(values: Vec<String>) -> Vec<String> {
    values.into_iter().filter(|v| !v.trim().is_empty()).collect()
}

impl SearchConfiguration {
    /// Drop blank list entries. Applied to everything loaded from or sent to
    /// the backend.
    pub fn normalized(self) -> Self {
        Self {
            search_terms: non_blank(self.search_terms),
            excluded_keywords: non_blank(self.excluded_keywords),
            ..self
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigDraft (live editable form)
// ---------------------------------------------------------------------------

/// The editable configuration. Unlike [`SearchConfiguration`] it may hold
/// blank slots and out-of-range numbers while the user is typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDraft {
    pub search_terms: Vec<String>,
    pub contract_types: BTreeSet<ContractType>,
    pub remote_types: BTreeSet<RemoteType>,
    pub publication_timeframe: PublicationTimeframe,
    pub excluded_keywords: Vec<String>,
    pub application_message: String,
    pub max_applications_per_session: u32,
    pub delay_between_applications_secs: u32,
}

impl Default for ConfigDraft {
    fn default() -> Self {
        Self {
            search_terms: vec![String::new()],
            contract_types: BTreeSet::new(),
            remote_types: BTreeSet::new(),
            publication_timeframe: PublicationTimeframe::default(),
            excluded_keywords: vec![String::new()],
            application_message: String::new(),
            max_applications_per_session: 10,
            delay_between_applications_secs: 5,
        }
    }
}

/// A single user edit against the draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEdit {
    AddSearchTerm(String),
    SetSearchTerm { index: usize, value: String },
    RemoveSearchTerm(usize),
    ReplaceSearchTerms(Vec<String>),
    AddExcludedKeyword(String),
    SetExcludedKeyword { index: usize, value: String },
    RemoveExcludedKeyword(usize),
    ReplaceExcludedKeywords(Vec<String>),
    SetContractType { contract_type: ContractType, selected: bool },
    SetRemoteType { remote_type: RemoteType, selected: bool },
    SetPublicationTimeframe(PublicationTimeframe),
    SetApplicationMessage(String),
    SetMaxApplications(u32),
    SetDelaySecs(u32),
}

fn set_slot(list: &mut [String], index: usize, value: String) -> Result<(), ValidationError> {
    let len = list.len();
    let slot = list
        .get_mut(index)
        .ok_or(ValidationError::IndexOutOfRange { index, len })?;
    *slot = value;
    Ok(())
}

fn remove_slot(
    list: &mut Vec<String>,
    index: usize,
    last: ValidationError,
) -> Result<(), ValidationError> {
    if index >= list.len() {
        return Err(ValidationError::IndexOutOfRange {
            index,
            len: list.len(),
        });
    }
    if list.len() <= 1 {
        return Err(last);
    }
    list.remove(index);
    Ok(())
}

fn with_one_slot(mut values: Vec<String>) -> Vec<String> {
    if values.is_empty() {
        values.push(String::new());
    }
    values
}

impl ConfigDraft {
    /// Build a draft from a persisted configuration. Lists always keep one
    /// slot so the form has something to edit.
    pub fn from_config(config: &SearchConfiguration) -> Self {
        let config = config.clone().normalized();
        Self {
            search_terms: with_one_slot(config.search_terms),
            contract_types: config.contract_types,
            remote_types: config.remote_types,
            publication_timeframe: config.publication_timeframe,
            excluded_keywords: with_one_slot(config.excluded_keywords),
            application_message: config.application_message,
            max_applications_per_session: config.max_applications_per_session,
            delay_between_applications_secs: config.delay_between_applications_secs,
        }
    }

    /// Apply one edit. List edits keep the order of the remaining entries.
    pub fn apply(&mut self, edit: ConfigEdit) -> Result<(), ValidationError> {
        match edit {
            ConfigEdit::AddSearchTerm(value) => self.search_terms.push(value),
            ConfigEdit::SetSearchTerm { index, value } => {
                set_slot(&mut self.search_terms, index, value)?
            }
            ConfigEdit::RemoveSearchTerm(index) => remove_slot(
                &mut self.search_terms,
                index,
                ValidationError::LastSearchTerm,
            )?,
            ConfigEdit::ReplaceSearchTerms(values) => {
                if values.is_empty() {
                    return Err(ValidationError::NoSearchTerms);
                }
                self.search_terms = values;
            }
            ConfigEdit::AddExcludedKeyword(value) => self.excluded_keywords.push(value),
            ConfigEdit::SetExcludedKeyword { index, value } => {
                set_slot(&mut self.excluded_keywords, index, value)?
            }
            ConfigEdit::RemoveExcludedKeyword(index) => remove_slot(
                &mut self.excluded_keywords,
                index,
                ValidationError::LastExcludedKeyword,
            )?,
            ConfigEdit::ReplaceExcludedKeywords(values) => {
                self.excluded_keywords = with_one_slot(values);
            }
            ConfigEdit::SetContractType {
                contract_type,
                selected,
            } => {
                if selected {
                    self.contract_types.insert(contract_type);
                } else {
                    self.contract_types.remove(&contract_type);
                }
            }
            ConfigEdit::SetRemoteType {
                remote_type,
                selected,
            } => {
                if selected {
                    self.remote_types.insert(remote_type);
                } else {
                    self.remote_types.remove(&remote_type);
                }
            }
            ConfigEdit::SetPublicationTimeframe(timeframe) => {
                self.publication_timeframe = timeframe
            }
            ConfigEdit::SetApplicationMessage(message) => self.application_message = message,
            ConfigEdit::SetMaxApplications(max) => self.max_applications_per_session = max,
            ConfigEdit::SetDelaySecs(delay) => self.delay_between_applications_secs = delay,
        }
        Ok(())
    }

    /// Every field problem in the draft, in form order.
    pub fn errors(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.search_terms.is_empty() {
            errors.push(ValidationError::NoSearchTerms);
        }
        for (index, term) in self.search_terms.iter().enumerate() {
            if term.trim().is_empty() {
                errors.push(ValidationError::EmptySearchTerm { index });
            }
        }
        if self.application_message.trim().is_empty() {
            errors.push(ValidationError::EmptyApplicationMessage);
        }
        let max = self.max_applications_per_session;
        if !(MIN_APPLICATIONS_PER_SESSION..=MAX_APPLICATIONS_PER_SESSION).contains(&max) {
            errors.push(ValidationError::MaxApplicationsOutOfRange(max));
        }
        let delay = self.delay_between_applications_secs;
        if !(MIN_DELAY_SECS..=MAX_DELAY_SECS).contains(&delay) {
            errors.push(ValidationError::DelayOutOfRange(delay));
        }

        errors
    }

    /// Produce the persisted form, with blank keyword slots filtered out.
    pub fn validate(&self) -> Result<SearchConfiguration, Vec<ValidationError>> {
        let errors = self.errors();
        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(SearchConfiguration {
            search_terms: self.search_terms.clone(),
            contract_types: self.contract_types.clone(),
            remote_types: self.remote_types.clone(),
            publication_timeframe: self.publication_timeframe,
            excluded_keywords: self.excluded_keywords.clone(),
            application_message: self.application_message.clone(),
            max_applications_per_session: self.max_applications_per_session,
            delay_between_applications_secs: self.delay_between_applications_secs,
        }
        .normalized())
    }
}
