//! Sync configuration.
//!
//! Built once at job start and passed by reference to every component.

use std::env::VarError;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use cohortsync_connector::config::{optional_var, parse_flag, parse_var, ConfigError};
use cohortsync_connector::FieldName;

use crate::error::SyncError;
use crate::model::LocalUserField;

/// What happens to local members missing from the external source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoveAction {
    #[default]
    Remove,
    Keep,
}

impl FromStr for RemoveAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "remove" | "0" => Ok(RemoveAction::Remove),
            "keep" | "1" => Ok(RemoveAction::Keep),
            other => Err(format!("expected 'remove' or 'keep', got '{other}'")),
        }
    }
}

/// Whether a group with no external rows may lose its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmptyCohortRemoval {
    #[default]
    Never,
    Always,
    IfNotReferenced,
}

impl FromStr for EmptyCohortRemoval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "never" | "0" => Ok(EmptyCohortRemoval::Never),
            "always" | "1" => Ok(EmptyCohortRemoval::Always),
            "if-not-referenced" | "2" => Ok(EmptyCohortRemoval::IfNotReferenced),
            other => Err(format!(
                "expected 'never', 'always' or 'if-not-referenced', got '{other}'"
            )),
        }
    }
}

/// Who is told when a pass aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationTarget {
    #[default]
    None,
    Support,
    AllAdmins,
}

impl FromStr for NotificationTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(NotificationTarget::None),
            "support" => Ok(NotificationTarget::Support),
            "all-admins" | "alladmins" => Ok(NotificationTarget::AllAdmins),
            other => Err(format!(
                "expected 'none', 'support' or 'all-admins', got '{other}'"
            )),
        }
    }
}

impl fmt::Display for NotificationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NotificationTarget::None => "none",
            NotificationTarget::Support => "support",
            NotificationTarget::AllAdmins => "all-admins",
        })
    }
}

/// Column mapping between the external table and local records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldMapping {
    pub remote_table: String,
    pub remote_user_field: FieldName,
    pub remote_cohort_id_field: FieldName,
    pub remote_cohort_name_field: FieldName,
    #[serde(default)]
    pub remote_cohort_desc_field: Option<FieldName>,
    #[serde(default = "default_local_user_field")]
    pub local_user_field: Option<LocalUserField>,
}

fn default_local_user_field() -> Option<LocalUserField> {
    Some(LocalUserField::default())
}

impl FieldMapping {
    /// The description column, when one is configured.
    pub fn description_field(&self) -> Option<&FieldName> {
        self.remote_cohort_desc_field
            .as_ref()
            .filter(|field| !field.is_empty())
    }
}

/// Safety and update policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPolicy {
    #[serde(default)]
    pub remove_action: RemoveAction,
    #[serde(default)]
    pub empty_cohort_removal: EmptyCohortRemoval,
    #[serde(default)]
    pub update_descriptions: bool,
    /// Minimum external rows before anything is touched; 0 disables the gate.
    #[serde(default = "default_min_records")]
    pub min_records: u64,
    /// Ceiling on membership deletions per pass; 0 means unbounded.
    #[serde(default = "default_max_removals")]
    pub max_removals: u64,
}

fn default_min_records() -> u64 {
    10
}

fn default_max_removals() -> u64 {
    500
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            remove_action: RemoveAction::default(),
            empty_cohort_removal: EmptyCohortRemoval::default(),
            update_descriptions: false,
            min_records: default_min_records(),
            max_removals: default_max_removals(),
        }
    }
}

/// Creation of local accounts for unknown external members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProvisioning {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub username_field: FieldName,
    #[serde(default)]
    pub email_field: FieldName,
    #[serde(default)]
    pub first_name_field: FieldName,
    #[serde(default)]
    pub last_name_field: FieldName,
    #[serde(default)]
    pub idnumber_field: Option<FieldName>,
    #[serde(default = "default_auth")]
    pub auth: String,
}

fn default_auth() -> String {
    "manual".to_string()
}

impl Default for UserProvisioning {
    fn default() -> Self {
        Self {
            enabled: false,
            username_field: FieldName::default(),
            email_field: FieldName::default(),
            first_name_field: FieldName::default(),
            last_name_field: FieldName::default(),
            idnumber_field: None,
            auth: default_auth(),
        }
    }
}

impl UserProvisioning {
    /// The id-number column, when one is configured.
    pub fn idnumber_field(&self) -> Option<&FieldName> {
        self.idnumber_field.as_ref().filter(|field| !field.is_empty())
    }

    /// Columns fetched for each missing user.
    pub fn profile_fields(&self) -> Vec<FieldName> {
        let mut fields = vec![
            self.username_field.clone(),
            self.email_field.clone(),
            self.first_name_field.clone(),
            self.last_name_field.clone(),
        ];
        if let Some(idnumber) = self.idnumber_field() {
            fields.push(idnumber.clone());
        }
        fields
    }
}

/// Complete configuration of a sync pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub mapping: FieldMapping,
    #[serde(default)]
    pub policy: SyncPolicy,
    #[serde(default)]
    pub provisioning: UserProvisioning,
    #[serde(default)]
    pub notify: NotificationTarget,
    /// Rows per bulk chunk.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    500
}

impl SyncConfig {
    /// Start from a mapping and default policy.
    pub fn new(mapping: FieldMapping) -> Self {
        Self {
            mapping,
            policy: SyncPolicy::default(),
            provisioning: UserProvisioning::default(),
            notify: NotificationTarget::default(),
            batch_size: default_batch_size(),
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    ///
    /// Unset mapping keys load as empty; [`SyncConfig::validate`] reports
    /// them so that the pass can end with the proper exit code.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let field = |key: &str| FieldName::new(optional_var(&reader, key).unwrap_or_default());
        let optional_field = |key: &str| optional_var(&reader, key).map(FieldName::new);

        let local_user_field = match optional_var(&reader, "COHORTSYNC_LOCAL_USER_FIELD") {
            Some(raw) => Some(raw.parse::<LocalUserField>().map_err(|e| {
                ConfigError::InvalidValue("COHORTSYNC_LOCAL_USER_FIELD".into(), e)
            })?),
            None => default_local_user_field(),
        };

        let mapping = FieldMapping {
            remote_table: optional_var(&reader, "COHORTSYNC_REMOTE_TABLE").unwrap_or_default(),
            remote_user_field: field("COHORTSYNC_REMOTE_USER_FIELD"),
            remote_cohort_id_field: field("COHORTSYNC_REMOTE_COHORT_ID_FIELD"),
            remote_cohort_name_field: field("COHORTSYNC_REMOTE_COHORT_NAME_FIELD"),
            remote_cohort_desc_field: optional_field("COHORTSYNC_REMOTE_COHORT_DESC_FIELD"),
            local_user_field,
        };

        let policy = SyncPolicy {
            remove_action: parse_enum(&reader, "COHORTSYNC_REMOVE_ACTION")?,
            empty_cohort_removal: parse_enum(&reader, "COHORTSYNC_EMPTY_COHORT_REMOVAL")?,
            update_descriptions: parse_flag(&reader, "COHORTSYNC_UPDATE_DESCRIPTIONS", false)?,
            min_records: parse_var(&reader, "COHORTSYNC_MIN_RECORDS", default_min_records())?,
            max_removals: parse_var(&reader, "COHORTSYNC_MAX_REMOVALS", default_max_removals())?,
        };

        let provisioning = UserProvisioning {
            enabled: parse_flag(&reader, "COHORTSYNC_CREATE_USERS", false)?,
            username_field: field("COHORTSYNC_CREATE_USERS_USERNAME"),
            email_field: field("COHORTSYNC_CREATE_USERS_EMAIL"),
            first_name_field: field("COHORTSYNC_CREATE_USERS_FIRSTNAME"),
            last_name_field: field("COHORTSYNC_CREATE_USERS_LASTNAME"),
            idnumber_field: optional_field("COHORTSYNC_CREATE_USERS_IDNUMBER"),
            auth: optional_var(&reader, "COHORTSYNC_CREATE_USERS_AUTH")
                .unwrap_or_else(default_auth),
        };

        let batch_size = parse_var(&reader, "COHORTSYNC_BATCH_SIZE", default_batch_size())?;
        if batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "COHORTSYNC_BATCH_SIZE".into(),
                "must be greater than zero".into(),
            ));
        }

        Ok(Self {
            mapping,
            policy,
            provisioning,
            notify: parse_enum(&reader, "COHORTSYNC_ERROR_NOTIFY")?,
            batch_size,
        })
    }

    /// Check that every required mapping setting is present.
    pub fn validate(&self) -> Result<(), SyncError> {
        let mut missing = Vec::new();
        let mapping = &self.mapping;

        if mapping.remote_table.trim().is_empty() {
            missing.push("COHORTSYNC_REMOTE_TABLE");
        }
        if mapping.remote_user_field.is_empty() {
            missing.push("COHORTSYNC_REMOTE_USER_FIELD");
        }
        if mapping.remote_cohort_id_field.is_empty() {
            missing.push("COHORTSYNC_REMOTE_COHORT_ID_FIELD");
        }
        if mapping.remote_cohort_name_field.is_empty() {
            missing.push("COHORTSYNC_REMOTE_COHORT_NAME_FIELD");
        }
        if mapping.local_user_field.is_none() {
            missing.push("COHORTSYNC_LOCAL_USER_FIELD");
        }

        let provisioning = &self.provisioning;
        if provisioning.enabled {
            if provisioning.username_field.is_empty() {
                missing.push("COHORTSYNC_CREATE_USERS_USERNAME");
            }
            if provisioning.email_field.is_empty() {
                missing.push("COHORTSYNC_CREATE_USERS_EMAIL");
            }
            if provisioning.first_name_field.is_empty() {
                missing.push("COHORTSYNC_CREATE_USERS_FIRSTNAME");
            }
            if provisioning.last_name_field.is_empty() {
                missing.push("COHORTSYNC_CREATE_USERS_LASTNAME");
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SyncError::ConfigIncomplete {
                missing: missing.into_iter().map(String::from).collect(),
            })
        }
    }

    /// The local user field; idnumber until validation has run.
    pub fn local_user_field(&self) -> LocalUserField {
        self.mapping.local_user_field.unwrap_or_default()
    }

    /// Chunk size, never zero.
    pub fn chunk_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

fn parse_enum<F, T>(reader: &F, key: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
    T: FromStr<Err = String> + Default,
{
    match optional_var(reader, key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.into(), e)),
        None => Ok(T::default()),
    }
}
