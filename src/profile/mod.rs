//! Partial profile updates with a field-level audit trail.
//!
//! [`update_profile`] locks the profile row, diffs it against the requested
//! fields, writes the new state and appends one history entry per changed
//! field, all inside one transaction. Values are compared by their string
//! form, which is also what the history stores.

use crate::store::{Gender, IsolationLevel, NewHistory, Store, StoreError, UserProfile};
use chrono::Utc;
use serde::{Deserialize, Deserializer};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;

/// String form recorded for an absent profile image.
pub const NULL_VALUE: &str = "null";

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile not found")]
    ProfileNotFound,
    #[error("profile transaction failed: {0}")]
    Transaction(#[from] StoreError),
}

/// Requested profile changes. Absent fields are left untouched; unknown fields
/// are rejected.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub age: Option<i32>,
    #[serde(default)]
    pub gender: Option<Gender>,
    /// `null` clears the image, omitting the field keeps it.
    #[serde(default, deserialize_with = "present_or_null")]
    #[schema(value_type = Option<String>)]
    pub profile_image: Option<Option<String>>,
}

fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl ProfileUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.age.is_none()
            && self.gender.is_none()
            && self.profile_image.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileField {
    Name,
    Age,
    Gender,
    ProfileImage,
}

impl ProfileField {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Age => "age",
            Self::Gender => "gender",
            Self::ProfileImage => "profileImage",
        }
    }
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldChange {
    pub field: ProfileField,
    pub old_value: String,
    pub new_value: String,
}

fn image_value(image: Option<&str>) -> String {
    image.map_or_else(|| NULL_VALUE.to_string(), ToString::to_string)
}

fn push_if_changed(changes: &mut Vec<FieldChange>, field: ProfileField, old: String, new: String) {
    if old != new {
        changes.push(FieldChange {
            field,
            old_value: old,
            new_value: new,
        });
    }
}

/// Fields of `update` whose string form differs from `current`, in declaration order.
#[must_use]
pub fn diff(current: &UserProfile, update: &ProfileUpdate) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if let Some(name) = &update.name {
        push_if_changed(&mut changes, ProfileField::Name, current.name.clone(), name.clone());
    }
    if let Some(age) = update.age {
        push_if_changed(
            &mut changes,
            ProfileField::Age,
            current.age.to_string(),
            age.to_string(),
        );
    }
    if let Some(gender) = update.gender {
        push_if_changed(
            &mut changes,
            ProfileField::Gender,
            current.gender.to_string(),
            gender.to_string(),
        );
    }
    if let Some(image) = &update.profile_image {
        push_if_changed(
            &mut changes,
            ProfileField::ProfileImage,
            image_value(current.profile_image.as_deref()),
            image_value(image.as_deref()),
        );
    }
    changes
}

/// `current` with every present field of `update` applied. Timestamps are kept.
#[must_use]
pub fn apply(current: &UserProfile, update: &ProfileUpdate) -> UserProfile {
    let mut next = current.clone();
    if let Some(name) = &update.name {
        next.name.clone_from(name);
    }
    if let Some(age) = update.age {
        next.age = age;
    }
    if let Some(gender) = update.gender {
        next.gender = gender;
    }
    if let Some(image) = &update.profile_image {
        next.profile_image.clone_from(image);
    }
    next
}

/// Apply `update` to the profile of `user_id` and record what changed.
///
/// # Errors
///
/// [`ProfileError::ProfileNotFound`] when the user has no profile, and
/// [`ProfileError::Transaction`] when any store step fails. Either way nothing
/// is persisted.
#[instrument(skip(store, update, isolation), fields(isolation = %isolation))]
pub async fn update_profile(
    store: &dyn Store,
    user_id: i64,
    update: &ProfileUpdate,
    isolation: IsolationLevel,
) -> Result<UserProfile, ProfileError> {
    let mut tx = store.begin(isolation).await?;

    let Some(current) = tx.lock_profile(user_id).await? else {
        debug!("profile not found");
        return Err(ProfileError::ProfileNotFound);
    };

    let changes = diff(&current, update);
    if changes.is_empty() {
        tx.commit().await?;
        debug!("profile update is a no-op");
        return Ok(current);
    }

    let mut next = apply(&current, update);
    next.updated_at = Utc::now();
    tx.update_profile(&next).await?;

    for change in &changes {
        tx.append_history(&NewHistory {
            user_id,
            changed_field: change.field.as_str().to_string(),
            old_value: change.old_value.clone(),
            new_value: change.new_value.clone(),
        })
        .await?;
    }

    tx.commit().await?;
    info!(changed = changes.len(), "profile updated");
    Ok(next)
}
