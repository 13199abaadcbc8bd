//! Per-location role grants.
//!
//! The directory stores and answers questions about grants. Whether a caller
//! may change them is decided upstream.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::error::ServiceResult;
use crate::models::{AddLocationAdminRequest, LocationAdmin, LocationAdminRole, NewLocationAdmin};
use crate::store::{with_deadline, Store};

/// Folds a grant into the existing row for the same (location, user), or
/// creates the row when there is none.
pub fn merge_grant(existing: Option<LocationAdmin>, grant: NewLocationAdmin, now: DateTime<Utc>) -> LocationAdmin {
    match existing {
        Some(mut row) => {
            row.role = grant.role;
            row.user_email = grant.user_email;
            row.user_username = grant.user_username;
            row.granted_by = grant.granted_by;
            row.granted_by_username = grant.granted_by_username;
            row.is_active = true;
            row.granted_at = grant.granted_at;
            row.updated_at = now;
            row
        }
        None => LocationAdmin {
            id: grant.id,
            location_id: grant.location_id,
            user_id: grant.user_id,
            user_email: grant.user_email,
            user_username: grant.user_username,
            role: grant.role,
            granted_by: grant.granted_by,
            granted_by_username: grant.granted_by_username,
            is_active: true,
            granted_at: grant.granted_at,
            created_at: now,
            updated_at: now,
        },
    }
}

/// Highest active role a user holds on a location, if any.
pub fn effective_role(grants: &[LocationAdmin], location_id: Uuid, user_id: Uuid) -> Option<LocationAdminRole> {
    grants
        .iter()
        .filter(|g| g.is_active && g.location_id == location_id && g.user_id == user_id)
        .map(|g| g.role)
        .max()
}

#[derive(Clone)]
pub struct LocationAdminDirectory {
    store: Arc<dyn Store>,
    deadline: Duration,
}

impl LocationAdminDirectory {
    pub fn new(store: Arc<dyn Store>, deadline: Duration) -> Self {
        Self { store, deadline }
    }

    pub async fn grant(
        &self,
        location_id: Uuid,
        request: AddLocationAdminRequest,
        granted_by: Option<Uuid>,
        granted_by_username: Option<String>,
    ) -> ServiceResult<LocationAdmin> {
        request.validate()?;
        let grant = request.into_new_admin(location_id, granted_by, granted_by_username);
        let admin = with_deadline(self.deadline, self.store.upsert_location_admin(grant)).await?;
        log::info!(
            "Granted {:?} on location {} to user {}",
            admin.role,
            location_id,
            admin.user_id
        );
        Ok(admin)
    }

    pub async fn revoke(&self, location_id: Uuid, user_id: Uuid) -> ServiceResult<LocationAdmin> {
        let admin =
            with_deadline(self.deadline, self.store.revoke_location_admin(location_id, user_id))
                .await?;
        log::info!("Revoked access of user {} on location {}", user_id, location_id);
        Ok(admin)
    }

    pub async fn list_for_location(
        &self,
        location_id: Uuid,
        include_revoked: bool,
    ) -> ServiceResult<Vec<LocationAdmin>> {
        with_deadline(
            self.deadline,
            self.store.list_admins_for_location(location_id, include_revoked),
        )
        .await
    }

    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        include_revoked: bool,
    ) -> ServiceResult<Vec<LocationAdmin>> {
        with_deadline(
            self.deadline,
            self.store.list_admins_for_user(user_id, include_revoked),
        )
        .await
    }

    /// Role the user currently holds on the location.
    pub async fn role_of(&self, location_id: Uuid, user_id: Uuid) -> ServiceResult<Option<LocationAdminRole>> {
        let grants = self.list_for_user(user_id, false).await?;
        Ok(effective_role(&grants, location_id, user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(role: LocationAdminRole) -> NewLocationAdmin {
        NewLocationAdmin {
            id: Uuid::new_v4(),
            location_id: Uuid::nil(),
            user_id: Uuid::nil(),
            user_email: "staff@example.com".into(),
            user_username: "staff".into(),
            role,
            granted_by: None,
            granted_by_username: None,
            granted_at: Utc::now(),
        }
    }

    #[test]
    fn regrant_reuses_the_row() {
        let now = Utc::now();
        let mut first = merge_grant(None, grant(LocationAdminRole::Staff), now);
        first.is_active = false;
        let first_id = first.id;

        let second = merge_grant(Some(first), grant(LocationAdminRole::Manager), now);
        assert_eq!(second.id, first_id);
        assert!(second.is_active);
        assert_eq!(second.role, LocationAdminRole::Manager);
    }

    #[test]
    fn revoked_grants_carry_no_role() {
        let now = Utc::now();
        let mut row = merge_grant(None, grant(LocationAdminRole::Owner), now);
        assert_eq!(
            effective_role(&[row.clone()], Uuid::nil(), Uuid::nil()),
            Some(LocationAdminRole::Owner)
        );
        row.is_active = false;
        assert_eq!(effective_role(&[row], Uuid::nil(), Uuid::nil()), None);
    }
}
