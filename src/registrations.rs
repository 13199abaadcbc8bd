//! Intake of business registrations.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;
use validator::Validate;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{BusinessRegistration, CreateBusinessRegistrationRequest};
use crate::store::{with_deadline, Store};

#[derive(Clone)]
pub struct RegistrationStore {
    store: Arc<dyn Store>,
    deadline: Duration,
}

impl RegistrationStore {
    pub fn new(store: Arc<dyn Store>, deadline: Duration) -> Self {
        Self { store, deadline }
    }

    /// Stores a new registration in `pending`.
    pub async fn submit(
        &self,
        request: CreateBusinessRegistrationRequest,
    ) -> ServiceResult<BusinessRegistration> {
        request.validate()?;
        if request.document_urls.iter().any(|url| url.trim().is_empty()) {
            return Err(ServiceError::validation(
                "document_urls",
                "document references must not be blank",
            ));
        }

        let registration = with_deadline(
            self.deadline,
            self.store.insert_registration(request.into_new_registration()),
        )
        .await?;
        log::info!(
            "Registration {} submitted by user {}",
            registration.id,
            registration.user_id
        );
        Ok(registration)
    }

    pub async fn get(&self, registration_id: Uuid) -> ServiceResult<BusinessRegistration> {
        with_deadline(self.deadline, self.store.get_registration(registration_id))
            .await?
            .ok_or_else(|| ServiceError::not_found("registration", registration_id))
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> ServiceResult<Vec<BusinessRegistration>> {
        with_deadline(self.deadline, self.store.list_registrations_for_user(user_id)).await
    }

    /// The user's most recent submission.
    pub async fn latest_for_user(&self, user_id: Uuid) -> ServiceResult<BusinessRegistration> {
        with_deadline(self.deadline, self.store.latest_registration_for_user(user_id))
            .await?
            .ok_or_else(|| ServiceError::not_found("registration for user", user_id))
    }

    /// Removes a registration and its audit trail. The business it produced,
    /// if any, survives without a back-reference.
    pub async fn purge(&self, registration_id: Uuid) -> ServiceResult<()> {
        with_deadline(self.deadline, self.store.purge_registration(registration_id)).await?;
        log::info!("Purged registration {}", registration_id);
        Ok(())
    }
}
