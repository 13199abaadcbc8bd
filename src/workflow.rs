//! Review workflow: the verification state machine and its audit trail.
//!
//! ```text
//! pending ─claim─▶ under_review ─approve─▶ approved ◀─resume─┐
//!    │                 │    └──reject──▶ rejected            │
//!    │                 └──suspend──▶ suspended ──────────────┘
//!    └─approve/reject (direct decision)   approved ─suspend─▶ suspended
//! ```
//!
//! `comment` and `request_more_info` are accepted in every state except
//! `rejected` and never move the status.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    BusinessRegistration, BusinessReviewEvent, BusinessVerificationStatus as Status,
    PendingBusinessReview, RegistrationWithHistory, ReviewAction, ReviewCommand, ReviewOutcome,
    ReviewStats,
};
use crate::store::{with_deadline, Store};

const ENTITY: &str = "registration";

/// Status reached by applying `action` in `current`.
pub fn next_status(current: Status, action: ReviewAction) -> ServiceResult<Status> {
    let next = match (current, action) {
        (Status::Pending | Status::UnderReview | Status::Approved, ReviewAction::Approve) => {
            Status::Approved
        }
        (Status::Pending | Status::UnderReview, ReviewAction::Reject) => Status::Rejected,
        (Status::UnderReview | Status::Approved, ReviewAction::Suspend) => Status::Suspended,
        (Status::Suspended, ReviewAction::Resume) => Status::Approved,
        (state, ReviewAction::Comment | ReviewAction::RequestMoreInfo) if !state.is_terminal() => {
            state
        }
        (state, action) => return Err(ServiceError::invalid_transition(ENTITY, state, action)),
    };
    Ok(next)
}

/// Status reached when a reviewer picks a registration up.
pub fn claim_status(current: Status) -> ServiceResult<Status> {
    match current {
        Status::Pending => Ok(Status::UnderReview),
        other => Err(ServiceError::invalid_transition(ENTITY, other, "claim")),
    }
}

/// Boundary checks that do not depend on stored state.
pub fn validate_command(command: &ReviewCommand) -> ServiceResult<()> {
    if command.action == ReviewAction::Reject {
        let has_reason = command
            .rejection_reason
            .as_deref()
            .map(|r| !r.trim().is_empty())
            .unwrap_or(false);
        if !has_reason {
            return Err(ServiceError::validation(
                "rejection_reason",
                "a rejection reason is required when rejecting a registration",
            ));
        }
    }
    Ok(())
}

/// The first transition into `approved` creates the business.
pub fn needs_materialization(registration: &BusinessRegistration, next: Status) -> bool {
    next == Status::Approved && registration.business_id.is_none()
}

/// Applies an accepted command to the registration row.
pub fn apply_command(
    registration: &mut BusinessRegistration,
    command: &ReviewCommand,
    next: Status,
    now: DateTime<Utc>,
) {
    registration.status = next;
    if command.action == ReviewAction::Reject {
        registration.rejection_reason = command.rejection_reason.clone();
    }
    if command.notes.is_some() {
        registration.reviewer_notes = command.notes.clone();
    }
    if command.reviewer_id.is_some() {
        registration.reviewer_id = command.reviewer_id;
    }
    if command.reviewer_name.is_some() {
        registration.reviewer_name = command.reviewer_name.clone();
    }
    registration.updated_at = now;
}

pub fn build_event(command: &ReviewCommand, created_at: DateTime<Utc>) -> BusinessReviewEvent {
    BusinessReviewEvent {
        id: Uuid::new_v4(),
        registration_id: command.registration_id,
        reviewer_id: command.reviewer_id,
        reviewer_name: command.reviewer_name.clone(),
        action: command.action,
        notes: command.notes.clone(),
        rejection_reason: if command.action == ReviewAction::Reject {
            command.rejection_reason.clone()
        } else {
            None
        },
        created_at,
    }
}

/// Audit command recorded when a reviewer claims a registration.
pub fn claim_command(registration_id: Uuid, reviewer_id: Uuid, reviewer_name: String) -> ReviewCommand {
    ReviewCommand {
        registration_id,
        action: ReviewAction::Comment,
        notes: Some(format!("Review started by {}", reviewer_name)),
        reviewer_id: Some(reviewer_id),
        reviewer_name: Some(reviewer_name),
        rejection_reason: None,
    }
}

/// Builds dashboard statistics from raw rows.
pub fn compute_stats(
    registrations: &[BusinessRegistration],
    events: &[BusinessReviewEvent],
    now: DateTime<Utc>,
) -> ReviewStats {
    let mut stats = ReviewStats {
        total: registrations.len() as i64,
        ..ReviewStats::default()
    };
    let day_ago = now - chrono::Duration::days(1);

    // (first, latest) approve/reject per registration
    let mut decisions: HashMap<Uuid, (DateTime<Utc>, DateTime<Utc>)> = HashMap::new();
    for event in events
        .iter()
        .filter(|e| matches!(e.action, ReviewAction::Approve | ReviewAction::Reject))
    {
        decisions
            .entry(event.registration_id)
            .and_modify(|(first, latest)| {
                *first = (*first).min(event.created_at);
                *latest = (*latest).max(event.created_at);
            })
            .or_insert((event.created_at, event.created_at));
    }

    let mut decision_hours = Vec::new();
    for registration in registrations {
        let decision = decisions.get(&registration.id);
        let decided_today = decision.map(|(_, latest)| *latest >= day_ago).unwrap_or(false);
        match registration.status {
            Status::Pending => stats.pending += 1,
            Status::UnderReview => stats.under_review += 1,
            Status::Approved => {
                stats.approved += 1;
                if decided_today {
                    stats.approved_today += 1;
                }
            }
            Status::Rejected => {
                stats.rejected += 1;
                if decided_today {
                    stats.rejected_today += 1;
                }
            }
            Status::Suspended => stats.suspended += 1,
        }

        if let Some((decided_at, _)) = decision {
            let seconds = (*decided_at - registration.submitted_at).num_milliseconds() as f64 / 1000.0;
            decision_hours.push(seconds / 3600.0);
        }
    }

    stats.approval_rate = approval_rate(stats.approved, stats.rejected);
    if !decision_hours.is_empty() {
        stats.mean_hours_to_decision =
            Some(decision_hours.iter().sum::<f64>() / decision_hours.len() as f64);
    }
    stats
}

pub fn approval_rate(approved: i64, rejected: i64) -> Option<f64> {
    let decided = approved + rejected;
    if decided == 0 {
        None
    } else {
        Some(approved as f64 / decided as f64)
    }
}

/// Drives registrations through review.
#[derive(Clone)]
pub struct ReviewWorkflow {
    store: Arc<dyn Store>,
    deadline: Duration,
}

impl ReviewWorkflow {
    pub fn new(store: Arc<dyn Store>, deadline: Duration) -> Self {
        Self { store, deadline }
    }

    pub async fn apply_action(
        &self,
        registration_id: Uuid,
        action: ReviewAction,
        actor_id: Option<Uuid>,
        actor_name: Option<String>,
        notes: Option<String>,
        rejection_reason: Option<String>,
    ) -> ServiceResult<ReviewOutcome> {
        let command = ReviewCommand {
            registration_id,
            action,
            reviewer_id: actor_id,
            reviewer_name: actor_name.filter(|name| !name.trim().is_empty()),
            notes: notes.filter(|n| !n.trim().is_empty()),
            rejection_reason: rejection_reason.map(|r| r.trim().to_string()),
        };

        if let Err(err) = validate_command(&command) {
            log::warn!("Rejected review action {} on {}: {}", action, registration_id, err);
            return Err(err);
        }

        let outcome = with_deadline(self.deadline, self.store.apply_review_action(command))
            .await
            .inspect_err(|err| {
                log::warn!("Review action {} on {} failed: {}", action, registration_id, err)
            })?;

        log::info!(
            "Registration {} is now {} after {}",
            registration_id,
            outcome.registration.status,
            action
        );
        if let Some(materialized) = &outcome.business {
            log::info!(
                "Materialized business {} with {} location(s) from registration {}",
                materialized.business.id,
                materialized.locations.len(),
                registration_id
            );
        }
        Ok(outcome)
    }

    pub async fn claim_for_review(
        &self,
        registration_id: Uuid,
        reviewer_id: Uuid,
        reviewer_name: String,
    ) -> ServiceResult<ReviewOutcome> {
        let outcome = with_deadline(
            self.deadline,
            self.store
                .claim_for_review(registration_id, reviewer_id, reviewer_name),
        )
        .await?;
        log::info!("Registration {} claimed by reviewer {}", registration_id, reviewer_id);
        Ok(outcome)
    }

    pub async fn list_pending(&self, limit: i64, offset: i64) -> ServiceResult<Vec<PendingBusinessReview>> {
        let limit = limit.clamp(1, 100);
        let offset = offset.max(0);
        with_deadline(self.deadline, self.store.list_pending_reviews(limit, offset)).await
    }

    pub async fn get_with_history(&self, registration_id: Uuid) -> ServiceResult<RegistrationWithHistory> {
        let registration = with_deadline(self.deadline, self.store.get_registration(registration_id))
            .await?
            .ok_or_else(|| ServiceError::not_found(ENTITY, registration_id))?;
        let history =
            with_deadline(self.deadline, self.store.list_review_events(registration_id)).await?;
        Ok(RegistrationWithHistory {
            registration,
            history,
        })
    }

    pub async fn stats(&self) -> ServiceResult<ReviewStats> {
        with_deadline(self.deadline, self.store.review_stats(Utc::now())).await
    }
}
