//! Enrollment manager: one enrollment per (student, course).

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::catalog;
use crate::error::{DenyReason, Entity, LmsError, LmsResult};
use crate::models::{Enrollment, EnrollmentChange, Principal, StatusAction};
use crate::store::{Inserted, Store};

/// Domain outcome of an enroll call. Only storage and permission failures
/// surface as `Err`.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "enrollment")]
pub enum EnrollOutcome {
    Created(Enrollment),
    AlreadyEnrolled(Enrollment),
    CourseNotFound,
    UserNotFound,
}

impl EnrollOutcome {
    pub fn enrollment(&self) -> Option<&Enrollment> {
        match self {
            EnrollOutcome::Created(e) | EnrollOutcome::AlreadyEnrolled(e) => Some(e),
            _ => None,
        }
    }
}

/// Enrolls `student_id` in `course_id`.
///
/// Uniqueness is left to the store's constraint: there is no lookup before
/// the insert, so two racing calls for the same pair resolve to one
/// `Created` and one `AlreadyEnrolled`.
pub async fn enroll(
    store: &dyn Store,
    principal: &Principal,
    course_id: Uuid,
    student_id: Uuid,
) -> LmsResult<EnrollOutcome> {
    let course = match store.get_course(course_id).await? {
        Some(c) if c.active => c,
        _ => return Ok(EnrollOutcome::CourseNotFound),
    };
    if principal.id != student_id && !principal.manages(&course) {
        return Err(LmsError::Forbidden(DenyReason::RoleInsufficient));
    }
    if store.get_user(student_id).await?.is_none() {
        return Ok(EnrollOutcome::UserNotFound);
    }

    let outcome = match store.insert_enrollment(Enrollment::new(course_id, student_id, Utc::now())).await? {
        Inserted::New(e) => {
            tracing::info!(enrollment = %e.id, course = %course_id, student = %student_id, "enrolled");
            EnrollOutcome::Created(e)
        }
        Inserted::Existing(e) => {
            tracing::debug!(enrollment = %e.id, course = %course_id, student = %student_id, "already enrolled");
            EnrollOutcome::AlreadyEnrolled(e)
        }
    };
    Ok(outcome)
}

pub async fn check_enrollment(store: &dyn Store, course_id: Uuid, student_id: Uuid) -> LmsResult<bool> {
    Ok(store.find_enrollment(course_id, student_id).await?.is_some())
}

pub async fn get_enrollment_details(
    store: &dyn Store,
    course_id: Uuid,
    student_id: Uuid,
) -> LmsResult<Enrollment> {
    store
        .find_enrollment(course_id, student_id)
        .await?
        .ok_or(LmsError::NotFound(Entity::Enrollment))
}

/// Pause or resume. Students act on their own enrollment; course managers
/// may act on anyone's.
pub async fn change_status(
    store: &dyn Store,
    principal: &Principal,
    course_id: Uuid,
    student_id: Uuid,
    action: StatusAction,
) -> LmsResult<Enrollment> {
    if principal.id != student_id {
        let course = catalog::load_course(store, course_id).await?;
        if !principal.manages(&course) {
            return Err(LmsError::Forbidden(DenyReason::RoleInsufficient));
        }
    }
    let current = get_enrollment_details(store, course_id, student_id).await?;
    let change = match action {
        StatusAction::Pause => EnrollmentChange::Pause,
        StatusAction::Resume => EnrollmentChange::Resume,
    };
    let updated = store.update_enrollment(current.id, change, Utc::now()).await?;
    tracing::info!(enrollment = %updated.id, ?action, status = %updated.status, "enrollment status set");
    Ok(updated)
}

/// Dashboard listing for the principal, most recently accessed first.
pub async fn list_for_student(store: &dyn Store, principal: &Principal) -> LmsResult<Vec<Enrollment>> {
    let mut list = store.enrollments_for_student(principal.id).await?;
    list.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
    Ok(list)
}
