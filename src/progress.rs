//! Progress tracking: the enrollment status machine and its recompute rule.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::access;
use crate::catalog;
use crate::error::{DenyReason, LmsError, LmsResult};
use crate::models::{Enrollment, EnrollmentChange, EnrollmentStatus, LessonTally, Principal};
use crate::store::Store;

/// Percentage of published lessons completed.
///
/// Never reports 100 before every lesson is done, and never 0 once one is.
pub fn compute_progress(tally: LessonTally) -> i32 {
    if tally.total <= 0 || tally.completed <= 0 {
        return 0;
    }
    if tally.completed >= tally.total {
        return 100;
    }
    let pct = (tally.completed as f64 / tally.total as f64 * 100.0).round() as i32;
    pct.clamp(1, 99)
}

/// Status implied by `progress`. A pause survives anything short of 100.
pub fn derive_status(progress: i32, previous: EnrollmentStatus) -> EnrollmentStatus {
    match progress {
        p if p >= 100 => EnrollmentStatus::Completed,
        _ if previous == EnrollmentStatus::Paused => EnrollmentStatus::Paused,
        p if p <= 0 => EnrollmentStatus::NotStarted,
        _ => EnrollmentStatus::InProgress,
    }
}

/// Pure transition applied by every store under its row lock.
pub fn apply_change(
    current: &Enrollment,
    change: EnrollmentChange,
    tally: LessonTally,
    now: DateTime<Utc>,
) -> LmsResult<Enrollment> {
    let mut next = current.clone();
    next.last_accessed_at = now;

    match change {
        EnrollmentChange::Touch => return Ok(next),
        EnrollmentChange::CompleteLesson(_) => {
            next.progress = compute_progress(tally);
            next.status = derive_status(next.progress, current.status);
        }
        EnrollmentChange::Pause => {
            if current.status == EnrollmentStatus::Completed {
                return Err(LmsError::Validation("a completed enrollment cannot be paused".into()));
            }
            next.status = EnrollmentStatus::Paused;
        }
        EnrollmentChange::Resume => {
            next.status = derive_status(current.progress, EnrollmentStatus::InProgress);
        }
    }

    next.completed_at = match next.status {
        EnrollmentStatus::Completed => current.completed_at.or(Some(now)),
        _ => None,
    };
    Ok(next)
}

/// Marks `lesson_id` complete for the principal's enrollment in its course.
pub async fn record_lesson_completion(
    store: &dyn Store,
    principal: &Principal,
    lesson_id: Uuid,
) -> LmsResult<Enrollment> {
    let ctx = catalog::load_lesson(store, lesson_id).await?;
    let enrollment = store
        .find_enrollment(ctx.course.id, principal.id)
        .await?
        .ok_or(LmsError::Forbidden(DenyReason::NotEnrolled))?;
    access::can_access_lesson(principal, &ctx.course, &ctx.lesson, Some(&enrollment)).into_result()?;

    let updated = store
        .update_enrollment(enrollment.id, EnrollmentChange::CompleteLesson(lesson_id), Utc::now())
        .await?;

    if updated.status != enrollment.status {
        tracing::info!(
            enrollment = %updated.id,
            from = %enrollment.status,
            to = %updated.status,
            progress = updated.progress,
            "enrollment status changed"
        );
    } else {
        tracing::debug!(enrollment = %updated.id, progress = updated.progress, "lesson completed");
    }
    Ok(updated)
}

/// Bumps `last_accessed_at` when the principal is enrolled; a no-op otherwise.
pub async fn record_lesson_view(
    store: &dyn Store,
    principal: &Principal,
    course_id: Uuid,
) -> LmsResult<Option<Enrollment>> {
    match store.find_enrollment(course_id, principal.id).await? {
        Some(e) => Ok(Some(
            store.update_enrollment(e.id, EnrollmentChange::Touch, Utc::now()).await?,
        )),
        None => Ok(None),
    }
}
