use serde::Serialize;

use crate::error::{DenyReason, LmsError, LmsResult};
use crate::models::{AccessLevel, Course, Enrollment, Lesson, Principal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "access", content = "reason")]
pub enum Access {
    Allowed,
    Denied(DenyReason),
}

impl Access {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Access::Allowed)
    }

    pub fn into_result(self) -> LmsResult<()> {
        match self {
            Access::Allowed => Ok(()),
            Access::Denied(reason) => Err(LmsError::Forbidden(reason)),
        }
    }
}

fn is_enrolled(principal: &Principal, course: &Course, enrollment: Option<&Enrollment>) -> bool {
    enrollment.is_some_and(|e| e.course_id == course.id && e.student_id == principal.id)
}

/// Whether `principal` may view and play `lesson`.
///
/// Course managers see everything, drafts included. Everyone else is refused
/// unpublished lessons, gets public lessons for free, and needs an enrollment
/// for private ones.
pub fn can_access_lesson(
    principal: &Principal,
    course: &Course,
    lesson: &Lesson,
    enrollment: Option<&Enrollment>,
) -> Access {
    if principal.manages(course) {
        return Access::Allowed;
    }
    if !lesson.active {
        return Access::Denied(DenyReason::Unpublished);
    }
    match lesson.access {
        AccessLevel::Public => Access::Allowed,
        AccessLevel::Private if is_enrolled(principal, course, enrollment) => Access::Allowed,
        AccessLevel::Private => Access::Denied(DenyReason::NotEnrolled),
    }
}

/// How a lesson is presented in the sidebar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonMarker {
    Completed,
    /// Public lesson seen without an enrollment.
    Preview,
    Available,
    Locked,
    /// Unpublished; only course managers get this.
    Draft,
}

/// `None` means the lesson is hidden from this principal.
pub fn lesson_marker(
    principal: &Principal,
    course: &Course,
    lesson: &Lesson,
    enrollment: Option<&Enrollment>,
    completed: bool,
) -> Option<LessonMarker> {
    if !lesson.active {
        return principal.manages(course).then_some(LessonMarker::Draft);
    }
    if completed {
        return Some(LessonMarker::Completed);
    }
    let marker = match can_access_lesson(principal, course, lesson, enrollment) {
        Access::Allowed
            if lesson.access == AccessLevel::Public
                && !is_enrolled(principal, course, enrollment)
                && !principal.manages(course) =>
        {
            LessonMarker::Preview
        }
        Access::Allowed => LessonMarker::Available,
        Access::Denied(_) => LessonMarker::Locked,
    };
    Some(marker)
}
