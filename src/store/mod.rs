//! Durable storage collaborator.
//!
//! Implementations own atomicity: enrollment uniqueness, reorder batches and
//! enrollment recomputation must each be a single failure-atomic unit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::LmsResult;
use crate::models::{
    Course, CourseTree, Enrollment, EnrollmentChange, Lesson, Module, NewCourse, NewLesson,
    NewModule, User,
};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Result of an insert guarded by the (course, student) unique constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum Inserted {
    New(Enrollment),
    Existing(Enrollment),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user(&self, id: Uuid) -> LmsResult<Option<User>>;
    async fn insert_user(&self, user: User) -> LmsResult<User>;
    async fn set_avatar_url(&self, user_id: Uuid, url: &str) -> LmsResult<()>;

    async fn get_course(&self, id: Uuid) -> LmsResult<Option<Course>>;
    async fn insert_course(&self, course: NewCourse) -> LmsResult<Course>;
    /// Course with modules and lessons, siblings in insertion order.
    async fn course_tree(&self, course_id: Uuid) -> LmsResult<Option<CourseTree>>;

    async fn get_module(&self, id: Uuid) -> LmsResult<Option<Module>>;
    async fn modules_of(&self, course_id: Uuid) -> LmsResult<Vec<Module>>;
    /// Inserts the module and bumps the course's `module_version`.
    async fn insert_module(&self, module: NewModule) -> LmsResult<Module>;

    async fn get_lesson(&self, id: Uuid) -> LmsResult<Option<Lesson>>;
    async fn lessons_of(&self, module_id: Uuid) -> LmsResult<Vec<Lesson>>;
    /// Inserts the lesson and bumps the module's `lesson_version`.
    async fn insert_lesson(&self, lesson: NewLesson) -> LmsResult<Lesson>;
    async fn set_lesson_document(&self, lesson_id: Uuid, url: &str) -> LmsResult<()>;

    /// Applies all writes or none. Fails with `Conflict(StaleReorder)` when
    /// the course's `module_version` differs from `expected_version`.
    async fn reorder_modules(
        &self,
        course_id: Uuid,
        expected_version: i64,
        writes: &[(Uuid, i32)],
    ) -> LmsResult<i64>;

    /// Same contract as [`Store::reorder_modules`], keyed on the module's
    /// `lesson_version`.
    async fn reorder_lessons(
        &self,
        module_id: Uuid,
        expected_version: i64,
        writes: &[(Uuid, i32)],
    ) -> LmsResult<i64>;

    async fn insert_enrollment(&self, enrollment: Enrollment) -> LmsResult<Inserted>;
    async fn find_enrollment(&self, course_id: Uuid, student_id: Uuid)
        -> LmsResult<Option<Enrollment>>;
    async fn enrollments_for_student(&self, student_id: Uuid) -> LmsResult<Vec<Enrollment>>;
    async fn completed_lessons(&self, enrollment_id: Uuid) -> LmsResult<HashSet<Uuid>>;

    /// Reads, recomputes via [`crate::progress::apply_change`] and writes the
    /// enrollment as one atomic step.
    async fn update_enrollment(
        &self,
        enrollment_id: Uuid,
        change: EnrollmentChange,
        at: DateTime<Utc>,
    ) -> LmsResult<Enrollment>;
}
