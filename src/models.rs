use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

// ----- principal -----

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Instructor,
    Admin,
}

/// The authenticated caller, as handed over by the identity gateway.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins manage every course; instructors only the ones they own.
    pub fn manages(&self, course: &Course) -> bool {
        self.is_admin() || (self.role == Role::Instructor && course.instructor_id == self.id)
    }
}

// ----- catalog -----

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub instructor_id: Uuid,
    pub active: bool,
    pub module_version: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Module {
    pub id: Uuid,
    pub course_id: Uuid,
    pub slug: String,
    pub title: String,
    pub module_order: i32,
    pub lesson_version: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Public,
    Private,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Lesson {
    pub id: Uuid,
    pub module_id: Uuid,
    pub slug: String,
    pub title: String,
    pub lesson_order: i32,
    pub access: AccessLevel,
    pub active: bool,
    pub duration_minutes: i32,
    pub document_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A module with its lessons, in storage insertion order.
#[derive(Serialize, Debug, Clone)]
pub struct ModuleTree {
    pub module: Module,
    pub lessons: Vec<Lesson>,
}

/// A course with its modules and lessons populated, siblings in insertion order.
#[derive(Serialize, Debug, Clone)]
pub struct CourseTree {
    pub course: Course,
    pub modules: Vec<ModuleTree>,
}

// ----- enrollment -----

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EnrollmentStatus {
    NotStarted,
    InProgress,
    Completed,
    Paused,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not-started",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrollmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not-started" => Ok(Self::NotStarted),
            "in-progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "paused" => Ok(Self::Paused),
            other => Err(format!("unknown enrollment status {other:?}")),
        }
    }
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(format!("unknown access level {other:?}")),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Self::Student),
            "instructor" => Ok(Self::Instructor),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Enrollment {
    pub id: Uuid,
    pub course_id: Uuid,
    pub student_id: Uuid,
    pub status: EnrollmentStatus,
    pub progress: i32,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_accessed_at: DateTime<Utc>,
}

impl Enrollment {
    pub fn new(course_id: Uuid, student_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            course_id,
            student_id,
            status: EnrollmentStatus::NotStarted,
            progress: 0,
            enrolled_at: now,
            completed_at: None,
            last_accessed_at: now,
        }
    }
}

/// Completed vs. total published lessons of a course, as seen by one enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LessonTally {
    pub completed: i64,
    pub total: i64,
}

/// A mutation applied to a single enrollment under the store's row lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentChange {
    CompleteLesson(Uuid),
    Touch,
    Pause,
    Resume,
}

// ----- request payloads -----

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct CreateCourseReq {
    pub title: String,
    pub description: Option<String>,
    /// Admins may create on behalf of an instructor; defaults to the caller.
    pub instructor_id: Option<Uuid>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct CreateModuleReq {
    pub slug: String,
    pub title: String,
    pub order: Option<i32>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct CreateLessonReq {
    pub slug: String,
    pub title: String,
    pub order: Option<i32>,
    pub access: AccessLevel,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub duration_minutes: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ReorderItem {
    pub id: Uuid,
    pub position: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ReorderReq {
    /// Parent version the client last read; a mismatch rejects the batch.
    pub expected_version: i64,
    pub items: Vec<ReorderItem>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct EnrollReq {
    pub student_id: Option<Uuid>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusAction {
    Pause,
    Resume,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct StatusReq {
    pub action: StatusAction,
    pub student_id: Option<Uuid>,
}

fn default_true() -> bool {
    true
}

// ----- validated inserts -----

/// Module row ready for insertion; `order` already resolved.
#[derive(Debug, Clone)]
pub struct NewModule {
    pub course_id: Uuid,
    pub slug: String,
    pub title: String,
    pub order: i32,
}

#[derive(Debug, Clone)]
pub struct NewLesson {
    pub module_id: Uuid,
    pub slug: String,
    pub title: String,
    pub order: i32,
    pub access: AccessLevel,
    pub active: bool,
    pub duration_minutes: i32,
}

#[derive(Debug, Clone)]
pub struct NewCourse {
    pub title: String,
    pub description: Option<String>,
    pub instructor_id: Uuid,
    pub active: bool,
}
