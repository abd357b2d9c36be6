use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{query, query_as, query_scalar};
use std::collections::HashSet;
use uuid::Uuid;

use super::{Inserted, Store};
use crate::db::Db;
use crate::error::{ConflictKind, Entity, LmsError, LmsResult};
use crate::models::{
    Course, CourseTree, Enrollment, EnrollmentChange, Lesson, LessonTally, Module, ModuleTree,
    NewCourse, NewLesson, NewModule, User,
};
use crate::progress;

const COURSE_COLS: &str = "id, title, description, instructor_id, active, module_version, created_at";
const MODULE_COLS: &str = "id, course_id, slug, title, module_order, lesson_version, created_at";
const LESSON_COLS: &str = "id, module_id, slug, title, lesson_order, access, active, duration_minutes, document_url, created_at";
const ENROLLMENT_COLS: &str = "id, course_id, student_id, status, progress, enrolled_at, completed_at, last_accessed_at";

#[derive(sqlx::FromRow)]
struct LessonRow {
    id: Uuid,
    module_id: Uuid,
    slug: String,
    title: String,
    lesson_order: i32,
    access: String,
    active: bool,
    duration_minutes: i32,
    document_url: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LessonRow> for Lesson {
    type Error = LmsError;

    fn try_from(r: LessonRow) -> Result<Self, Self::Error> {
        Ok(Lesson {
            id: r.id,
            module_id: r.module_id,
            slug: r.slug,
            title: r.title,
            lesson_order: r.lesson_order,
            access: r.access.parse().map_err(LmsError::Storage)?,
            active: r.active,
            duration_minutes: r.duration_minutes,
            document_url: r.document_url,
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EnrollmentRow {
    id: Uuid,
    course_id: Uuid,
    student_id: Uuid,
    status: String,
    progress: i32,
    enrolled_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    last_accessed_at: DateTime<Utc>,
}

impl TryFrom<EnrollmentRow> for Enrollment {
    type Error = LmsError;

    fn try_from(r: EnrollmentRow) -> Result<Self, Self::Error> {
        Ok(Enrollment {
            id: r.id,
            course_id: r.course_id,
            student_id: r.student_id,
            status: r.status.parse().map_err(LmsError::Storage)?,
            progress: r.progress,
            enrolled_at: r.enrolled_at,
            completed_at: r.completed_at,
            last_accessed_at: r.last_accessed_at,
        })
    }
}

/// Order keys are checked at commit; inside a reorder a collision means the
/// sibling set moved since the batch was planned.
fn stale_on_collision(e: sqlx::Error) -> LmsError {
    match LmsError::from(e) {
        LmsError::Conflict(ConflictKind::DuplicateOrder) => {
            LmsError::Conflict(ConflictKind::StaleReorder)
        }
        other => other,
    }
}

fn lessons(rows: Vec<LessonRow>) -> LmsResult<Vec<Lesson>> {
    rows.into_iter().map(Lesson::try_from).collect()
}

/// [`Store`] backed by Postgres. Uniqueness and ordering rely on the
/// constraints in `migrations/`.
#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_user(&self, id: Uuid) -> LmsResult<Option<User>> {
        let user = query_as::<_, User>(
            "SELECT id, email, name, role, avatar_url, created_at FROM users WHERE id=$1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn insert_user(&self, user: User) -> LmsResult<User> {
        let user = query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, name, role, avatar_url, created_at)
            VALUES ($1,$2,$3,$4,$5,$6)
            RETURNING id, email, name, role, avatar_url, created_at
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.role)
        .bind(&user.avatar_url)
        .bind(user.created_at)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn set_avatar_url(&self, user_id: Uuid, url: &str) -> LmsResult<()> {
        let res = query("UPDATE users SET avatar_url=$2 WHERE id=$1")
            .bind(user_id)
            .bind(url)
            .execute(&self.db)
            .await?;
        if res.rows_affected() == 0 {
            return Err(LmsError::NotFound(Entity::User));
        }
        Ok(())
    }

    async fn get_course(&self, id: Uuid) -> LmsResult<Option<Course>> {
        let course = query_as::<_, Course>(&format!("SELECT {COURSE_COLS} FROM courses WHERE id=$1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(course)
    }

    async fn insert_course(&self, course: NewCourse) -> LmsResult<Course> {
        let row = query_as::<_, Course>(&format!(
            r#"
            INSERT INTO courses (id, title, description, instructor_id, active)
            VALUES ($1,$2,$3,$4,$5)
            RETURNING {COURSE_COLS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&course.title)
        .bind(&course.description)
        .bind(course.instructor_id)
        .bind(course.active)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn course_tree(&self, course_id: Uuid) -> LmsResult<Option<CourseTree>> {
        let Some(course) = self.get_course(course_id).await? else {
            return Ok(None);
        };
        let modules = self.modules_of(course_id).await?;
        let rows = query_as::<_, LessonRow>(
            r#"
            SELECT l.id, l.module_id, l.slug, l.title, l.lesson_order, l.access, l.active,
                   l.duration_minutes, l.document_url, l.created_at
            FROM lessons l JOIN modules m ON m.id = l.module_id
            WHERE m.course_id = $1
            ORDER BY l.seq
            "#,
        )
        .bind(course_id)
        .fetch_all(&self.db)
        .await?;
        let all = lessons(rows)?;

        let modules = modules
            .into_iter()
            .map(|m| ModuleTree {
                lessons: all.iter().filter(|l| l.module_id == m.id).cloned().collect(),
                module: m,
            })
            .collect();
        Ok(Some(CourseTree { course, modules }))
    }

    async fn get_module(&self, id: Uuid) -> LmsResult<Option<Module>> {
        let module = query_as::<_, Module>(&format!("SELECT {MODULE_COLS} FROM modules WHERE id=$1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(module)
    }

    async fn modules_of(&self, course_id: Uuid) -> LmsResult<Vec<Module>> {
        let modules = query_as::<_, Module>(&format!(
            "SELECT {MODULE_COLS} FROM modules WHERE course_id=$1 ORDER BY seq"
        ))
        .bind(course_id)
        .fetch_all(&self.db)
        .await?;
        Ok(modules)
    }

    async fn insert_module(&self, module: NewModule) -> LmsResult<Module> {
        let mut tx = self.db.begin().await?;
        let bumped = query("UPDATE courses SET module_version = module_version + 1 WHERE id=$1")
            .bind(module.course_id)
            .execute(&mut *tx)
            .await?;
        if bumped.rows_affected() == 0 {
            return Err(LmsError::NotFound(Entity::Course));
        }
        let row = query_as::<_, Module>(&format!(
            r#"
            INSERT INTO modules (id, course_id, slug, title, module_order)
            VALUES ($1,$2,$3,$4,$5)
            RETURNING {MODULE_COLS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(module.course_id)
        .bind(&module.slug)
        .bind(&module.title)
        .bind(module.order)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn get_lesson(&self, id: Uuid) -> LmsResult<Option<Lesson>> {
        let row = query_as::<_, LessonRow>(&format!("SELECT {LESSON_COLS} FROM lessons WHERE id=$1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        row.map(Lesson::try_from).transpose()
    }

    async fn lessons_of(&self, module_id: Uuid) -> LmsResult<Vec<Lesson>> {
        let rows = query_as::<_, LessonRow>(&format!(
            "SELECT {LESSON_COLS} FROM lessons WHERE module_id=$1 ORDER BY seq"
        ))
        .bind(module_id)
        .fetch_all(&self.db)
        .await?;
        lessons(rows)
    }

    async fn insert_lesson(&self, lesson: NewLesson) -> LmsResult<Lesson> {
        let mut tx = self.db.begin().await?;
        let bumped = query("UPDATE modules SET lesson_version = lesson_version + 1 WHERE id=$1")
            .bind(lesson.module_id)
            .execute(&mut *tx)
            .await?;
        if bumped.rows_affected() == 0 {
            return Err(LmsError::NotFound(Entity::Module));
        }
        let row = query_as::<_, LessonRow>(&format!(
            r#"
            INSERT INTO lessons (id, module_id, slug, title, lesson_order, access, active, duration_minutes)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            RETURNING {LESSON_COLS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(lesson.module_id)
        .bind(&lesson.slug)
        .bind(&lesson.title)
        .bind(lesson.order)
        .bind(lesson.access.as_str())
        .bind(lesson.active)
        .bind(lesson.duration_minutes)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        row.try_into()
    }

    async fn set_lesson_document(&self, lesson_id: Uuid, url: &str) -> LmsResult<()> {
        let res = query("UPDATE lessons SET document_url=$2 WHERE id=$1")
            .bind(lesson_id)
            .bind(url)
            .execute(&self.db)
            .await?;
        if res.rows_affected() == 0 {
            return Err(LmsError::NotFound(Entity::Lesson));
        }
        Ok(())
    }

    async fn reorder_modules(
        &self,
        course_id: Uuid,
        expected_version: i64,
        writes: &[(Uuid, i32)],
    ) -> LmsResult<i64> {
        let mut tx = self.db.begin().await?;
        let version: Option<i64> = query_scalar(
            r#"
            UPDATE courses SET module_version = module_version + 1
            WHERE id=$1 AND module_version=$2
            RETURNING module_version
            "#,
        )
        .bind(course_id)
        .bind(expected_version)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(version) = version else {
            return Err(match self.get_course(course_id).await? {
                Some(_) => LmsError::Conflict(ConflictKind::StaleReorder),
                None => LmsError::NotFound(Entity::Course),
            });
        };

        for (id, order) in writes {
            let res = query("UPDATE modules SET module_order=$3 WHERE id=$1 AND course_id=$2")
                .bind(id)
                .bind(course_id)
                .bind(order)
                .execute(&mut *tx)
                .await?;
            if res.rows_affected() != 1 {
                // dropping tx rolls back the whole batch
                return Err(LmsError::NotFound(Entity::Module));
            }
        }
        tx.commit().await.map_err(stale_on_collision)?;
        Ok(version)
    }

    async fn reorder_lessons(
        &self,
        module_id: Uuid,
        expected_version: i64,
        writes: &[(Uuid, i32)],
    ) -> LmsResult<i64> {
        let mut tx = self.db.begin().await?;
        let version: Option<i64> = query_scalar(
            r#"
            UPDATE modules SET lesson_version = lesson_version + 1
            WHERE id=$1 AND lesson_version=$2
            RETURNING lesson_version
            "#,
        )
        .bind(module_id)
        .bind(expected_version)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(version) = version else {
            return Err(match self.get_module(module_id).await? {
                Some(_) => LmsError::Conflict(ConflictKind::StaleReorder),
                None => LmsError::NotFound(Entity::Module),
            });
        };

        for (id, order) in writes {
            let res = query("UPDATE lessons SET lesson_order=$3 WHERE id=$1 AND module_id=$2")
                .bind(id)
                .bind(module_id)
                .bind(order)
                .execute(&mut *tx)
                .await?;
            if res.rows_affected() != 1 {
                return Err(LmsError::NotFound(Entity::Lesson));
            }
        }
        tx.commit().await.map_err(stale_on_collision)?;
        Ok(version)
    }

    async fn insert_enrollment(&self, enrollment: Enrollment) -> LmsResult<Inserted> {
        let created = query_as::<_, EnrollmentRow>(&format!(
            r#"
            INSERT INTO enrollments ({ENROLLMENT_COLS})
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            ON CONFLICT (course_id, student_id) DO NOTHING
            RETURNING {ENROLLMENT_COLS}
            "#
        ))
        .bind(enrollment.id)
        .bind(enrollment.course_id)
        .bind(enrollment.student_id)
        .bind(enrollment.status.as_str())
        .bind(enrollment.progress)
        .bind(enrollment.enrolled_at)
        .bind(enrollment.completed_at)
        .bind(enrollment.last_accessed_at)
        .fetch_optional(&self.db)
        .await?;

        if let Some(row) = created {
            return Ok(Inserted::New(row.try_into()?));
        }
        // the conflicting row is committed once ON CONFLICT returns
        let existing = self
            .find_enrollment(enrollment.course_id, enrollment.student_id)
            .await?
            .ok_or_else(|| LmsError::Storage("enrollment vanished after conflict".into()))?;
        Ok(Inserted::Existing(existing))
    }

    async fn find_enrollment(&self, course_id: Uuid, student_id: Uuid) -> LmsResult<Option<Enrollment>> {
        let row = query_as::<_, EnrollmentRow>(&format!(
            "SELECT {ENROLLMENT_COLS} FROM enrollments WHERE course_id=$1 AND student_id=$2"
        ))
        .bind(course_id)
        .bind(student_id)
        .fetch_optional(&self.db)
        .await?;
        row.map(Enrollment::try_from).transpose()
    }

    async fn enrollments_for_student(&self, student_id: Uuid) -> LmsResult<Vec<Enrollment>> {
        let rows = query_as::<_, EnrollmentRow>(&format!(
            "SELECT {ENROLLMENT_COLS} FROM enrollments WHERE student_id=$1"
        ))
        .bind(student_id)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(Enrollment::try_from).collect()
    }

    async fn completed_lessons(&self, enrollment_id: Uuid) -> LmsResult<HashSet<Uuid>> {
        let ids: Vec<Uuid> = query_scalar("SELECT lesson_id FROM lesson_completions WHERE enrollment_id=$1")
            .bind(enrollment_id)
            .fetch_all(&self.db)
            .await?;
        Ok(ids.into_iter().collect())
    }

    async fn update_enrollment(
        &self,
        enrollment_id: Uuid,
        change: EnrollmentChange,
        at: DateTime<Utc>,
    ) -> LmsResult<Enrollment> {
        let mut tx = self.db.begin().await?;
        let current: Enrollment = query_as::<_, EnrollmentRow>(&format!(
            "SELECT {ENROLLMENT_COLS} FROM enrollments WHERE id=$1 FOR UPDATE"
        ))
        .bind(enrollment_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(LmsError::NotFound(Entity::Enrollment))?
        .try_into()?;

        if let EnrollmentChange::CompleteLesson(lesson_id) = change {
            query(
                r#"
                INSERT INTO lesson_completions (enrollment_id, lesson_id, completed_at)
                VALUES ($1,$2,$3)
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(enrollment_id)
            .bind(lesson_id)
            .bind(at)
            .execute(&mut *tx)
            .await?;
        }

        let (completed, total): (i64, i64) = query_as(
            r#"
            SELECT COUNT(lc.lesson_id), COUNT(*)
            FROM lessons l
            JOIN modules m ON m.id = l.module_id
            LEFT JOIN lesson_completions lc
              ON lc.lesson_id = l.id AND lc.enrollment_id = $1
            WHERE m.course_id = $2 AND l.active
            "#,
        )
        .bind(enrollment_id)
        .bind(current.course_id)
        .fetch_one(&mut *tx)
        .await?;

        let next = progress::apply_change(&current, change, LessonTally { completed, total }, at)?;

        query(
            r#"
            UPDATE enrollments
            SET status=$2, progress=$3, completed_at=$4, last_accessed_at=$5
            WHERE id=$1
            "#,
        )
        .bind(next.id)
        .bind(next.status.as_str())
        .bind(next.progress)
        .bind(next.completed_at)
        .bind(next.last_accessed_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(next)
    }
}
