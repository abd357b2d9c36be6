use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Inserted, Store};
use crate::error::{ConflictKind, Entity, LmsError, LmsResult};
use crate::models::{
    Course, CourseTree, Enrollment, EnrollmentChange, Lesson, LessonTally, Module, ModuleTree,
    NewCourse, NewLesson, NewModule, User,
};
use crate::progress;

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    courses: Vec<Course>,
    modules: Vec<Module>,
    lessons: Vec<Lesson>,
    enrollments: Vec<Enrollment>,
    // (enrollment_id, lesson_id)
    completions: HashSet<(Uuid, Uuid)>,
}

impl Tables {
    fn course_mut(&mut self, id: Uuid) -> LmsResult<&mut Course> {
        self.courses.iter_mut().find(|c| c.id == id).ok_or(LmsError::NotFound(Entity::Course))
    }

    fn module_mut(&mut self, id: Uuid) -> LmsResult<&mut Module> {
        self.modules.iter_mut().find(|m| m.id == id).ok_or(LmsError::NotFound(Entity::Module))
    }

    fn published_lessons_of_course(&self, course_id: Uuid) -> HashSet<Uuid> {
        let modules: HashSet<Uuid> =
            self.modules.iter().filter(|m| m.course_id == course_id).map(|m| m.id).collect();
        self.lessons
            .iter()
            .filter(|l| l.active && modules.contains(&l.module_id))
            .map(|l| l.id)
            .collect()
    }

    fn tally(&self, enrollment: &Enrollment) -> LessonTally {
        let published = self.published_lessons_of_course(enrollment.course_id);
        let completed = self
            .completions
            .iter()
            .filter(|(e, l)| *e == enrollment.id && published.contains(l))
            .count();
        LessonTally { completed: completed as i64, total: published.len() as i64 }
    }
}

/// In-process [`Store`] used by tests and local demos.
///
/// One lock guards every table, so each trait call is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, id: Uuid) -> LmsResult<Option<User>> {
        Ok(self.tables.lock().await.users.iter().find(|u| u.id == id).cloned())
    }

    async fn insert_user(&self, user: User) -> LmsResult<User> {
        let mut t = self.tables.lock().await;
        if t.users.iter().any(|u| u.id == user.id || u.email == user.email) {
            return Err(LmsError::Validation(format!("user {} already exists", user.email)));
        }
        t.users.push(user.clone());
        Ok(user)
    }

    async fn set_avatar_url(&self, user_id: Uuid, url: &str) -> LmsResult<()> {
        let mut t = self.tables.lock().await;
        let user = t.users.iter_mut().find(|u| u.id == user_id).ok_or(LmsError::NotFound(Entity::User))?;
        user.avatar_url = Some(url.to_string());
        Ok(())
    }

    async fn get_course(&self, id: Uuid) -> LmsResult<Option<Course>> {
        Ok(self.tables.lock().await.courses.iter().find(|c| c.id == id).cloned())
    }

    async fn insert_course(&self, course: NewCourse) -> LmsResult<Course> {
        let row = Course {
            id: Uuid::new_v4(),
            title: course.title,
            description: course.description,
            instructor_id: course.instructor_id,
            active: course.active,
            module_version: 0,
            created_at: Utc::now(),
        };
        self.tables.lock().await.courses.push(row.clone());
        Ok(row)
    }

    async fn course_tree(&self, course_id: Uuid) -> LmsResult<Option<CourseTree>> {
        let t = self.tables.lock().await;
        let Some(course) = t.courses.iter().find(|c| c.id == course_id).cloned() else {
            return Ok(None);
        };
        let modules = t
            .modules
            .iter()
            .filter(|m| m.course_id == course_id)
            .map(|m| ModuleTree {
                module: m.clone(),
                lessons: t.lessons.iter().filter(|l| l.module_id == m.id).cloned().collect(),
            })
            .collect();
        Ok(Some(CourseTree { course, modules }))
    }

    async fn get_module(&self, id: Uuid) -> LmsResult<Option<Module>> {
        Ok(self.tables.lock().await.modules.iter().find(|m| m.id == id).cloned())
    }

    async fn modules_of(&self, course_id: Uuid) -> LmsResult<Vec<Module>> {
        let t = self.tables.lock().await;
        Ok(t.modules.iter().filter(|m| m.course_id == course_id).cloned().collect())
    }

    async fn insert_module(&self, module: NewModule) -> LmsResult<Module> {
        let mut t = self.tables.lock().await;
        let siblings: Vec<&Module> = t.modules.iter().filter(|m| m.course_id == module.course_id).collect();
        if siblings.iter().any(|m| m.slug == module.slug) {
            return Err(LmsError::Conflict(ConflictKind::DuplicateSlug));
        }
        if siblings.iter().any(|m| m.module_order == module.order) {
            return Err(LmsError::Conflict(ConflictKind::DuplicateOrder));
        }
        t.course_mut(module.course_id)?.module_version += 1;
        let row = Module {
            id: Uuid::new_v4(),
            course_id: module.course_id,
            slug: module.slug,
            title: module.title,
            module_order: module.order,
            lesson_version: 0,
            created_at: Utc::now(),
        };
        t.modules.push(row.clone());
        Ok(row)
    }

    async fn get_lesson(&self, id: Uuid) -> LmsResult<Option<Lesson>> {
        Ok(self.tables.lock().await.lessons.iter().find(|l| l.id == id).cloned())
    }

    async fn lessons_of(&self, module_id: Uuid) -> LmsResult<Vec<Lesson>> {
        let t = self.tables.lock().await;
        Ok(t.lessons.iter().filter(|l| l.module_id == module_id).cloned().collect())
    }

    async fn insert_lesson(&self, lesson: NewLesson) -> LmsResult<Lesson> {
        let mut t = self.tables.lock().await;
        let siblings: Vec<&Lesson> = t.lessons.iter().filter(|l| l.module_id == lesson.module_id).collect();
        if siblings.iter().any(|l| l.slug == lesson.slug) {
            return Err(LmsError::Conflict(ConflictKind::DuplicateSlug));
        }
        if siblings.iter().any(|l| l.lesson_order == lesson.order) {
            return Err(LmsError::Conflict(ConflictKind::DuplicateOrder));
        }
        t.module_mut(lesson.module_id)?.lesson_version += 1;
        let row = Lesson {
            id: Uuid::new_v4(),
            module_id: lesson.module_id,
            slug: lesson.slug,
            title: lesson.title,
            lesson_order: lesson.order,
            access: lesson.access,
            active: lesson.active,
            duration_minutes: lesson.duration_minutes,
            document_url: None,
            created_at: Utc::now(),
        };
        t.lessons.push(row.clone());
        Ok(row)
    }

    async fn set_lesson_document(&self, lesson_id: Uuid, url: &str) -> LmsResult<()> {
        let mut t = self.tables.lock().await;
        let lesson = t.lessons.iter_mut().find(|l| l.id == lesson_id).ok_or(LmsError::NotFound(Entity::Lesson))?;
        lesson.document_url = Some(url.to_string());
        Ok(())
    }

    async fn reorder_modules(
        &self,
        course_id: Uuid,
        expected_version: i64,
        writes: &[(Uuid, i32)],
    ) -> LmsResult<i64> {
        let mut t = self.tables.lock().await;
        let course = t.course_mut(course_id)?;
        if course.module_version != expected_version {
            return Err(LmsError::Conflict(ConflictKind::StaleReorder));
        }
        course.module_version += 1;
        let version = course.module_version;
        for (id, order) in writes {
            if let Some(m) = t.modules.iter_mut().find(|m| m.id == *id && m.course_id == course_id) {
                m.module_order = *order;
            }
        }
        Ok(version)
    }

    async fn reorder_lessons(
        &self,
        module_id: Uuid,
        expected_version: i64,
        writes: &[(Uuid, i32)],
    ) -> LmsResult<i64> {
        let mut t = self.tables.lock().await;
        let module = t.module_mut(module_id)?;
        if module.lesson_version != expected_version {
            return Err(LmsError::Conflict(ConflictKind::StaleReorder));
        }
        module.lesson_version += 1;
        let version = module.lesson_version;
        for (id, order) in writes {
            if let Some(l) = t.lessons.iter_mut().find(|l| l.id == *id && l.module_id == module_id) {
                l.lesson_order = *order;
            }
        }
        Ok(version)
    }

    async fn insert_enrollment(&self, enrollment: Enrollment) -> LmsResult<Inserted> {
        let mut t = self.tables.lock().await;
        if let Some(existing) = t
            .enrollments
            .iter()
            .find(|e| e.course_id == enrollment.course_id && e.student_id == enrollment.student_id)
        {
            return Ok(Inserted::Existing(existing.clone()));
        }
        t.enrollments.push(enrollment.clone());
        Ok(Inserted::New(enrollment))
    }

    async fn find_enrollment(&self, course_id: Uuid, student_id: Uuid) -> LmsResult<Option<Enrollment>> {
        let t = self.tables.lock().await;
        Ok(t.enrollments
            .iter()
            .find(|e| e.course_id == course_id && e.student_id == student_id)
            .cloned())
    }

    async fn enrollments_for_student(&self, student_id: Uuid) -> LmsResult<Vec<Enrollment>> {
        let t = self.tables.lock().await;
        Ok(t.enrollments.iter().filter(|e| e.student_id == student_id).cloned().collect())
    }

    async fn completed_lessons(&self, enrollment_id: Uuid) -> LmsResult<HashSet<Uuid>> {
        let t = self.tables.lock().await;
        Ok(t.completions
            .iter()
            .filter(|(e, _)| *e == enrollment_id)
            .map(|(_, l)| *l)
            .collect())
    }

    async fn update_enrollment(
        &self,
        enrollment_id: Uuid,
        change: EnrollmentChange,
        at: DateTime<Utc>,
    ) -> LmsResult<Enrollment> {
        let mut t = self.tables.lock().await;
        let current = t
            .enrollments
            .iter()
            .find(|e| e.id == enrollment_id)
            .cloned()
            .ok_or(LmsError::NotFound(Entity::Enrollment))?;
        if let EnrollmentChange::CompleteLesson(lesson_id) = change {
            t.completions.insert((enrollment_id, lesson_id));
        }
        let next = progress::apply_change(&current, change, t.tally(&current), at)?;
        if let Some(slot) = t.enrollments.iter_mut().find(|e| e.id == enrollment_id) {
            *slot = next.clone();
        }
        Ok(next)
    }
}
