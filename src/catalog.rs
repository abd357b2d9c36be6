//! Course authoring and lookups shared by the other operations.

use serde::Serialize;
use uuid::Uuid;

use crate::access::{self, LessonMarker};
use crate::error::{ConflictKind, DenyReason, Entity, LmsError, LmsResult};
use crate::models::{
    Course, CourseTree, CreateCourseReq, CreateLessonReq, CreateModuleReq, Enrollment, Lesson,
    Module, NewCourse, NewLesson, NewModule, Principal, ReorderReq, Role,
};
use crate::store::Store;
use crate::structure;

/// A lesson together with the module and course it belongs to.
#[derive(Debug, Clone)]
pub struct LessonContext {
    pub course: Course,
    pub module: Module,
    pub lesson: Lesson,
}

pub async fn load_course(store: &dyn Store, course_id: Uuid) -> LmsResult<Course> {
    store.get_course(course_id).await?.ok_or(LmsError::NotFound(Entity::Course))
}

pub async fn load_tree(store: &dyn Store, course_id: Uuid) -> LmsResult<CourseTree> {
    store.course_tree(course_id).await?.ok_or(LmsError::NotFound(Entity::Course))
}

pub async fn load_module(store: &dyn Store, module_id: Uuid) -> LmsResult<(Course, Module)> {
    let module = store.get_module(module_id).await?.ok_or(LmsError::NotFound(Entity::Module))?;
    let course = load_course(store, module.course_id).await?;
    Ok((course, module))
}

pub async fn load_lesson(store: &dyn Store, lesson_id: Uuid) -> LmsResult<LessonContext> {
    let lesson = store.get_lesson(lesson_id).await?.ok_or(LmsError::NotFound(Entity::Lesson))?;
    let (course, module) = load_module(store, lesson.module_id).await?;
    Ok(LessonContext { course, module, lesson })
}

/// Inactive courses exist only for the people who manage them.
pub fn require_visible(principal: &Principal, course: &Course) -> LmsResult<()> {
    if course.active || principal.manages(course) {
        Ok(())
    } else {
        Err(LmsError::NotFound(Entity::Course))
    }
}

fn require_manager(principal: &Principal, course: &Course) -> LmsResult<()> {
    if principal.manages(course) {
        Ok(())
    } else {
        Err(LmsError::Forbidden(DenyReason::RoleInsufficient))
    }
}

fn validate_slug(slug: &str) -> LmsResult<()> {
    let ok = !slug.is_empty()
        && slug.len() <= 128
        && slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if ok {
        Ok(())
    } else {
        Err(LmsError::Validation(format!(
            "slug {slug:?} must be 1-128 chars of a-z, 0-9 or '-'"
        )))
    }
}

fn validate_title(title: &str) -> LmsResult<String> {
    let t = title.trim();
    if t.is_empty() {
        return Err(LmsError::Validation("title is required".into()));
    }
    Ok(t.to_string())
}

/// One past the highest order in use, or 1 for the first child.
fn next_order(used: impl Iterator<Item = i32>) -> LmsResult<i32> {
    match used.max() {
        None => Ok(1),
        Some(top) => top
            .checked_add(1)
            .ok_or_else(|| LmsError::Validation("no order slot left".into())),
    }
}

fn validate_order(order: Option<i32>, used: &[i32]) -> LmsResult<i32> {
    let order = match order {
        Some(o) if o < 0 => return Err(LmsError::Validation("order must be non-negative".into())),
        Some(o) => o,
        None => next_order(used.iter().copied())?,
    };
    if used.contains(&order) {
        return Err(LmsError::Conflict(ConflictKind::DuplicateOrder));
    }
    Ok(order)
}

pub async fn create_course(
    store: &dyn Store,
    principal: &Principal,
    req: CreateCourseReq,
) -> LmsResult<Course> {
    let instructor_id = match (principal.role, req.instructor_id) {
        (Role::Admin, Some(id)) => id,
        (Role::Admin | Role::Instructor, None) => principal.id,
        (Role::Instructor, Some(id)) if id == principal.id => id,
        _ => return Err(LmsError::Forbidden(DenyReason::RoleInsufficient)),
    };
    if store.get_user(instructor_id).await?.is_none() {
        return Err(LmsError::NotFound(Entity::User));
    }
    let course = store
        .insert_course(NewCourse {
            title: validate_title(&req.title)?,
            description: req.description,
            instructor_id,
            active: req.active,
        })
        .await?;
    tracing::info!(course = %course.id, instructor = %instructor_id, "course created");
    Ok(course)
}

pub async fn create_module(
    store: &dyn Store,
    principal: &Principal,
    course_id: Uuid,
    req: CreateModuleReq,
) -> LmsResult<Module> {
    let course = load_course(store, course_id).await?;
    require_manager(principal, &course)?;
    validate_slug(&req.slug)?;
    let used: Vec<i32> = store.modules_of(course_id).await?.iter().map(|m| m.module_order).collect();
    let order = validate_order(req.order, &used)?;
    store
        .insert_module(NewModule { course_id, slug: req.slug, title: validate_title(&req.title)?, order })
        .await
}

pub async fn create_lesson(
    store: &dyn Store,
    principal: &Principal,
    module_id: Uuid,
    req: CreateLessonReq,
) -> LmsResult<Lesson> {
    let (course, module) = load_module(store, module_id).await?;
    require_manager(principal, &course)?;
    validate_slug(&req.slug)?;
    if req.duration_minutes < 0 {
        return Err(LmsError::Validation("duration must be non-negative".into()));
    }
    let used: Vec<i32> = store.lessons_of(module.id).await?.iter().map(|l| l.lesson_order).collect();
    let order = validate_order(req.order, &used)?;
    store
        .insert_lesson(NewLesson {
            module_id,
            slug: req.slug,
            title: validate_title(&req.title)?,
            order,
            access: req.access,
            active: req.active,
            duration_minutes: req.duration_minutes,
        })
        .await
}

/// Rewrites module order for a course as one batch; returns the new version.
pub async fn reorder_modules(
    store: &dyn Store,
    principal: &Principal,
    course_id: Uuid,
    req: ReorderReq,
) -> LmsResult<i64> {
    let course = load_course(store, course_id).await?;
    require_manager(principal, &course)?;
    let siblings = store.modules_of(course_id).await?;
    let writes = structure::plan_reorder(&siblings, &req.items, Entity::Module)?;
    let version = store.reorder_modules(course_id, req.expected_version, &writes).await?;
    tracing::info!(course = %course_id, items = writes.len(), version, "modules reordered");
    Ok(version)
}

/// Rewrites lesson order within a module as one batch; returns the new version.
pub async fn reorder_lessons(
    store: &dyn Store,
    principal: &Principal,
    module_id: Uuid,
    req: ReorderReq,
) -> LmsResult<i64> {
    let (course, module) = load_module(store, module_id).await?;
    require_manager(principal, &course)?;
    let siblings = store.lessons_of(module.id).await?;
    let writes = structure::plan_reorder(&siblings, &req.items, Entity::Lesson)?;
    let version = store.reorder_lessons(module_id, req.expected_version, &writes).await?;
    tracing::info!(module = %module_id, items = writes.len(), version, "lessons reordered");
    Ok(version)
}

// ----- sidebar -----

#[derive(Serialize, Debug, Clone)]
pub struct OutlineLesson {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub order: i32,
    pub duration_minutes: i32,
    pub marker: LessonMarker,
}

#[derive(Serialize, Debug, Clone)]
pub struct OutlineModule {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub order: i32,
    pub lesson_version: i64,
    pub lessons: Vec<OutlineLesson>,
}

#[derive(Serialize, Debug, Clone)]
pub struct CourseOutline {
    pub course: Course,
    pub enrollment: Option<Enrollment>,
    pub modules: Vec<OutlineModule>,
}

/// Sorted sidebar for `principal`, with drafts hidden from non-managers.
pub async fn course_outline(
    store: &dyn Store,
    principal: &Principal,
    course_id: Uuid,
) -> LmsResult<CourseOutline> {
    let tree = load_tree(store, course_id).await?;
    require_visible(principal, &tree.course)?;
    let enrollment = store.find_enrollment(course_id, principal.id).await?;
    let completed = match &enrollment {
        Some(e) => store.completed_lessons(e.id).await?,
        None => Default::default(),
    };

    let modules = structure::outline(&tree)
        .into_iter()
        .map(|m| OutlineModule {
            id: m.module.id,
            slug: m.module.slug.clone(),
            title: m.module.title.clone(),
            order: m.module.module_order,
            lesson_version: m.module.lesson_version,
            lessons: m
                .lessons
                .into_iter()
                .filter_map(|l| {
                    let marker = access::lesson_marker(
                        principal,
                        &tree.course,
                        l,
                        enrollment.as_ref(),
                        completed.contains(&l.id),
                    )?;
                    Some(OutlineLesson {
                        id: l.id,
                        slug: l.slug.clone(),
                        title: l.title.clone(),
                        order: l.lesson_order,
                        duration_minutes: l.duration_minutes,
                        marker,
                    })
                })
                .collect(),
        })
        .collect();

    Ok(CourseOutline { course: tree.course.clone(), enrollment, modules })
}
