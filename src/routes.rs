use axum::{
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::services::ServeDir;
use uuid::Uuid;

use crate::{
    access, catalog,
    enrollment::{self, EnrollOutcome},
    error::{DenyReason, Entity, LmsError, LmsResult},
    files::{LocalFiles, CONTENT_PREFIX},
    models::*,
    progress,
    store::Store,
    structure,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub files: LocalFiles,
}

pub fn router(state: AppState) -> Router {
    let static_dir = state.files.root().clone();
    Router::new()
        // authoring
        .route("/api/courses", post(create_course))
        .route("/api/courses/:course_id/modules", post(create_module))
        .route("/api/modules/:module_id/lessons", post(create_lesson))
        .route("/api/courses/:course_id/modules/order", put(reorder_modules))
        .route("/api/modules/:module_id/lessons/order", put(reorder_lessons))
        // navigation
        .route("/api/courses/:course_id/outline", get(course_outline))
        .route("/api/courses/:course_id/start", get(start_course))
        // enrollment
        .route("/api/courses/:course_id/enroll", post(enroll))
        .route("/api/courses/:course_id/enrollment", get(check_enrollment))
        .route("/api/courses/:course_id/enrollment/details", get(enrollment_details))
        .route("/api/courses/:course_id/enrollment/status", put(change_status))
        .route("/api/me/enrollments", get(my_enrollments))
        // lessons
        .route("/api/lessons/:lesson_id", get(view_lesson))
        .route("/api/lessons/:lesson_id/complete", post(complete_lesson))
        // uploads (file storage collaborator)
        .route("/api/lessons/:lesson_id/document", post(upload_lesson_document))
        .route("/api/me/avatar", post(upload_avatar))
        .nest_service(CONTENT_PREFIX, ServeDir::new(static_dir))
        .with_state(state)
}

/// `Json` whose rejections answer in the [`LmsError`] body format.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(LmsError))]
struct ApiJson<T>(T);

#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(LmsError))]
struct ApiQuery<T>(T);

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct StudentQuery {
    student_id: Option<Uuid>,
}

/// Student a request acts on: the caller, or someone else for course managers.
async fn target_student(
    store: &dyn Store,
    principal: &Principal,
    course_id: Uuid,
    requested: Option<Uuid>,
) -> LmsResult<Uuid> {
    match requested {
        None => Ok(principal.id),
        Some(id) if id == principal.id => Ok(id),
        Some(id) => {
            let course = catalog::load_course(store, course_id).await?;
            if principal.manages(&course) {
                Ok(id)
            } else {
                Err(LmsError::Forbidden(DenyReason::RoleInsufficient))
            }
        }
    }
}

// --- authoring ---

async fn create_course(
    State(st): State<AppState>,
    principal: Principal,
    ApiJson(req): ApiJson<CreateCourseReq>,
) -> LmsResult<(StatusCode, Json<Course>)> {
    let course = catalog::create_course(st.store.as_ref(), &principal, req).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

async fn create_module(
    State(st): State<AppState>,
    principal: Principal,
    Path(course_id): Path<Uuid>,
    ApiJson(req): ApiJson<CreateModuleReq>,
) -> LmsResult<(StatusCode, Json<Module>)> {
    let module = catalog::create_module(st.store.as_ref(), &principal, course_id, req).await?;
    Ok((StatusCode::CREATED, Json(module)))
}

async fn create_lesson(
    State(st): State<AppState>,
    principal: Principal,
    Path(module_id): Path<Uuid>,
    ApiJson(req): ApiJson<CreateLessonReq>,
) -> LmsResult<(StatusCode, Json<Lesson>)> {
    let lesson = catalog::create_lesson(st.store.as_ref(), &principal, module_id, req).await?;
    Ok((StatusCode::CREATED, Json(lesson)))
}

#[derive(Serialize, Debug)]
struct ReorderResp {
    version: i64,
}

async fn reorder_modules(
    State(st): State<AppState>,
    principal: Principal,
    Path(course_id): Path<Uuid>,
    ApiJson(req): ApiJson<ReorderReq>,
) -> LmsResult<Json<ReorderResp>> {
    let version = catalog::reorder_modules(st.store.as_ref(), &principal, course_id, req).await?;
    Ok(Json(ReorderResp { version }))
}

async fn reorder_lessons(
    State(st): State<AppState>,
    principal: Principal,
    Path(module_id): Path<Uuid>,
    ApiJson(req): ApiJson<ReorderReq>,
) -> LmsResult<Json<ReorderResp>> {
    let version = catalog::reorder_lessons(st.store.as_ref(), &principal, module_id, req).await?;
    Ok(Json(ReorderResp { version }))
}

// --- navigation ---

async fn course_outline(
    State(st): State<AppState>,
    principal: Principal,
    Path(course_id): Path<Uuid>,
) -> LmsResult<Json<catalog::CourseOutline>> {
    Ok(Json(catalog::course_outline(st.store.as_ref(), &principal, course_id).await?))
}

#[derive(Serialize, Debug)]
struct StartResp {
    course_id: Uuid,
    module_id: Uuid,
    module_slug: String,
    lesson_id: Uuid,
    lesson_slug: String,
    /// Page the client should navigate to.
    location: String,
}

async fn start_course(
    State(st): State<AppState>,
    principal: Principal,
    Path(course_id): Path<Uuid>,
) -> LmsResult<Json<StartResp>> {
    let store = st.store.as_ref();
    let tree = catalog::load_tree(store, course_id).await?;
    catalog::require_visible(&principal, &tree.course)?;
    let first = structure::resolve_first_lesson(&tree)?;
    let enrollment = store.find_enrollment(course_id, principal.id).await?;
    access::can_access_lesson(&principal, &tree.course, first.lesson, enrollment.as_ref())
        .into_result()?;

    Ok(Json(StartResp {
        course_id,
        module_id: first.module.id,
        module_slug: first.module.slug.clone(),
        lesson_id: first.lesson.id,
        lesson_slug: first.lesson.slug.clone(),
        location: format!("/courses/{}/{}/{}", course_id, first.module.slug, first.lesson.slug),
    }))
}

// --- enrollment ---

async fn enroll(
    State(st): State<AppState>,
    principal: Principal,
    Path(course_id): Path<Uuid>,
    body: Result<Json<EnrollReq>, JsonRejection>,
) -> Response {
    // an empty POST means "enroll myself"
    let req = match body {
        Ok(Json(b)) => b,
        Err(JsonRejection::MissingJsonContentType(_)) => EnrollReq::default(),
        Err(e) => return LmsError::from(e).into_response(),
    };
    let student_id = req.student_id.unwrap_or(principal.id);
    match enrollment::enroll(st.store.as_ref(), &principal, course_id, student_id).await {
        Ok(o @ EnrollOutcome::Created(_)) => (StatusCode::CREATED, Json(o)).into_response(),
        Ok(o @ EnrollOutcome::AlreadyEnrolled(_)) => (StatusCode::OK, Json(o)).into_response(),
        Ok(EnrollOutcome::CourseNotFound) => LmsError::NotFound(Entity::Course).into_response(),
        Ok(EnrollOutcome::UserNotFound) => LmsError::NotFound(Entity::User).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Serialize, Debug)]
struct CheckResp {
    enrolled: bool,
}

async fn check_enrollment(
    State(st): State<AppState>,
    principal: Principal,
    Path(course_id): Path<Uuid>,
    ApiQuery(q): ApiQuery<StudentQuery>,
) -> LmsResult<Json<CheckResp>> {
    let store = st.store.as_ref();
    let student = target_student(store, &principal, course_id, q.student_id).await?;
    let enrolled = enrollment::check_enrollment(store, course_id, student).await?;
    Ok(Json(CheckResp { enrolled }))
}

async fn enrollment_details(
    State(st): State<AppState>,
    principal: Principal,
    Path(course_id): Path<Uuid>,
    ApiQuery(q): ApiQuery<StudentQuery>,
) -> LmsResult<Json<Enrollment>> {
    let store = st.store.as_ref();
    let student = target_student(store, &principal, course_id, q.student_id).await?;
    Ok(Json(enrollment::get_enrollment_details(store, course_id, student).await?))
}

async fn change_status(
    State(st): State<AppState>,
    principal: Principal,
    Path(course_id): Path<Uuid>,
    ApiJson(req): ApiJson<StatusReq>,
) -> LmsResult<Json<Enrollment>> {
    let student = req.student_id.unwrap_or(principal.id);
    let updated =
        enrollment::change_status(st.store.as_ref(), &principal, course_id, student, req.action).await?;
    Ok(Json(updated))
}

async fn my_enrollments(
    State(st): State<AppState>,
    principal: Principal,
) -> LmsResult<Json<Vec<Enrollment>>> {
    Ok(Json(enrollment::list_for_student(st.store.as_ref(), &principal).await?))
}

// --- lessons ---

#[derive(Serialize, Debug)]
struct LessonView {
    course_id: Uuid,
    module_slug: String,
    lesson: Lesson,
    enrollment: Option<Enrollment>,
}

async fn view_lesson(
    State(st): State<AppState>,
    principal: Principal,
    Path(lesson_id): Path<Uuid>,
) -> LmsResult<Json<LessonView>> {
    let store = st.store.as_ref();
    let ctx = catalog::load_lesson(store, lesson_id).await?;
    catalog::require_visible(&principal, &ctx.course)?;
    let enrollment = store.find_enrollment(ctx.course.id, principal.id).await?;
    access::can_access_lesson(&principal, &ctx.course, &ctx.lesson, enrollment.as_ref())
        .into_result()?;
    let enrollment = progress::record_lesson_view(store, &principal, ctx.course.id).await?;

    Ok(Json(LessonView {
        course_id: ctx.course.id,
        module_slug: ctx.module.slug,
        lesson: ctx.lesson,
        enrollment,
    }))
}

async fn complete_lesson(
    State(st): State<AppState>,
    principal: Principal,
    Path(lesson_id): Path<Uuid>,
) -> LmsResult<Json<Enrollment>> {
    Ok(Json(progress::record_lesson_completion(st.store.as_ref(), &principal, lesson_id).await?))
}

// --- uploads ---

/// Reads the `file` part of a multipart body as (file name, bytes).
async fn read_file_field(mut mp: Multipart) -> LmsResult<(String, Vec<u8>)> {
    while let Some(field) = mp.next_field().await.map_err(bad_multipart)? {
        if field.name() == Some("file") {
            let name = field.file_name().unwrap_or("upload").to_string();
            let bytes = field.bytes().await.map_err(bad_multipart)?;
            return Ok((name, bytes.to_vec()));
        }
    }
    Err(LmsError::Validation("file is required".into()))
}

#[derive(Serialize, Debug)]
struct UploadResp {
    url: String,
}

async fn upload_avatar(
    State(st): State<AppState>,
    principal: Principal,
    mp: Multipart,
) -> LmsResult<Json<UploadResp>> {
    if st.store.get_user(principal.id).await?.is_none() {
        return Err(LmsError::NotFound(Entity::User));
    }
    let (name, bytes) = read_file_field(mp).await?;
    let url = st.files.save("avatars", &name, &bytes).await?;
    st.store.set_avatar_url(principal.id, &url).await?;
    Ok(Json(UploadResp { url }))
}

async fn upload_lesson_document(
    State(st): State<AppState>,
    principal: Principal,
    Path(lesson_id): Path<Uuid>,
    mp: Multipart,
) -> LmsResult<Json<UploadResp>> {
    let ctx = catalog::load_lesson(st.store.as_ref(), lesson_id).await?;
    if !principal.manages(&ctx.course) {
        return Err(LmsError::Forbidden(DenyReason::RoleInsufficient));
    }
    let (name, bytes) = read_file_field(mp).await?;
    let url = st.files.save(&format!("courses/{}", ctx.course.id), &name, &bytes).await?;
    st.store.set_lesson_document(lesson_id, &url).await?;
    Ok(Json(UploadResp { url }))
}

// --- helpers ---
fn bad_multipart<E: std::fmt::Display>(e: E) -> LmsError {
    LmsError::Validation(format!("malformed multipart body: {e}"))
}
