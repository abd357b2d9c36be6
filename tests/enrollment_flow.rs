mod common;

use std::sync::Arc;

use common::{user, Fixture};
use rusticourse::enrollment::{self, EnrollOutcome};
use rusticourse::error::{ConflictKind, DenyReason, Entity, LmsError};
use rusticourse::models::{
    AccessLevel, EnrollmentStatus, ReorderItem, ReorderReq, Role, StatusAction,
};
use rusticourse::store::Store;
use rusticourse::{access, catalog, progress, structure};
use uuid::Uuid;

#[tokio::test]
async fn single_lesson_course_end_to_end() {
    let f = Fixture::new().await;
    let m = f.module("basics", 1).await;
    let intro = f.lesson(&m, "intro", 1, AccessLevel::Private).await;

    let outcome = enrollment::enroll(&f.store, &f.student, f.course.id, f.student.id)
        .await
        .unwrap();
    assert!(matches!(outcome, EnrollOutcome::Created(_)));
    assert!(enrollment::check_enrollment(&f.store, f.course.id, f.student.id).await.unwrap());

    let tree = catalog::load_tree(&f.store, f.course.id).await.unwrap();
    let first = structure::resolve_first_lesson(&tree).unwrap();
    assert_eq!(first.lesson.slug, "intro");

    let done = progress::record_lesson_completion(&f.store, &f.student, intro.id)
        .await
        .unwrap();
    assert_eq!(done.progress, 100);
    assert_eq!(done.status, EnrollmentStatus::Completed);
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn first_lesson_follows_module_order_not_insertion() {
    let f = Fixture::new().await;
    let m1 = f.module("m1", 2).await;
    let m2 = f.module("m2", 1).await;
    f.lesson(&m1, "later", 1, AccessLevel::Public).await;
    f.lesson(&m2, "sooner", 1, AccessLevel::Public).await;

    let tree = catalog::load_tree(&f.store, f.course.id).await.unwrap();
    let first = structure::resolve_first_lesson(&tree).unwrap();
    assert_eq!(first.module.id, m2.id);
    assert_eq!(first.lesson.slug, "sooner");
}

#[tokio::test]
async fn second_enroll_returns_existing_record() {
    let f = Fixture::new().await;
    let first = enrollment::enroll(&f.store, &f.student, f.course.id, f.student.id)
        .await
        .unwrap();
    let second = enrollment::enroll(&f.store, &f.student, f.course.id, f.student.id)
        .await
        .unwrap();
    match (first, second) {
        (EnrollOutcome::Created(a), EnrollOutcome::AlreadyEnrolled(b)) => assert_eq!(a, b),
        other => panic!("unexpected outcomes {other:?}"),
    }
    assert_eq!(f.store.enrollments_for_student(f.student.id).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_enrolls_store_exactly_one() {
    let Fixture { store, student, course, .. } = Fixture::new().await;
    let store = Arc::new(store);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        let student = student.clone();
        let course_id = course.id;
        handles.push(tokio::spawn(async move {
            enrollment::enroll(store.as_ref(), &student, course_id, student.id).await
        }));
    }

    let mut created = 0;
    let mut already = 0;
    for h in handles {
        match h.await.unwrap().unwrap() {
            EnrollOutcome::Created(_) => created += 1,
            EnrollOutcome::AlreadyEnrolled(_) => already += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(already, 7);
    assert_eq!(store.enrollments_for_student(student.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn enroll_reports_missing_course_and_user() {
    let f = Fixture::new().await;
    let outcome = enrollment::enroll(&f.store, &f.student, Uuid::new_v4(), f.student.id)
        .await
        .unwrap();
    assert_eq!(outcome, EnrollOutcome::CourseNotFound);

    let admin = user(&f.store, Role::Admin).await;
    let outcome = enrollment::enroll(&f.store, &admin, f.course.id, Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(outcome, EnrollOutcome::UserNotFound);
}

#[tokio::test]
async fn inactive_course_cannot_be_enrolled() {
    let f = Fixture::new().await;
    let hidden = catalog::create_course(
        &f.store,
        &f.instructor,
        rusticourse::models::CreateCourseReq {
            title: "Draft".into(),
            description: None,
            instructor_id: None,
            active: false,
        },
    )
    .await
    .unwrap();
    let outcome = enrollment::enroll(&f.store, &f.student, hidden.id, f.student.id)
        .await
        .unwrap();
    assert_eq!(outcome, EnrollOutcome::CourseNotFound);
}

#[tokio::test]
async fn students_cannot_enroll_others() {
    let f = Fixture::new().await;
    let other = user(&f.store, Role::Student).await;
    let err = enrollment::enroll(&f.store, &f.student, f.course.id, other.id)
        .await
        .unwrap_err();
    assert_eq!(err, LmsError::Forbidden(DenyReason::RoleInsufficient));

    let outcome = enrollment::enroll(&f.store, &f.instructor, f.course.id, other.id)
        .await
        .unwrap();
    assert!(matches!(outcome, EnrollOutcome::Created(_)));
}

#[tokio::test]
async fn progress_climbs_to_completion_and_timestamp_sticks() {
    let f = Fixture::new().await;
    let m = f.module("core", 1).await;
    let a = f.lesson(&m, "a", 1, AccessLevel::Private).await;
    let b = f.lesson(&m, "b", 2, AccessLevel::Private).await;
    let c = f.lesson(&m, "c", 3, AccessLevel::Public).await;
    enrollment::enroll(&f.store, &f.student, f.course.id, f.student.id).await.unwrap();

    let e = progress::record_lesson_completion(&f.store, &f.student, a.id).await.unwrap();
    assert_eq!((e.progress, e.status), (33, EnrollmentStatus::InProgress));
    assert!(e.completed_at.is_none());

    // completing the same lesson twice does not count twice
    let e = progress::record_lesson_completion(&f.store, &f.student, a.id).await.unwrap();
    assert_eq!(e.progress, 33);

    let e = progress::record_lesson_completion(&f.store, &f.student, b.id).await.unwrap();
    assert_eq!(e.progress, 67);

    let done = progress::record_lesson_completion(&f.store, &f.student, c.id).await.unwrap();
    assert_eq!((done.progress, done.status), (100, EnrollmentStatus::Completed));
    let stamp = done.completed_at.expect("completion time");

    let again = progress::record_lesson_completion(&f.store, &f.student, b.id).await.unwrap();
    assert_eq!(again.completed_at, Some(stamp));
    assert!(again.last_accessed_at >= done.last_accessed_at);
}

#[tokio::test]
async fn unpublished_lessons_are_not_counted() {
    let f = Fixture::new().await;
    let m = f.module("core", 1).await;
    let a = f.lesson(&m, "a", 1, AccessLevel::Private).await;
    f.lesson_with(&m, "draft", 2, AccessLevel::Private, false).await;
    enrollment::enroll(&f.store, &f.student, f.course.id, f.student.id).await.unwrap();

    let e = progress::record_lesson_completion(&f.store, &f.student, a.id).await.unwrap();
    assert_eq!(e.progress, 100);
    assert_eq!(e.status, EnrollmentStatus::Completed);
}

#[tokio::test]
async fn completion_requires_enrollment_and_published_lesson() {
    let f = Fixture::new().await;
    let m = f.module("core", 1).await;
    let a = f.lesson(&m, "a", 1, AccessLevel::Private).await;
    let draft = f.lesson_with(&m, "draft", 2, AccessLevel::Private, false).await;

    let err = progress::record_lesson_completion(&f.store, &f.student, a.id).await.unwrap_err();
    assert_eq!(err, LmsError::Forbidden(DenyReason::NotEnrolled));

    enrollment::enroll(&f.store, &f.student, f.course.id, f.student.id).await.unwrap();
    let err = progress::record_lesson_completion(&f.store, &f.student, draft.id).await.unwrap_err();
    assert_eq!(err, LmsError::Forbidden(DenyReason::Unpublished));

    let err = progress::record_lesson_completion(&f.store, &f.student, Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err, LmsError::NotFound(Entity::Lesson));
}

#[tokio::test]
async fn pause_and_resume() {
    let f = Fixture::new().await;
    let m = f.module("core", 1).await;
    let a = f.lesson(&m, "a", 1, AccessLevel::Private).await;
    f.lesson(&m, "b", 2, AccessLevel::Private).await;
    enrollment::enroll(&f.store, &f.student, f.course.id, f.student.id).await.unwrap();

    let paused = enrollment::change_status(&f.store, &f.student, f.course.id, f.student.id, StatusAction::Pause)
        .await
        .unwrap();
    assert_eq!(paused.status, EnrollmentStatus::Paused);

    let e = progress::record_lesson_completion(&f.store, &f.student, a.id).await.unwrap();
    assert_eq!((e.progress, e.status), (50, EnrollmentStatus::Paused));

    let resumed = enrollment::change_status(&f.store, &f.student, f.course.id, f.student.id, StatusAction::Resume)
        .await
        .unwrap();
    assert_eq!(resumed.status, EnrollmentStatus::InProgress);

    let stranger = user(&f.store, Role::Student).await;
    let err = enrollment::change_status(&f.store, &stranger, f.course.id, f.student.id, StatusAction::Pause)
        .await
        .unwrap_err();
    assert_eq!(err, LmsError::Forbidden(DenyReason::RoleInsufficient));
}

#[tokio::test]
async fn details_and_dashboard() {
    let f = Fixture::new().await;
    let err = enrollment::get_enrollment_details(&f.store, f.course.id, f.student.id)
        .await
        .unwrap_err();
    assert_eq!(err, LmsError::NotFound(Entity::Enrollment));

    enrollment::enroll(&f.store, &f.student, f.course.id, f.student.id).await.unwrap();
    let details = enrollment::get_enrollment_details(&f.store, f.course.id, f.student.id)
        .await
        .unwrap();
    assert_eq!(details.status, EnrollmentStatus::NotStarted);
    assert_eq!(details.progress, 0);

    let list = enrollment::list_for_student(&f.store, &f.student).await.unwrap();
    assert_eq!(list, vec![details]);
}

#[tokio::test]
async fn access_policy_against_stored_enrollment() {
    let f = Fixture::new().await;
    let m = f.module("core", 1).await;
    let private = f.lesson(&m, "private", 1, AccessLevel::Private).await;
    let draft = f.lesson_with(&m, "draft", 2, AccessLevel::Public, false).await;

    let none = f.store.find_enrollment(f.course.id, f.student.id).await.unwrap();
    assert_eq!(
        access::can_access_lesson(&f.student, &f.course, &private, none.as_ref()),
        access::Access::Denied(DenyReason::NotEnrolled)
    );

    enrollment::enroll(&f.store, &f.student, f.course.id, f.student.id).await.unwrap();
    let some = f.store.find_enrollment(f.course.id, f.student.id).await.unwrap();
    assert!(access::can_access_lesson(&f.student, &f.course, &private, some.as_ref()).is_allowed());
    assert_eq!(
        access::can_access_lesson(&f.student, &f.course, &draft, some.as_ref()),
        access::Access::Denied(DenyReason::Unpublished)
    );
    assert!(access::can_access_lesson(&f.instructor, &f.course, &draft, None).is_allowed());
}

#[tokio::test]
async fn reorder_swaps_only_listed_lessons() {
    let f = Fixture::new().await;
    let m = f.module("core", 1).await;
    let a = f.lesson(&m, "a", 1, AccessLevel::Private).await;
    let b = f.lesson(&m, "b", 2, AccessLevel::Private).await;
    let c = f.lesson(&m, "c", 5, AccessLevel::Private).await;
    let version = f.store.get_module(m.id).await.unwrap().unwrap().lesson_version;

    let new_version = catalog::reorder_lessons(
        &f.store,
        &f.instructor,
        m.id,
        ReorderReq {
            expected_version: version,
            items: vec![ReorderItem { id: a.id, position: 2 }, ReorderItem { id: b.id, position: 1 }],
        },
    )
    .await
    .unwrap();
    assert_eq!(new_version, version + 1);

    let orders: Vec<(Uuid, i32)> = f
        .store
        .lessons_of(m.id)
        .await
        .unwrap()
        .into_iter()
        .map(|l| (l.id, l.lesson_order))
        .collect();
    assert_eq!(orders, vec![(a.id, 2), (b.id, 1), (c.id, 5)]);
}

#[tokio::test]
async fn stale_reorder_is_rejected_without_writes() {
    let f = Fixture::new().await;
    let m = f.module("core", 1).await;
    let a = f.lesson(&m, "a", 1, AccessLevel::Private).await;
    let b = f.lesson(&m, "b", 2, AccessLevel::Private).await;
    let version = f.store.get_module(m.id).await.unwrap().unwrap().lesson_version;

    let swap = |v| ReorderReq {
        expected_version: v,
        items: vec![ReorderItem { id: a.id, position: 2 }, ReorderItem { id: b.id, position: 1 }],
    };
    catalog::reorder_lessons(&f.store, &f.instructor, m.id, swap(version)).await.unwrap();

    // a second client still holding the old version
    let err = catalog::reorder_lessons(&f.store, &f.instructor, m.id, swap(version))
        .await
        .unwrap_err();
    assert_eq!(err, LmsError::Conflict(ConflictKind::StaleReorder));

    let orders: Vec<i32> = f.store.lessons_of(m.id).await.unwrap().iter().map(|l| l.lesson_order).collect();
    assert_eq!(orders, vec![2, 1]);
}

#[tokio::test]
async fn adding_a_lesson_invalidates_pending_reorders() {
    let f = Fixture::new().await;
    let m = f.module("core", 1).await;
    let a = f.lesson(&m, "a", 1, AccessLevel::Private).await;
    let version = f.store.get_module(m.id).await.unwrap().unwrap().lesson_version;
    f.lesson(&m, "b", 2, AccessLevel::Private).await;

    let err = catalog::reorder_lessons(
        &f.store,
        &f.instructor,
        m.id,
        ReorderReq { expected_version: version, items: vec![ReorderItem { id: a.id, position: 7 }] },
    )
    .await
    .unwrap_err();
    assert_eq!(err, LmsError::Conflict(ConflictKind::StaleReorder));
}

#[tokio::test]
async fn module_reorder_and_permissions() {
    let f = Fixture::new().await;
    let m1 = f.module("one", 1).await;
    let m2 = f.module("two", 2).await;
    let version = f.store.get_course(f.course.id).await.unwrap().unwrap().module_version;

    let req = ReorderReq {
        expected_version: version,
        items: vec![ReorderItem { id: m1.id, position: 2 }, ReorderItem { id: m2.id, position: 1 }],
    };
    let err = catalog::reorder_modules(&f.store, &f.student, f.course.id, req.clone())
        .await
        .unwrap_err();
    assert_eq!(err, LmsError::Forbidden(DenyReason::RoleInsufficient));

    catalog::reorder_modules(&f.store, &f.instructor, f.course.id, req).await.unwrap();
    let tree = catalog::load_tree(&f.store, f.course.id).await.unwrap();
    let sorted: Vec<String> = structure::outline(&tree).iter().map(|m| m.module.slug.clone()).collect();
    assert_eq!(sorted, ["two", "one"]);
}

#[tokio::test]
async fn duplicate_slugs_conflict() {
    let f = Fixture::new().await;
    let m = f.module("core", 1).await;
    f.lesson(&m, "a", 1, AccessLevel::Private).await;

    let err = catalog::create_module(
        &f.store,
        &f.instructor,
        f.course.id,
        rusticourse::models::CreateModuleReq { slug: "core".into(), title: "Again".into(), order: Some(9) },
    )
    .await
    .unwrap_err();
    assert_eq!(err, LmsError::Conflict(ConflictKind::DuplicateSlug));
}

#[tokio::test]
async fn outline_marks_lessons_per_principal() {
    let f = Fixture::new().await;
    let m = f.module("core", 1).await;
    let open = f.lesson(&m, "open", 1, AccessLevel::Public).await;
    f.lesson(&m, "gated", 2, AccessLevel::Private).await;
    f.lesson_with(&m, "draft", 3, AccessLevel::Private, false).await;

    use rusticourse::access::LessonMarker::*;
    let markers = |o: &catalog::CourseOutline| -> Vec<_> {
        o.modules[0].lessons.iter().map(|l| (l.slug.clone(), l.marker)).collect()
    };

    let o = catalog::course_outline(&f.store, &f.student, f.course.id).await.unwrap();
    assert_eq!(markers(&o), vec![("open".to_string(), Preview), ("gated".to_string(), Locked)]);

    enrollment::enroll(&f.store, &f.student, f.course.id, f.student.id).await.unwrap();
    progress::record_lesson_completion(&f.store, &f.student, open.id).await.unwrap();
    let o = catalog::course_outline(&f.store, &f.student, f.course.id).await.unwrap();
    assert_eq!(markers(&o), vec![("open".to_string(), Completed), ("gated".to_string(), Available)]);

    let o = catalog::course_outline(&f.store, &f.instructor, f.course.id).await.unwrap();
    assert_eq!(o.modules[0].lessons.len(), 3);
    assert_eq!(o.modules[0].lessons[2].marker, Draft);
}

#[tokio::test]
async fn default_order_stops_at_the_last_slot() {
    let f = Fixture::new().await;
    f.module("top", i32::MAX).await;

    let err = catalog::create_module(
        &f.store,
        &f.instructor,
        f.course.id,
        rusticourse::models::CreateModuleReq { slug: "next".into(), title: "Next".into(), order: None },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, LmsError::Validation(_)));

    // an explicit free slot still works
    let low = f.module("low", 0).await;
    assert_eq!(low.module_order, 0);
    assert_eq!(f.store.modules_of(f.course.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn taken_order_is_a_conflict() {
    let f = Fixture::new().await;
    f.module("one", 1).await;
    let err = catalog::create_module(
        &f.store,
        &f.instructor,
        f.course.id,
        rusticourse::models::CreateModuleReq { slug: "two".into(), title: "Two".into(), order: Some(1) },
    )
    .await
    .unwrap_err();
    assert_eq!(err, LmsError::Conflict(ConflictKind::DuplicateOrder));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_cannot_share_an_order() {
    let Fixture { store, instructor, course, .. } = Fixture::new().await;
    let store = Arc::new(store);

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        let instructor = instructor.clone();
        let course_id = course.id;
        handles.push(tokio::spawn(async move {
            catalog::create_module(
                store.as_ref(),
                &instructor,
                course_id,
                rusticourse::models::CreateModuleReq {
                    slug: format!("m{i}"),
                    title: format!("Module {i}"),
                    order: Some(5),
                },
            )
            .await
        }));
    }

    let mut created = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => created += 1,
            Err(e) => assert_eq!(e, LmsError::Conflict(ConflictKind::DuplicateOrder)),
        }
    }
    assert_eq!(created, 1);
    let orders: Vec<i32> =
        store.modules_of(course.id).await.unwrap().iter().map(|m| m.module_order).collect();
    assert_eq!(orders, vec![5]);
}
