#![allow(dead_code)]

use chrono::Utc;
use rusticourse::catalog;
use rusticourse::models::{
    AccessLevel, Course, CreateCourseReq, CreateLessonReq, CreateModuleReq, Lesson, Module,
    Principal, Role, User,
};
use rusticourse::store::{MemoryStore, Store};
use uuid::Uuid;

pub async fn user(store: &dyn Store, role: Role) -> Principal {
    let id = Uuid::new_v4();
    let email = format!("{id}@example.com");
    let role_name = match role {
        Role::Student => "student",
        Role::Instructor => "instructor",
        Role::Admin => "admin",
    };
    store
        .insert_user(User {
            id,
            email: email.clone(),
            name: role_name.to_string(),
            role: role_name.to_string(),
            avatar_url: None,
            created_at: Utc::now(),
        })
        .await
        .expect("insert user");
    Principal { id, email, role }
}

pub struct Fixture {
    pub store: MemoryStore,
    pub instructor: Principal,
    pub student: Principal,
    pub course: Course,
}

impl Fixture {
    pub async fn new() -> Self {
        let store = MemoryStore::new();
        let instructor = user(&store, Role::Instructor).await;
        let student = user(&store, Role::Student).await;
        let course = catalog::create_course(
            &store,
            &instructor,
            CreateCourseReq {
                title: "Intro to Rust".into(),
                description: Some("ownership, borrowing, lifetimes".into()),
                instructor_id: None,
                active: true,
            },
        )
        .await
        .expect("create course");
        Self { store, instructor, student, course }
    }

    pub async fn module(&self, slug: &str, order: i32) -> Module {
        catalog::create_module(
            &self.store,
            &self.instructor,
            self.course.id,
            CreateModuleReq { slug: slug.into(), title: slug.into(), order: Some(order) },
        )
        .await
        .expect("create module")
    }

    pub async fn lesson(&self, module: &Module, slug: &str, order: i32, access: AccessLevel) -> Lesson {
        self.lesson_with(module, slug, order, access, true).await
    }

    pub async fn lesson_with(
        &self,
        module: &Module,
        slug: &str,
        order: i32,
        access: AccessLevel,
        active: bool,
    ) -> Lesson {
        catalog::create_lesson(
            &self.store,
            &self.instructor,
            module.id,
            CreateLessonReq {
                slug: slug.into(),
                title: slug.into(),
                order: Some(order),
                access,
                active,
                duration_minutes: 10,
            },
        )
        .await
        .expect("create lesson")
    }
}
