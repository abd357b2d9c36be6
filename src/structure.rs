//! Course structure: ordering of modules and lessons, plus reorder planning.
//!
//! Every sort here is stable, so siblings sharing an `order` value keep the
//! position the store returned them in (insertion order).

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::{Entity, LmsError, LmsResult};
use crate::models::{CourseTree, Lesson, Module, ModuleTree, ReorderItem};

/// Anything that sits in an ordered sibling list.
pub trait Ordered {
    fn id(&self) -> Uuid;
    fn order(&self) -> i32;
}

impl Ordered for Module {
    fn id(&self) -> Uuid {
        self.id
    }
    fn order(&self) -> i32 {
        self.module_order
    }
}

impl Ordered for Lesson {
    fn id(&self) -> Uuid {
        self.id
    }
    fn order(&self) -> i32 {
        self.lesson_order
    }
}

impl Ordered for ModuleTree {
    fn id(&self) -> Uuid {
        self.module.id
    }
    fn order(&self) -> i32 {
        self.module.module_order
    }
}

pub fn sorted<T: Ordered>(items: &[T]) -> Vec<&T> {
    let mut v: Vec<&T> = items.iter().collect();
    v.sort_by_key(|i| i.order());
    v
}

#[derive(Debug, Clone, Copy)]
pub struct FirstLesson<'a> {
    pub module: &'a Module,
    pub lesson: &'a Lesson,
}

/// First lesson of the first module. Does not fall through to later modules
/// when the first one is empty.
pub fn resolve_first_lesson(tree: &CourseTree) -> LmsResult<FirstLesson<'_>> {
    let first = sorted(&tree.modules)
        .into_iter()
        .next()
        .ok_or(LmsError::NotFound(Entity::Module))?;
    let lesson = sorted(&first.lessons)
        .into_iter()
        .next()
        .ok_or(LmsError::NotFound(Entity::Lesson))?;
    Ok(FirstLesson { module: &first.module, lesson })
}

#[derive(Serialize, Debug, Clone)]
pub struct OutlineModule<'a> {
    pub module: &'a Module,
    pub lessons: Vec<&'a Lesson>,
}

/// Full sorted traversal, used for the sidebar.
pub fn outline(tree: &CourseTree) -> Vec<OutlineModule<'_>> {
    sorted(&tree.modules)
        .into_iter()
        .map(|m| OutlineModule { module: &m.module, lessons: sorted(&m.lessons) })
        .collect()
}

/// Validates a reorder batch against the current siblings and returns the
/// writes to perform. Unlisted siblings keep their order.
pub fn plan_reorder<T: Ordered>(
    siblings: &[T],
    requested: &[ReorderItem],
    entity: Entity,
) -> LmsResult<Vec<(Uuid, i32)>> {
    if requested.is_empty() {
        return Err(LmsError::Validation("reorder batch is empty".into()));
    }

    let mut seen = HashSet::new();
    for item in requested {
        if !seen.insert(item.id) {
            return Err(LmsError::Validation(format!("{} listed twice", item.id)));
        }
        if item.position < 0 {
            return Err(LmsError::Validation(format!(
                "position for {} must be non-negative",
                item.id
            )));
        }
    }

    let mut resulting: HashMap<Uuid, i32> = siblings.iter().map(|s| (s.id(), s.order())).collect();
    for item in requested {
        match resulting.get_mut(&item.id) {
            Some(order) => *order = item.position,
            None => return Err(LmsError::NotFound(entity)),
        }
    }

    let mut taken = HashSet::new();
    for order in resulting.values() {
        if !taken.insert(*order) {
            return Err(LmsError::Validation(format!(
                "order {order} would be shared by two siblings"
            )));
        }
    }

    Ok(requested.iter().map(|i| (i.id, i.position)).collect())
}
