use crate::infra::Engine;
use serde::Deserialize;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use syllabus::error::AppError;
use syllabus::learning::{ContentItem, Course, LearningPlan, Test, UserId};

/// Catalog snapshot the binary can preload: users, courses, plans, content items, and tests.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct CatalogFile {
    #[serde(default)]
    pub(crate) users: Vec<UserId>,
    #[serde(default)]
    pub(crate) courses: Vec<Course>,
    #[serde(default)]
    pub(crate) plans: Vec<LearningPlan>,
    #[serde(default)]
    pub(crate) items: Vec<ContentItem>,
    #[serde(default)]
    pub(crate) tests: Vec<Test>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CatalogSummary {
    pub(crate) users: usize,
    pub(crate) courses: usize,
    pub(crate) plans: usize,
    pub(crate) items: usize,
    pub(crate) tests: usize,
}

pub(crate) fn read_catalog<R: Read>(reader: R) -> Result<CatalogFile, AppError> {
    serde_json::from_reader(reader).map_err(|err| AppError::Io(io::Error::from(err)))
}

pub(crate) fn load_catalog_file(engine: &Engine, path: &Path) -> Result<CatalogSummary, AppError> {
    let file = File::open(path)?;
    let catalog = read_catalog(BufReader::new(file))?;
    Ok(seed_catalog(engine, catalog))
}

/// Register every entity with the store. Creators and instructors become known users.
pub(crate) fn seed_catalog(engine: &Engine, catalog: CatalogFile) -> CatalogSummary {
    let summary = CatalogSummary {
        users: catalog.users.len(),
        courses: catalog.courses.len(),
        plans: catalog.plans.len(),
        items: catalog.items.len(),
        tests: catalog.tests.len(),
    };

    for user in catalog.users {
        engine.store.add_user(user.0);
    }
    for course in catalog.courses {
        for instructor in &course.instructors {
            engine.store.add_user(instructor.as_str());
        }
        engine.store.add_course(course);
    }
    for plan in catalog.plans {
        for instructor in &plan.instructors {
            engine.store.add_user(instructor.as_str());
        }
        engine.store.add_plan(plan);
    }
    for item in catalog.items {
        engine.store.add_content_item(item);
    }
    for test in catalog.tests {
        engine.store.add_test(test);
    }

    summary
}
