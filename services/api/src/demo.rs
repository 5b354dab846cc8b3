use crate::catalog::{seed_catalog, CatalogFile};
use crate::infra::{build_engine, Engine};
use clap::Args;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use syllabus::config::AppConfig;
use syllabus::error::AppError;
use syllabus::learning::{
    parse_roster, Answer, AttemptSubmission, CompletionCascade, ContentItem, ContentItemId,
    ContentKind, Course, CourseId, EnrollmentPolicy, LearningPlan, PlanCourse, PlanId, Principal,
    Question, QuestionKind, Role, Target, Test, TestId, UserId, VideoEvent,
};

const DEMO_PLAN: &str = "rust-path";
const DEMO_INSTRUCTOR: &str = "coach";

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Learner walked through the sample plan
    #[arg(long, default_value = "demo-learner")]
    pub(crate) learner: String,
    /// Roster CSV (user_id[,due_date]) bulk-enrolled into the first course
    #[arg(long)]
    pub(crate) roster: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub(crate) struct RosterCheckArgs {
    /// Roster CSV with a user_id column and an optional due_date column
    pub(crate) path: PathBuf,
}

pub(crate) fn run_roster_check(args: RosterCheckArgs) -> Result<(), AppError> {
    let entries = parse_roster(File::open(&args.path)?)?;
    println!("Roster {} ({} entries)", args.path.display(), entries.len());
    for entry in &entries {
        match entry.due_date {
            Some(due) => println!("- {} (due {due})", entry.user_id),
            None => println!("- {}", entry.user_id),
        }
    }
    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let engine = build_engine(&config.engine);
    seed_catalog(&engine, demo_catalog());
    engine.store.add_user(args.learner.clone());

    println!("Enrollment and completion demo");
    println!(
        "- thresholds: content {:.0}% | video {:.0}%",
        config.engine.completion_threshold * 100.0,
        config.engine.video_completion_threshold * 100.0
    );

    if let Some(path) = args.roster {
        enroll_roster(&engine, &path)?;
    }

    let learner = Principal::learner(args.learner);
    let plan = Target::Plan(PlanId::new(DEMO_PLAN));
    let enrollment = engine
        .service
        .request_enrollment(&learner, &learner.id, &plan, None)?;
    println!(
        "\n{} enrolled in {} -> {} ({})",
        learner.id,
        plan,
        enrollment.status.label(),
        enrollment.id
    );

    match engine.service.record_content_progress(
        &learner,
        &ContentItemId::new("async-executors"),
        0.5,
        None,
    ) {
        Ok(_) => println!("  async-rust unexpectedly open"),
        Err(err) => println!("  async-rust is locked: {err}"),
    }

    let video = engine.service.record_video_progress(
        &learner,
        &ContentItemId::new("ownership-video"),
        VideoEvent {
            watch_time_seconds: 510.0,
            total_duration_seconds: 600.0,
            position_seconds: 598.0,
            new_view: false,
        },
    )?;
    println!(
        "  watched ownership-video {:.0}s of {:.0}s -> completed {}",
        video.update.record.watch_time_seconds,
        video.update.record.total_duration_seconds,
        video.update.record.completed
    );

    let reading = engine.service.record_content_progress(
        &learner,
        &ContentItemId::new("borrowing-notes"),
        0.9,
        None,
    )?;
    println!(
        "  read borrowing-notes {}% -> completed {}",
        reading.update.percentage, reading.update.completed
    );

    let test_id = TestId::new("fundamentals-check");
    for answer in [0, 1] {
        let attempt = engine
            .service
            .submit_test_attempt(&learner, &test_id, quiz_answers(answer))?;
        println!(
            "  attempt {} on {}: score {:.0}% passed {} | remaining {}",
            attempt.update.attempt.attempt_number,
            test_id,
            attempt.update.attempt.score * 100.0,
            attempt.update.attempt.passed,
            attempt
                .update
                .remaining_attempts
                .map_or_else(|| "unlimited".to_string(), |left| left.to_string())
        );
        print_cascade(&attempt.cascade);
    }

    let finale = engine.service.record_content_progress(
        &learner,
        &ContentItemId::new("async-executors"),
        1.0,
        None,
    )?;
    println!("  finished async-executors");
    print_cascade(&finale.cascade);

    let progress = engine
        .service
        .plan_progress(&learner, &learner.id, &PlanId::new(DEMO_PLAN))?;
    println!("\nPlan progress ({})", progress.plan_id);
    for course in &progress.courses {
        println!(
            "- {}: complete {} | locked {}",
            course.course_id, course.complete, course.locked
        );
    }

    let instructor = Principal::new(DEMO_INSTRUCTOR, vec![Role::Instructor]);
    let analytics = engine
        .service
        .video_analytics(&instructor, &ContentItemId::new("ownership-video"))?;
    println!(
        "\nVideo analytics: {} views | {:.0}% completion | {:.0}s average watch time",
        analytics.total_views,
        analytics.completion_rate * 100.0,
        analytics.average_watch_time_seconds
    );

    println!("\nCertificates rendered: {}", engine.artifacts.issued().len());
    for url in engine.artifacts.issued() {
        println!("- {url}");
    }
    Ok(())
}

fn enroll_roster(engine: &Engine, path: &Path) -> Result<(), AppError> {
    let entries = parse_roster(File::open(path)?)?;
    for entry in &entries {
        engine.store.add_user(entry.user_id.as_str());
    }
    let instructor = Principal::new(DEMO_INSTRUCTOR, vec![Role::Instructor]);
    let result = engine.service.bulk_enroll_roster(
        &instructor,
        &entries,
        &Target::Course(CourseId::new("rust-fundamentals")),
    )?;
    println!(
        "- roster {}: {} enrolled | {} failed",
        path.display(),
        result.enrolled,
        result.failed
    );
    for failure in &result.errors {
        println!("  - {}: {}", failure.user_id, failure.reason);
    }
    Ok(())
}

fn print_cascade(cascade: &CompletionCascade) {
    for evaluation in &cascade.completed {
        println!(
            "    completed {} ({}/{} required)",
            evaluation.target, evaluation.satisfied, evaluation.required
        );
    }
    for issue in &cascade.credentials {
        let completion = &issue.completion;
        if let Some(url) = &completion.certificate_url {
            println!("    certificate for {}: {url}", completion.key.target);
        }
        if completion.badge_awarded {
            println!("    badge awarded for {}", completion.key.target);
        }
    }
    for pending in &cascade.pending {
        println!(
            "    {} for {} deferred: {}",
            pending.credential, pending.target, pending.reason
        );
    }
}

fn quiz_answers(ownership: usize) -> AttemptSubmission {
    AttemptSubmission {
        answers: BTreeMap::from([
            ("drop".to_string(), Answer::Choices(vec![ownership])),
            ("borrow".to_string(), Answer::Flag(true)),
        ]),
        started_at: None,
        time_spent_seconds: Some(240),
    }
}

fn item(id: &str, course: &str, kind: ContentKind) -> ContentItem {
    ContentItem {
        id: ContentItemId::new(id),
        course_id: CourseId::new(course),
        title: id.replace('-', " "),
        kind,
        required: true,
        completion_threshold: None,
    }
}

fn course(id: &str, title: &str, policy: EnrollmentPolicy) -> Course {
    Course {
        id: CourseId::new(id),
        title: title.to_string(),
        created_by: UserId::new("curriculum"),
        instructors: vec![UserId::new(DEMO_INSTRUCTOR)],
        policy,
    }
}

pub(crate) fn demo_catalog() -> CatalogFile {
    let badge = EnrollmentPolicy {
        has_badge: true,
        ..EnrollmentPolicy::default()
    };
    CatalogFile {
        users: vec![UserId::new("curriculum")],
        courses: vec![
            course("rust-fundamentals", "Rust Fundamentals", badge),
            course("async-rust", "Async Rust", EnrollmentPolicy::default()),
        ],
        plans: vec![LearningPlan {
            id: PlanId::new(DEMO_PLAN),
            title: "Rust Path".to_string(),
            created_by: UserId::new("curriculum"),
            instructors: vec![UserId::new(DEMO_INSTRUCTOR)],
            policy: EnrollmentPolicy {
                has_certificate: true,
                ..EnrollmentPolicy::default()
            },
            courses: vec![
                PlanCourse {
                    course_id: CourseId::new("rust-fundamentals"),
                    required: true,
                },
                PlanCourse {
                    course_id: CourseId::new("async-rust"),
                    required: true,
                },
            ],
            sequential: true,
        }],
        items: vec![
            item("ownership-video", "rust-fundamentals", ContentKind::Video),
            item("borrowing-notes", "rust-fundamentals", ContentKind::Document),
            item("fundamentals-quiz", "rust-fundamentals", ContentKind::Test),
            item("async-executors", "async-rust", ContentKind::Page),
        ],
        tests: vec![Test {
            id: TestId::new("fundamentals-check"),
            course_id: CourseId::new("rust-fundamentals"),
            content_item_id: Some(ContentItemId::new("fundamentals-quiz")),
            title: "Fundamentals check".to_string(),
            passing_score: 0.7,
            max_attempts: Some(3),
            questions: vec![
                Question {
                    id: "drop".to_string(),
                    prompt: "When is a value dropped?".to_string(),
                    kind: QuestionKind::SingleChoice,
                    options: vec![
                        "When the garbage collector runs".to_string(),
                        "When its owner goes out of scope".to_string(),
                    ],
                    correct_options: vec![1],
                    accepted_answers: Vec::new(),
                    points: 3,
                },
                Question {
                    id: "borrow".to_string(),
                    prompt: "Many shared borrows may coexist".to_string(),
                    kind: QuestionKind::TrueFalse,
                    options: Vec::new(),
                    correct_options: vec![0],
                    accepted_answers: Vec::new(),
                    points: 1,
                },
            ],
        }],
    }
}
