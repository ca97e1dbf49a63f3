// CLI commands: thin wrappers over the session, grader and report APIs
use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDateTime};
use leveltest_common::bank::ProblemBank;
use leveltest_common::config::{ChapterInfo, Config};
use leveltest_common::report;
use leveltest_common::session::{Session, DATE_FORMAT};
use leveltest_common::store::ResultStore;
use leveltest_common::types::{AttemptKey, SolveStatus, SolveStatusRecord, StatusEntry};
use leveltest_engine::{EngineBackend, GradeReport, Grader, RuntimeConfig, StdinLines};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::info;

/// Everything the commands need from configuration
pub struct App {
    pub config: Config,
    pub store: ResultStore,
    pub bank: ProblemBank,
}

impl App {
    pub fn new(config: Config) -> Self {
        let store = ResultStore::new(config.results_dir.clone());
        let bank = ProblemBank::new(config.problems_dir.clone(), config.chapters.clone());
        Self { config, store, bank }
    }

    pub fn load() -> Result<Self> {
        let config = Config::load_default().context("Failed to load config/leveltest.json")?;
        info!(
            results_dir = %config.results_dir.display(),
            problems_dir = %config.problems_dir.display(),
            chapters = config.chapters.len(),
            "Configuration loaded"
        );
        Ok(Self::new(config))
    }

    fn chapter_info(&self, chapter: u32) -> Result<&ChapterInfo> {
        self.config
            .chapter(chapter)
            .with_context(|| format!("Chapter {} is not in the catalog", chapter))
    }

    /// Today's session of a student, if one was started
    fn open_session(&self, name: &str, now: NaiveDateTime) -> Result<Option<Session>> {
        let date = now.format(DATE_FORMAT).to_string();
        let snapshot = self
            .store
            .load(&date, name)
            .with_context(|| format!("Failed to read today's record of {}", name))?;
        Ok(snapshot.map(|snapshot| Session::resume(snapshot, self.config.problems_per_chapter)))
    }

    fn require_session(&self, name: &str, now: NaiveDateTime) -> Result<Session> {
        match self.open_session(name, now)? {
            Some(session) => Ok(session),
            None => bail!("No session for {} today - run `leveltest start --name {}` first", name, name),
        }
    }

    fn save(&self, session: &mut Session, now: NaiveDateTime) -> Result<()> {
        let record_id = session
            .checkpoint(&self.store, now)
            .context("Failed to save result record")?;
        info!(record = %record_id, "Checkpoint written");
        Ok(())
    }
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub fn build_grader() -> Result<Grader> {
    let runtime = RuntimeConfig::load_default()?;
    let backend = EngineBackend::from_env()?;
    Grader::from_config(backend, &runtime)
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read source file: {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn status_label(entry: Option<&StatusEntry>) -> String {
    match entry {
        Some(StatusEntry::Structured(record)) => format!(
            "{} ({} submissions{})",
            record.status,
            record.submissions,
            record
                .first_pass
                .map(|n| format!(", first pass on #{}", n))
                .unwrap_or_default()
        ),
        Some(StatusEntry::Legacy(status)) => status.to_string(),
        None => SolveStatus::Unattempted.to_string(),
    }
}

/// Start today's session, or resume it when a record already exists
pub fn start(app: &App, name: &str, json: bool) -> Result<()> {
    let now = now();
    let mut session = match app.open_session(name, now)? {
        Some(session) => {
            info!(student = %name, "Resuming today's session");
            session
        }
        None => {
            let session = Session::start(name, now, app.config.problems_per_chapter)?;
            info!(student = %name, "Started new session");
            session
        }
    };

    app.save(&mut session, now)?;

    if json {
        return print_json(session.snapshot());
    }

    let snapshot = session.snapshot();
    println!("  Date:     {}", snapshot.date);
    println!("  Started:  {}", snapshot.start_time.as_deref().unwrap_or("-"));
    println!("  Finished: {}", snapshot.is_finished);
    println!("  Chapters: {}", app.config.chapters.len());
    Ok(())
}

#[derive(Serialize)]
struct ProblemRow {
    id: u32,
    title: Option<String>,
    status: String,
}

/// List the sampled problems of one chapter, drawing the sample on first use
pub fn problems(app: &App, name: &str, chapter: u32, json: bool) -> Result<()> {
    let now = now();
    let info = app.chapter_info(chapter)?;
    let mut session = app.require_session(name, now)?;

    let ids = session.sampled_problems(chapter, info.pool_size);
    if !session.is_finished() {
        app.save(&mut session, now)?;
    }

    let rows: Vec<ProblemRow> = ids
        .iter()
        .map(|id| ProblemRow {
            id: *id,
            title: app.bank.problem(chapter, *id).ok().map(|problem| problem.title),
            status: status_label(session.status(AttemptKey::new(chapter, *id))),
        })
        .collect();

    if json {
        return print_json(&rows);
    }

    let progress = session.chapter_progress(chapter);
    println!(
        "📚 Chapter {}: {} ({}/{} solved)",
        chapter, info.name, progress.solved, progress.sampled
    );
    for row in &rows {
        println!(
            "  #{:<4} {:<40} {}",
            row.id,
            row.title.as_deref().unwrap_or("(unavailable)"),
            row.status
        );
    }
    Ok(())
}

fn print_grade_report(report: &GradeReport) {
    for case in &report.cases {
        let mark = if case.passed { "✅" } else { "❌" };
        println!("{} Test case {} ({}ms)", mark, case.index, case.execution_time_ms);

        if let Some(error) = &case.error {
            println!("    Error [{}]: {}", error.reason(), error);
        } else if !case.passed {
            println!("    Input:    {:?}", case.input);
            println!("    Expected: {:?}", case.expected);
            println!("    Actual:   {:?}", case.actual.as_deref().unwrap_or(""));
        }
    }

    if !report.gradable {
        println!("⚠️  This problem has no example output; the attempt was not graded");
    } else if !report.counts_as_attempt() {
        println!("🚫 The program failed to run; this attempt was not counted");
    } else if report.all_passed {
        println!("🎉 All test cases passed ({}/{})", report.passed_count(), report.total());
    } else {
        println!("❌ Passed {}/{}", report.passed_count(), report.total());
    }
}

#[derive(Serialize)]
struct SubmitOutcome<'a> {
    key: AttemptKey,
    report: &'a GradeReport,
    attempt: Option<SolveStatusRecord>,
}

/// Grade a submission, record the attempt and checkpoint the session
#[allow(clippy::too_many_arguments)]
pub async fn submit(
    app: &App,
    grader: &Grader,
    name: &str,
    chapter: u32,
    problem_id: u32,
    code_path: &Path,
    input: Option<&str>,
    json: bool,
) -> Result<()> {
    let code = read_source(code_path)?;
    let now = now();
    let info = app.chapter_info(chapter)?;
    let mut session = app.require_session(name, now)?;

    if session.is_finished() {
        bail!("The session of {} is already finished", name);
    }

    let assigned = session.sampled_problems(chapter, info.pool_size);
    if !assigned.contains(&problem_id) {
        bail!(
            "Problem {} is not assigned to {} in chapter {} (assigned: {:?})",
            problem_id,
            name,
            chapter,
            assigned
        );
    }

    let problem = app.bank.problem(chapter, problem_id)?;
    let report = grader.grade_problem(&code, &problem, input).await;

    let key = AttemptKey::new(chapter, problem_id);
    let attempt = if report.counts_as_attempt() {
        Some(session.record_attempt(key, report.all_passed)?)
    } else {
        None
    };
    app.save(&mut session, now)?;

    if json {
        return print_json(&SubmitOutcome {
            key,
            report: &report,
            attempt,
        });
    }

    println!("📝 {} - {}", key, problem.title);
    print_grade_report(&report);
    if let Some(attempt) = attempt {
        println!("  Status: {}", status_label(Some(&StatusEntry::Structured(attempt))));
    }
    Ok(())
}

/// Run code once against stdin and print what it produced
pub async fn run(grader: &Grader, code_path: &Path, input: &str, json: bool) -> Result<()> {
    let code = read_source(code_path)?;
    let execution = grader.execute(&code, &StdinLines::from_text(input)).await;

    if json {
        return print_json(&serde_json::json!({
            "stdout": execution.stdout(),
            "error": execution.error(),
            "execution_time_ms": execution.execution_time_ms,
        }));
    }

    match &execution.outcome {
        Ok(stdout) if stdout.is_empty() => println!("(no output)"),
        Ok(stdout) => print!("{}", stdout),
        Err(error) => println!("🚫 Error [{}]: {}", error.reason(), error),
    }
    Ok(())
}

pub fn exit_event(app: &App, name: &str) -> Result<()> {
    let now = now();
    let mut session = app.require_session(name, now)?;
    session.record_exit_event(now)?;
    app.save(&mut session, now)?;

    println!(
        "⚠️  Exit event recorded for {} ({} total)",
        name,
        session.snapshot().exit_events.len()
    );
    Ok(())
}

pub fn finish(app: &App, name: &str, json: bool) -> Result<()> {
    let now = now();
    let mut session = app.require_session(name, now)?;
    session.finish(now)?;
    app.save(&mut session, now)?;

    let snapshot = session.snapshot();
    let score = report::score(snapshot);
    if json {
        return print_json(&score);
    }

    println!("🏁 Session finished for {}", name);
    println!(
        "  Time:  {} - {}",
        snapshot.start_time.as_deref().unwrap_or("-"),
        snapshot.end_time.as_deref().unwrap_or("-")
    );
    println!("  Score: {:.1} ({}/{})", score.score, score.pass_count, score.total);
    Ok(())
}

/// Cohort statistics plus one summary row per student
pub fn report(app: &App, search: Option<&str>, json: bool) -> Result<()> {
    let loaded = app.store.load_all();
    let cohort = report::cohort_stats(&loaded.records);
    let students = report::student_summaries(&loaded.records, search);

    if json {
        return print_json(&serde_json::json!({
            "cohort": cohort,
            "skipped_records": loaded.skipped_count(),
            "students": students,
        }));
    }

    println!("📊 Cohort");
    println!("  Students:     {}", cohort.total_students);
    println!("  Records:      {}", cohort.total_records);
    println!("  Finished:     {}", cohort.finished);
    println!("  In progress:  {}", cohort.in_progress);
    println!("  Average:      {:.1}", cohort.average_score);
    if loaded.skipped_count() > 0 {
        println!("  ⚠️  Skipped {} unreadable record(s)", loaded.skipped_count());
        for skipped in &loaded.skipped {
            println!("     {}: {}", skipped.path.display(), skipped.reason);
        }
    }

    println!();
    if students.is_empty() {
        println!("No students found");
        return Ok(());
    }
    println!(
        "{:<20} {:<12} {:<10} {:>7} {:>9} {:>6} {:>8}",
        "Name", "Date", "State", "Score", "Solved", "Exits", "Records"
    );
    for row in &students {
        println!(
            "{:<20} {:<12} {:<10} {:>7.1} {:>9} {:>6} {:>8}",
            row.name,
            row.latest_date,
            if row.is_finished { "finished" } else { "active" },
            row.score.score,
            format!("{}/{}", row.score.pass_count, row.score.total),
            row.exit_events,
            row.record_count
        );
    }
    Ok(())
}

/// Detail of one student's latest record
pub fn student(app: &App, name: &str, json: bool) -> Result<()> {
    let loaded = app.store.load_all();
    let chapter_names = app.config.chapter_names();
    let Some(detail) = report::student_report(&loaded.records, name, &chapter_names) else {
        bail!("No records found for {}", name);
    };

    if json {
        return print_json(&detail);
    }

    println!("👤 {} ({})", detail.name, detail.date);
    println!(
        "  Time:     {} - {}",
        detail.start_time.as_deref().unwrap_or("-"),
        detail.end_time.as_deref().unwrap_or("in progress")
    );
    println!(
        "  Score:    {:.1} ({}/{})",
        detail.score.score, detail.score.pass_count, detail.score.total
    );
    println!(
        "  Submissions: {} total, first pass on average at #{:.1}, {:.1} per unsolved problem",
        detail.submissions.total_submissions,
        detail.submissions.average_first_pass,
        detail.submissions.average_failed_submissions
    );
    println!("  Exit events: {}", detail.exit_events.len());
    for event in &detail.exit_events {
        println!("    {}", event);
    }

    println!();
    println!("📈 Chapters");
    for chapter in detail.chapters.iter().filter(|chapter| chapter.total > 0) {
        println!(
            "  {:>2} {:<28} {:>3}/{:<3} {:>5.1}%",
            chapter.index, chapter.name, chapter.passed, chapter.total, chapter.rate
        );
    }

    println!();
    println!("🧩 Problems");
    for row in &detail.problems {
        let submissions = row
            .submissions
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        let first_pass = row
            .first_pass
            .map(|n| format!("#{}", n))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<28} {:>4} {:<12} submissions: {:<3} first pass: {}",
            row.chapter_name, row.problem, row.status, submissions, first_pass
        );
    }
    Ok(())
}

pub fn history(app: &App, name: &str, json: bool) -> Result<()> {
    let loaded = app.store.load_all();
    let entries = report::history(&loaded.records, name);

    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        bail!("No records found for {}", name);
    }

    println!("🗂  History of {}", name);
    for entry in &entries {
        println!(
            "  {}  {:<10} {:>5.1} ({}/{})",
            entry.date,
            if entry.is_finished { "finished" } else { "active" },
            entry.score.score,
            entry.score.pass_count,
            entry.score.total
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use leveltest_common::types::SessionSnapshot;
    use leveltest_engine::{Execution, ExecutionEngine, ExecutionError};
    use std::sync::Arc;

    /// Engine whose every run crashes
    struct CrashingEngine;

    #[async_trait]
    impl ExecutionEngine for CrashingEngine {
        fn name(&self) -> &'static str {
            "crashing"
        }

        async fn execute(&self, _code: &str, _stdin: &StdinLines) -> Execution {
            Execution::failed(
                ExecutionError::Fault {
                    message: "boom".to_string(),
                },
                1,
            )
        }
    }

    fn make_app(dir: &Path) -> App {
        let mut config = Config::default();
        config.results_dir = dir.join("results");
        config.problems_dir = dir.join("problems");
        config.problems_per_chapter = 3;
        config.chapters = vec![
            ChapterInfo {
                name: "Output".to_string(),
                pool_size: 5,
            },
            ChapterInfo {
                name: "Variables".to_string(),
                pool_size: 5,
            },
        ];
        App::new(config)
    }

    #[test]
    fn test_session_commands() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_app(dir.path());

        assert!(exit_event(&app, "kim").is_err());

        start(&app, "kim", false).unwrap();
        problems(&app, "kim", 0, false).unwrap();
        assert!(problems(&app, "kim", 9, false).is_err());
        exit_event(&app, "kim").unwrap();
        finish(&app, "kim", false).unwrap();
        assert!(finish(&app, "kim", false).is_err());

        let loaded = app.store.load_all();
        assert_eq!(loaded.records.len(), 1);
        let record = &loaded.records[0];
        assert!(record.is_finished);
        assert_eq!(record.exit_events.len(), 1);
        assert_eq!(record.sampled().map(|s| s[&0].len()), Some(3));
    }

    #[test]
    fn test_resume_keeps_sampled_problems() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_app(dir.path());

        start(&app, "lee", false).unwrap();
        problems(&app, "lee", 0, false).unwrap();
        let first = app.store.load_all().records[0].clone();

        start(&app, "lee", false).unwrap();
        problems(&app, "lee", 0, false).unwrap();
        let second = app.store.load_all().records[0].clone();

        assert_eq!(first.sampled_problems, second.sampled_problems);
        assert_eq!(first.start_time, second.start_time);
    }

    #[test]
    fn test_reports_over_store() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_app(dir.path());

        let mut legacy = SessionSnapshot::new("park", "2024-10-01");
        legacy.is_finished = true;
        legacy
            .solve_status
            .insert(AttemptKey::new(0, 1), StatusEntry::Legacy(SolveStatus::Pass));
        app.store.persist(&legacy).unwrap();
        fs::write(app.store.root().join("2024-10-02_broken_result.json"), "{").unwrap();

        report(&app, None, false).unwrap();
        report(&app, Some("pa"), true).unwrap();
        student(&app, "park", false).unwrap();
        history(&app, "park", true).unwrap();
        assert!(student(&app, "nobody", false).is_err());
    }

    #[test]
    fn test_problems_after_finish_leave_record_alone() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_app(dir.path());

        start(&app, "choi", false).unwrap();
        problems(&app, "choi", 0, false).unwrap();
        finish(&app, "choi", false).unwrap();
        let finished = app.store.load_all().records.remove(0);

        problems(&app, "choi", 1, false).unwrap();
        problems(&app, "choi", 0, true).unwrap();
        let after = app.store.load_all().records.remove(0);

        assert_eq!(after, finished);
        assert_eq!(report::score(&after).total, 3);
        assert_eq!(after.sampled().map(|s| s.len()), Some(1));
    }

    #[tokio::test]
    async fn test_legacy_run_error_is_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let app = make_app(dir.path());

        fs::create_dir_all(&app.config.problems_dir).unwrap();
        let pool: Vec<serde_json::Value> = (1..=5)
            .map(|id| {
                serde_json::json!({
                    "id": id,
                    "title": format!("Problem {}", id),
                    "example_input": "-",
                    "example_output": "hi",
                })
            })
            .collect();
        fs::write(
            app.config.problems_dir.join("01_Output.json"),
            serde_json::json!({ "problems": pool }).to_string(),
        )
        .unwrap();
        let code_path = dir.path().join("main.py");
        fs::write(&code_path, "print('hi')").unwrap();

        start(&app, "jung", false).unwrap();
        problems(&app, "jung", 0, false).unwrap();
        let record = app.store.load_all().records.remove(0);
        let problem_id = record.sampled().unwrap()[&0][0];

        let grader = Grader::new(Arc::new(CrashingEngine), 1);
        submit(&app, &grader, "jung", 0, problem_id, &code_path, None, false)
            .await
            .unwrap();

        let record = app.store.load_all().records.remove(0);
        assert!(record.solve_status.is_empty());
    }

    #[test]
    fn test_status_label() {
        assert_eq!(status_label(None), "UNATTEMPTED");
        assert_eq!(
            status_label(Some(&StatusEntry::Structured(SolveStatusRecord {
                status: SolveStatus::Pass,
                submissions: 2,
                first_pass: Some(2),
            }))),
            "PASS (2 submissions, first pass on #2)"
        );
    }
}
