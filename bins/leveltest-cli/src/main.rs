mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::App;

#[derive(Parser)]
#[command(name = "leveltest")]
#[command(about = "Level test grader - run sessions, grade submissions and report results", long_about = None)]
struct Cli {
    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start today's session for a student, or resume it
    Start {
        /// Student name
        #[arg(short, long)]
        name: String,
    },

    /// List the problems assigned to a student in one chapter
    Problems {
        #[arg(short, long)]
        name: String,

        /// Chapter index (0-based)
        #[arg(short, long)]
        chapter: u32,
    },

    /// Grade a submission and record the attempt
    Submit {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        chapter: u32,

        /// Problem id within the chapter
        #[arg(short, long)]
        problem: u32,

        /// File containing the submitted code
        #[arg(short, long)]
        file: PathBuf,

        /// Stdin for problems graded against their example
        #[arg(short, long)]
        input: Option<String>,
    },

    /// Run code once without grading it
    Run {
        #[arg(short, long)]
        file: PathBuf,

        /// Stdin text fed to `input()`
        #[arg(short, long)]
        input: Option<String>,
    },

    /// Record that the student left the test screen
    ExitEvent {
        #[arg(short, long)]
        name: String,
    },

    /// Finish today's session for a student
    Finish {
        #[arg(short, long)]
        name: String,
    },

    /// Cohort statistics and per-student summary
    Report {
        /// Only list students whose name contains this text
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Detail view of a student's latest record
    Student {
        #[arg(short, long)]
        name: String,
    },

    /// Every record of a student, newest first
    History {
        #[arg(short, long)]
        name: String,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let json = std::env::var("LEVELTEST_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let app = App::load()?;

    match cli.command {
        Commands::Start { name } => {
            commands::start(&app, &name, cli.json)?;
        }
        Commands::Problems { name, chapter } => {
            commands::problems(&app, &name, chapter, cli.json)?;
        }
        Commands::Submit {
            name,
            chapter,
            problem,
            file,
            input,
        } => {
            let grader = commands::build_grader()?;
            commands::submit(
                &app,
                &grader,
                &name,
                chapter,
                problem,
                &file,
                input.as_deref(),
                cli.json,
            )
            .await?;
        }
        Commands::Run { file, input } => {
            let grader = commands::build_grader()?;
            commands::run(&grader, &file, input.as_deref().unwrap_or(""), cli.json).await?;
        }
        Commands::ExitEvent { name } => {
            commands::exit_event(&app, &name)?;
        }
        Commands::Finish { name } => {
            commands::finish(&app, &name, cli.json)?;
        }
        Commands::Report { search } => {
            commands::report(&app, search.as_deref(), cli.json)?;
        }
        Commands::Student { name } => {
            commands::student(&app, &name, cli.json)?;
        }
        Commands::History { name } => {
            commands::history(&app, &name, cli.json)?;
        }
    }

    Ok(())
}
