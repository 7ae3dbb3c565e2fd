mod commands;
mod context;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "skool")]
#[command(about = "View and export school timetables")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and remember the login token
    Login {
        #[arg(short, long)]
        username: String,

        #[arg(short = 'P', long, env = "SKOOL_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Forget stored credentials and end the session
    Logout,

    /// Show the authentication state
    Status,

    /// List the timetables available to this account
    Timetables {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one week of lessons laid out per day
    Lessons {
        /// Timetable id, defaults to the first available timetable
        #[arg(short, long)]
        timetable: Option<String>,

        /// Any date in the week to show (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Export lessons to an ICS file
    Export {
        /// Timetable id, defaults to the first available timetable
        #[arg(short, long)]
        timetable: Option<String>,

        /// First week to export (any date in it, YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<String>,

        /// Number of weeks to export
        #[arg(short, long, default_value = "2")]
        weeks: u32,

        /// Output file path
        #[arg(short, long)]
        output: Option<String>,

        /// Calendar name
        #[arg(long)]
        calendar_name: Option<String>,

        /// Leave the teacher out of event descriptions
        #[arg(long)]
        no_teacher: bool,

        /// Reminder before each lesson in minutes, 0 disables it
        #[arg(long, default_value = "15")]
        reminder_minutes: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("skool_cli={},skool_core={}", log_level, log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Login { username, password } => {
            commands::login_command(&username, &password).await
        }

        Commands::Logout => commands::logout_command().await,

        Commands::Status => commands::status_command().await,

        Commands::Timetables { json } => commands::timetables_command(json).await,

        Commands::Lessons {
            timetable,
            date,
            json,
        } => commands::lessons_command(timetable, date, json).await,

        Commands::Export {
            timetable,
            date,
            weeks,
            output,
            calendar_name,
            no_teacher,
            reminder_minutes,
        } => {
            commands::export_command(commands::ExportParams {
                timetable,
                date,
                weeks,
                output,
                calendar_name,
                include_teacher: !no_teacher,
                reminder_minutes,
            })
            .await
        }
    }
}
