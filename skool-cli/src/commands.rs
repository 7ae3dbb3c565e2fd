use std::fs;

use anyhow::{Context as _, Result, anyhow, bail};
use chrono::{Datelike, Days, Local, NaiveDate};
use skool_core::{DaySchedule, IcsOptions, PositionedLesson, UNTITLED_LESSON, ics::IcsGenerator};

use crate::context::Context;

/// Export command parameters
pub struct ExportParams {
    pub timetable: Option<String>,
    pub date: Option<String>,
    pub weeks: u32,
    pub output: Option<String>,
    pub calendar_name: Option<String>,
    pub include_teacher: bool,
    pub reminder_minutes: u32,
}

pub async fn login_command(username: &str, password: &str) -> Result<()> {
    tracing::info!("Logging in as {}", username);
    let ctx = Context::open()?;

    println!("Logging in...");
    ctx.session.login(username, password).await?;
    println!("✓ Logged in as {}", username);

    Ok(())
}

pub async fn logout_command() -> Result<()> {
    let ctx = Context::open()?;
    logout(&ctx).await?;
    println!("✓ Logged out");

    Ok(())
}

/// Clear stored credentials without renewing first.
///
/// A fresh process holds no session token, so there is nothing to revoke and
/// no request is sent.
async fn logout(ctx: &Context) -> Result<()> {
    ctx.session.logout_and_revoke().await?;
    Ok(())
}

pub async fn status_command() -> Result<()> {
    let ctx = Context::open()?;
    let had_login_token = ctx.session.store().login_token().is_some();

    let state = ctx.session.start().await;
    if state.authenticated {
        println!("✓ Authenticated");
    } else if had_login_token {
        println!("Stored login has expired, run `skool login` again");
    } else {
        println!("Not logged in");
    }
    tracing::debug!(phase = %ctx.session.phase(), "Session state");

    Ok(())
}

pub async fn timetables_command(json: bool) -> Result<()> {
    let ctx = Context::open()?;
    ctx.authenticated().await?;

    let timetables = ctx.schedule.timetables().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&timetables)?);
        return Ok(());
    }

    if timetables.is_empty() {
        println!("No timetables available");
    }
    for timetable in &timetables {
        println!(
            "  {} - {} ({})",
            timetable.timetable_id,
            timetable.display_name(),
            timetable.school_id
        );
    }

    Ok(())
}

pub async fn lessons_command(
    timetable: Option<String>,
    date: Option<String>,
    json: bool,
) -> Result<()> {
    let ctx = Context::open()?;
    ctx.authenticated().await?;

    let timetable_id = resolve_timetable(&ctx, timetable).await?;
    let date = parse_date(date.as_deref())?;
    let week = date.iso_week();

    let schedule = ctx
        .schedule
        .week_schedule(&timetable_id, week.year(), week.week())
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&schedule)?);
        return Ok(());
    }

    println!("Week {} of {}:", week.week(), week.year());
    if schedule.is_empty() {
        println!("  No lessons");
    }
    for day in &schedule {
        print_day(day);
    }

    Ok(())
}

pub async fn export_command(params: ExportParams) -> Result<()> {
    if params.weeks == 0 {
        bail!("--weeks must be at least 1");
    }

    let ctx = Context::open()?;
    ctx.authenticated().await?;

    let timetable_id = resolve_timetable(&ctx, params.timetable).await?;
    let first = parse_date(params.date.as_deref())?;

    let mut lessons = Vec::new();
    for offset in 0..params.weeks {
        let date = first
            .checked_add_days(Days::new(7 * u64::from(offset)))
            .ok_or_else(|| anyhow!("Date out of range"))?;
        let week = ctx
            .schedule
            .lessons_for_week_of(&timetable_id, date)
            .await?;
        lessons.extend(week);
    }
    println!("✓ Fetched {} lessons", lessons.len());

    let options = IcsOptions {
        calendar_name: params.calendar_name.or(IcsOptions::default().calendar_name),
        include_teacher: params.include_teacher,
        reminder_minutes: (params.reminder_minutes > 0).then_some(params.reminder_minutes),
        ..IcsOptions::default()
    };
    let ics_content = IcsGenerator::new(options).generate(&lessons)?;

    let output_file = params
        .output
        .unwrap_or_else(|| format!("skool-{}-{}.ics", timetable_id, first));
    fs::write(&output_file, ics_content)
        .with_context(|| format!("Failed to write {}", output_file))?;
    println!("✓ ICS file saved to: {}", output_file);
    tracing::info!(weeks = params.weeks, "Exported {}", output_file);

    Ok(())
}

async fn resolve_timetable(ctx: &Context, timetable: Option<String>) -> Result<String> {
    if let Some(id) = timetable {
        return Ok(id);
    }

    let timetables = ctx.schedule.timetables().await?;
    let first = timetables
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("No timetables available for this account"))?;
    tracing::info!(
        "Using timetable {} ({})",
        first.timetable_id,
        first.display_name()
    );
    Ok(first.timetable_id)
}

fn parse_date(date: Option<&str>) -> Result<NaiveDate> {
    match date {
        Some(date) => NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .with_context(|| format!("Invalid date {}, expected YYYY-MM-DD", date)),
        None => Ok(Local::now().date_naive()),
    }
}

fn print_day(day: &DaySchedule) {
    println!("{} {}", day.date.format("%a"), day.date);

    let lessons = in_start_order(day);
    for positioned in lessons {
        let lesson = &positioned.lesson;
        let columns = if positioned.column_count > 1 {
            format!(
                " [column {}-{} of {}]",
                positioned.column_index + 1,
                positioned.column_index + positioned.column_span,
                positioned.column_count
            )
        } else {
            String::new()
        };

        println!(
            "  {}-{}  {}{}",
            lesson.start.format("%H:%M"),
            lesson.end.format("%H:%M"),
            lesson.course.as_deref().unwrap_or(UNTITLED_LESSON),
            columns
        );

        let details: Vec<&str> = [lesson.location.as_deref(), lesson.teacher.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if !details.is_empty() {
            println!("               {}", details.join(", "));
        }
    }
}

/// Lessons ordered by start, then column.
fn in_start_order(day: &DaySchedule) -> Vec<&PositionedLesson> {
    let mut lessons: Vec<_> = day.lessons.iter().collect();
    lessons.sort_by_key(|p| (p.lesson.start, p.column_index));
    lessons
}
