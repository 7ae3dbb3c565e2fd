use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

/// A single timed lesson as returned by the schedule API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    /// Identifier, unique within one response
    pub id: String,
    pub course: Option<String>,
    pub teacher: Option<String>,
    pub location: Option<String>,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    /// Display colour as sent by the backend (`#rrggbb`)
    #[serde(default)]
    pub color: Option<String>,
}

impl Lesson {
    /// Local calendar day the lesson starts on.
    pub fn date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    /// Length of the lesson; zero for degenerate intervals.
    pub fn duration(&self) -> chrono::Duration {
        (self.end - self.start).max(chrono::Duration::zero())
    }
}

/// A lesson placed into a column of the day view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionedLesson {
    #[serde(flatten)]
    pub lesson: Lesson,
    pub column_index: usize,
    /// Total columns in the day, identical for every lesson of the day
    pub column_count: usize,
    pub column_span: usize,
}

impl PositionedLesson {
    /// Left edge as a fraction of the day column width.
    pub fn left(&self) -> f64 {
        self.column_index as f64 / self.column_count as f64
    }

    /// Width as a fraction of the day column width.
    pub fn width(&self) -> f64 {
        self.column_span as f64 / self.column_count as f64
    }
}

/// Lessons of one calendar day, laid out for rendering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaySchedule {
    pub date: NaiveDate,
    pub lessons: Vec<PositionedLesson>,
}

/// A timetable the session may query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timetable {
    pub school_guid: String,
    pub unit_guid: String,
    pub school_id: String,
    pub timetable_id: String,
    pub person_guid: String,
    pub first_name: String,
    pub last_name: String,
}

impl Timetable {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Backend-issued scope constraining schedule queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleCredentials {
    pub scope: String,
}

/// Derived authentication flags observed by the UI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    /// A session credential is present
    pub authenticated: bool,
    /// A login or renewal exchange is in flight
    pub loading: bool,
    /// Logout was invoked during this process
    pub logged_out: bool,
}

/// Event payload for inserting a lesson into an external calendar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Hex-encoded lesson id, stable across exports
    pub id: String,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub color: Option<String>,
}

/// Summary used for lessons without a course name
pub const UNTITLED_LESSON: &str = "(Untitled)";

impl From<&Lesson> for CalendarEvent {
    fn from(lesson: &Lesson) -> Self {
        Self {
            id: hex_id(&lesson.id),
            summary: lesson
                .course
                .clone()
                .unwrap_or_else(|| UNTITLED_LESSON.to_string()),
            description: lesson.teacher.clone(),
            location: lesson.location.clone(),
            start: lesson.start,
            end: lesson.end,
            color: lesson.color.clone(),
        }
    }
}

/// Lowercase hex of the id bytes; calendar APIs only accept `[0-9a-v]` ids.
pub fn hex_id(id: &str) -> String {
    use std::fmt::Write;

    id.bytes().fold(String::with_capacity(id.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// ICS generation options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcsOptions {
    /// Calendar name
    pub calendar_name: Option<String>,
    /// Time zone advertised to the client
    pub timezone: Option<String>,
    /// Include teacher in the description
    pub include_teacher: bool,
    pub reminder_minutes: Option<u32>,
}

impl Default for IcsOptions {
    fn default() -> Self {
        Self {
            calendar_name: Some("Skool timetable".to_string()),
            timezone: Some("Europe/Stockholm".to_string()),
            include_teacher: true,
            reminder_minutes: Some(15),
        }
    }
}
