use chrono::{DateTime, TimeZone, Utc};

use crate::{CalendarEvent, Error, IcsOptions, Lesson, Result};

const DATE_TIME_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Renders lessons as an RFC 5545 calendar
pub struct IcsGenerator {
    options: IcsOptions,
}

impl IcsGenerator {
    pub fn new(options: IcsOptions) -> Self {
        Self { options }
    }

    /// Generate the calendar for `lessons`, stamped with the current time.
    pub fn generate(&self, lessons: &[Lesson]) -> Result<String> {
        self.generate_at(lessons, Utc::now())
    }

    /// Generate with a fixed `DTSTAMP`.
    pub fn generate_at(&self, lessons: &[Lesson], stamp: DateTime<Utc>) -> Result<String> {
        let mut ics_content = String::new();

        ics_content.push_str("BEGIN:VCALENDAR\r\n");
        ics_content.push_str("VERSION:2.0\r\n");
        ics_content.push_str("PRODID:-//Skool//Skool Timetable//EN\r\n");
        ics_content.push_str("CALSCALE:GREGORIAN\r\n");
        ics_content.push_str("METHOD:PUBLISH\r\n");

        if let Some(ref name) = self.options.calendar_name {
            ics_content.push_str(&format!("X-WR-CALNAME:{}\r\n", escape_text(name)));
        }

        if let Some(ref timezone) = self.options.timezone {
            ics_content.push_str(&format!("X-WR-TIMEZONE:{}\r\n", timezone));
        }

        for lesson in lessons {
            self.add_event(&mut ics_content, &CalendarEvent::from(lesson), stamp)?;
        }

        ics_content.push_str("END:VCALENDAR\r\n");

        Ok(ics_content)
    }

    fn add_event(
        &self,
        ics_content: &mut String,
        event: &CalendarEvent,
        stamp: DateTime<Utc>,
    ) -> Result<()> {
        if event.id.is_empty() {
            return Err(Error::IcsGeneration(format!(
                "Lesson \"{}\" has no id",
                event.summary
            )));
        }
        // degenerate lessons are exported as instants
        let end = event.end.max(event.start);

        ics_content.push_str("BEGIN:VEVENT\r\n");
        ics_content.push_str(&format!("UID:{}@skool\r\n", event.id));
        ics_content.push_str(&format!("DTSTAMP:{}\r\n", utc(&stamp)));
        ics_content.push_str(&format!("DTSTART:{}\r\n", utc(&event.start)));
        ics_content.push_str(&format!("DTEND:{}\r\n", utc(&end)));
        ics_content.push_str(&format!("SUMMARY:{}\r\n", escape_text(&event.summary)));

        if let Some(ref location) = event.location {
            ics_content.push_str(&format!("LOCATION:{}\r\n", escape_text(location)));
        }

        if self.options.include_teacher {
            if let Some(ref teacher) = event.description {
                ics_content.push_str(&format!("DESCRIPTION:{}\r\n", escape_text(teacher)));
            }
        }

        if let Some(ref color) = event.color {
            ics_content.push_str(&format!("COLOR:{}\r\n", escape_text(color)));
        }

        if let Some(reminder_minutes) = self.options.reminder_minutes {
            ics_content.push_str("BEGIN:VALARM\r\n");
            ics_content.push_str("ACTION:DISPLAY\r\n");
            ics_content.push_str(&format!(
                "DESCRIPTION:{}\r\n",
                escape_text(&event.summary)
            ));
            ics_content.push_str(&format!("TRIGGER:-PT{}M\r\n", reminder_minutes));
            ics_content.push_str("END:VALARM\r\n");
        }

        ics_content.push_str("END:VEVENT\r\n");

        Ok(())
    }
}

impl Default for IcsGenerator {
    fn default() -> Self {
        Self::new(IcsOptions::default())
    }
}

fn utc<Tz: TimeZone>(time: &DateTime<Tz>) -> String {
    time.with_timezone(&Utc).format(DATE_TIME_FORMAT).to_string()
}

/// Escape TEXT values
fn escape_text(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace("\r\n", "\\n")
        .replace('\n', "\\n")
        .replace('\r', "\\n")
        .replace(',', "\\,")
        .replace(';', "\\;")
}
