use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{Datelike, NaiveDate, Weekday};
use serde::de::DeserializeOwned;

use crate::{
    DaySchedule, Error, Lesson, Result, ScheduleCredentials, Timetable,
    client::ApiClient,
    layout::layout,
    retry::retrying_request,
    session::{AuthBackend, SessionManager},
};

/// Fetches timetables and lessons with the current session token.
///
/// A 401 drops the session token and triggers one renewal, after which the
/// request is sent once more.
pub struct ScheduleDataSource<B: AuthBackend> {
    api: ApiClient,
    session: Arc<SessionManager<B>>,
    /// Scope fetched with a given session token
    scope: Mutex<Option<(String, String)>>,
}

impl<B: AuthBackend> ScheduleDataSource<B> {
    pub fn new(api: ApiClient, session: Arc<SessionManager<B>>) -> Self {
        Self {
            api,
            session,
            scope: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &Arc<SessionManager<B>> {
        &self.session
    }

    /// Scope for schedule queries, cached per session token.
    pub async fn scope(&self) -> Result<String> {
        let token = self.session.session_token().ok_or(Error::NotAuthenticated)?;
        if let Some(scope) = self.cached_scope(&token) {
            return Ok(scope);
        }

        let credentials: ScheduleCredentials =
            self.authorized_get("/schedule/credentials", &[]).await?;

        // the token may have been renewed while fetching
        let token = self.session.session_token().ok_or(Error::NotAuthenticated)?;
        *self.scope.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((token, credentials.scope.clone()));
        Ok(credentials.scope)
    }

    pub async fn timetables(&self) -> Result<Vec<Timetable>> {
        let scope = self.scope().await?;
        let timetables: Vec<Timetable> = self
            .authorized_get("/schedule/timetables", &[("scope", scope)])
            .await?;
        tracing::debug!(count = timetables.len(), "Fetched timetables");
        Ok(timetables)
    }

    /// Lessons of one ISO week.
    pub async fn lessons(&self, timetable_id: &str, year: i32, week: u32) -> Result<Vec<Lesson>> {
        if NaiveDate::from_isoywd_opt(year, week, Weekday::Mon).is_none() {
            return Err(Error::Config(format!(
                "Week {} does not exist in {}",
                week, year
            )));
        }

        let scope = self.scope().await?;
        let path = format!("/schedule/timetables/{}/lessons", timetable_id);
        let lessons: Vec<Lesson> = self
            .authorized_get(
                &path,
                &[
                    ("year", year.to_string()),
                    ("week", week.to_string()),
                    ("scope", scope),
                ],
            )
            .await?;

        tracing::info!(
            timetable = timetable_id,
            year,
            week,
            count = lessons.len(),
            "Fetched lessons"
        );
        Ok(lessons)
    }

    /// Lessons of the ISO week containing `date`.
    pub async fn lessons_for_week_of(
        &self,
        timetable_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<Lesson>> {
        let week = date.iso_week();
        self.lessons(timetable_id, week.year(), week.week()).await
    }

    /// One week's lessons grouped by day, each day laid out in columns.
    pub async fn week_schedule(
        &self,
        timetable_id: &str,
        year: i32,
        week: u32,
    ) -> Result<Vec<DaySchedule>> {
        let lessons = self.lessons(timetable_id, year, week).await?;
        Ok(days(lessons))
    }

    async fn authorized_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let token = self.session.session_token().ok_or(Error::NotAuthenticated)?;

        match self.get(path, query, &token).await {
            Err(Error::Unauthorized) => {
                if !self.session.invalidate_session(&token).await {
                    return Err(Error::NotAuthenticated);
                }
                let token = self.session.session_token().ok_or(Error::NotAuthenticated)?;
                self.get(path, query, &token).await
            }
            other => other,
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        token: &str,
    ) -> Result<T> {
        let url = self.api.url(path);

        let response = retrying_request(
            || {
                self.api
                    .client
                    .get(&url)
                    .bearer_auth(token)
                    .query(query)
                    .send()
            },
            self.api.retry,
        )
        .await
        .map_err(ApiClient::handle_error_req)?;

        ApiClient::read_json(response).await
    }

    fn cached_scope(&self, token: &str) -> Option<String> {
        self.scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|(owner, _)| owner == token)
            .map(|(_, scope)| scope.clone())
    }
}

/// Group lessons by local start date and lay out each day.
pub fn days(lessons: Vec<Lesson>) -> Vec<DaySchedule> {
    let mut by_day: BTreeMap<NaiveDate, Vec<Lesson>> = BTreeMap::new();
    for lesson in lessons {
        by_day.entry(lesson.date()).or_default().push(lesson);
    }

    by_day
        .into_iter()
        .map(|(date, lessons)| DaySchedule {
            date,
            lessons: layout(&lessons),
        })
        .collect()
}
