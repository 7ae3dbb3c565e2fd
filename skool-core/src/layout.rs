use chrono::{DateTime, FixedOffset};

use crate::{Lesson, PositionedLesson};

/// Half-open interval used for placement; degenerate lessons become zero-width.
#[derive(Debug, Clone, Copy)]
struct Span {
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
}

impl Span {
    fn of(lesson: &Lesson) -> Self {
        Self {
            start: lesson.start,
            end: lesson.end.max(lesson.start),
        }
    }

    /// Touching boundaries do not overlap.
    fn disjoint(self, other: Self) -> bool {
        other.end <= self.start || other.start >= self.end
    }
}

/// Assign columns to the lessons of one day so overlapping lessons sit side by side.
///
/// Lessons are placed in start order (ties keep input order) into the first
/// column where they overlap nothing, opening a new column otherwise. Each
/// lesson then spans right across every following column it does not
/// overlap, stopping at the first conflict. The result is in placement order.
pub fn layout(lessons: &[Lesson]) -> Vec<PositionedLesson> {
    let spans: Vec<Span> = lessons.iter().map(Span::of).collect();

    let mut order: Vec<usize> = (0..lessons.len()).collect();
    order.sort_by_key(|&i| spans[i].start);

    let mut columns: Vec<Vec<usize>> = Vec::new();
    let mut placed: Vec<(usize, usize)> = Vec::with_capacity(lessons.len());

    for &i in &order {
        let free = columns
            .iter()
            .position(|column| column.iter().all(|&j| spans[j].disjoint(spans[i])));

        let column = match free {
            Some(column) => column,
            None => {
                columns.push(Vec::new());
                columns.len() - 1
            }
        };
        columns[column].push(i);
        placed.push((i, column));
    }

    let column_count = columns.len();

    placed
        .into_iter()
        .map(|(i, column)| {
            let extra = columns[column + 1..]
                .iter()
                .take_while(|other| other.iter().all(|&j| spans[j].disjoint(spans[i])))
                .count();

            PositionedLesson {
                lesson: lessons[i].clone(),
                column_index: column,
                column_count,
                column_span: 1 + extra,
            }
        })
        .collect()
}
