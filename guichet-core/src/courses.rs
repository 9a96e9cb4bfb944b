//! Optional course allow-list.

use std::collections::BTreeSet;

/// Courses to keep when fetching the schedule. Empty keeps everything.
#[derive(Debug, Clone, Default)]
pub struct CourseFilter {
    allowed: BTreeSet<String>,
}

impl CourseFilter {
    pub fn new<I, S>(courses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CourseFilter {
            allowed: courses.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn permits(&self, course_code: &str) -> bool {
        self.allowed.is_empty() || self.allowed.contains(course_code)
    }
}
