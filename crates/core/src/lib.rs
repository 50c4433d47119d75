#![forbid(unsafe_code)]

pub mod ids {
    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    pub struct Username(String);

    impl Username {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, UsernameError> {
            let value = value.into();
            let trimmed = value.trim();
            validate_username(trimmed)?;
            Ok(Self(trimmed.to_string()))
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum UsernameError {
        Empty,
        TooLong,
        InvalidFirstChar,
        InvalidChar { ch: char, index: usize },
    }

    fn validate_username(value: &str) -> Result<(), UsernameError> {
        if value.is_empty() {
            return Err(UsernameError::Empty);
        }
        if value.len() > 32 {
            return Err(UsernameError::TooLong);
        }
        let mut chars = value.chars();
        let Some(first) = chars.next() else {
            return Err(UsernameError::Empty);
        };
        if !first.is_ascii_alphanumeric() {
            return Err(UsernameError::InvalidFirstChar);
        }
        for (index, ch) in value.chars().enumerate() {
            if index == 0 {
                continue;
            }
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                continue;
            }
            return Err(UsernameError::InvalidChar { ch, index });
        }
        Ok(())
    }
}

pub mod model {
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct Task {
        pub id: String,
        pub text: String,
        pub created_at_ms: i64,
        pub checked: bool,
        pub owner: String,
        pub username: String,
    }
}

pub mod text {
    pub const MAX_TASK_TEXT_BYTES: usize = 2000;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum TaskTextError {
        Empty,
        TooLong,
    }

    pub fn normalize_task_text(value: &str) -> Result<String, TaskTextError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(TaskTextError::Empty);
        }
        if value.len() > MAX_TASK_TEXT_BYTES {
            return Err(TaskTextError::TooLong);
        }
        Ok(value.to_string())
    }
}

pub mod view {
    use crate::model::Task;

    // hide_completed is caller-local state passed in explicitly, never shared.
    pub fn visible(tasks: &[Task], hide_completed: bool) -> Vec<&Task> {
        let mut out = tasks
            .iter()
            .filter(|task| !(hide_completed && task.checked))
            .collect::<Vec<_>>();
        out.sort_by(|a, b| {
            b.created_at_ms
                .cmp(&a.created_at_ms)
                .then_with(|| b.id.cmp(&a.id))
        });
        out
    }

    pub fn incomplete_count(tasks: &[Task]) -> usize {
        tasks.iter().filter(|task| !task.checked).count()
    }
}
