use std::fmt::{Debug, Display, Formatter};
use std::num::NonZeroUsize;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

pub const MSG_INVALID_PARAMETER: &str = "invalid parameter";
pub const MSG_NOT_FOUND: &str = "can not found clue information";
pub const MSG_EMPTY_TITLE_OR_NUMBER: &str = "title and number can not be empty";
pub const MSG_PERMISSION_DENIED: &str = "permission denied";

#[derive(Debug, thiserror::Error)]
pub enum ClueError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    NotFound(String),
    #[error("permission denied")]
    PermissionDenied,
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ClueError {
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    #[must_use]
    pub fn not_found() -> Self {
        Self::NotFound(MSG_NOT_FOUND.to_string())
    }

    #[must_use]
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }

    /// Stable lowercase label for log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::Io { .. } => "io",
        }
    }
}

/// One clue record.
///
/// Wire names follow the published protocol (`desc`, `attachment`); the long names are
/// accepted on input. Missing fields default to empty values.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Clue {
    pub title: String,
    #[serde(rename = "desc", alias = "description")]
    pub description: String,
    pub count: i64,
    pub number: String,
    #[serde(rename = "attachment", alias = "attachments", deserialize_with = "null_as_empty")]
    pub attachments: Vec<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Clue {
    /// Check the fields every write requires.
    ///
    /// # Errors
    /// Returns [`ClueError::InvalidInput`] when `title` or `number` is blank after trimming.
    pub fn validate(&self) -> Result<(), ClueError> {
        if self.title.trim().is_empty() || self.number.trim().is_empty() {
            return Err(ClueError::invalid(MSG_EMPTY_TITLE_OR_NUMBER));
        }
        Ok(())
    }
}

/// A 1-based positional id.
///
/// Identity is the record's place in the store at lookup time, so a position names a
/// different record once an earlier one is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(NonZeroUsize);

impl Position {
    #[must_use]
    pub fn new(value: usize) -> Option<Self> {
        NonZeroUsize::new(value).map(Self)
    }

    /// Position of the record stored at 0-based `index`.
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        Self(NonZeroUsize::MIN.saturating_add(index))
    }

    /// Parse a raw path parameter.
    ///
    /// # Errors
    /// Returns [`ClueError::InvalidInput`] when the value is blank, not a decimal
    /// integer, or zero.
    pub fn parse(raw: &str) -> Result<Self, ClueError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ClueError::invalid(MSG_INVALID_PARAMETER));
        }
        let value = trimmed
            .parse::<usize>()
            .map_err(|err| ClueError::invalid(format!("invalid id {trimmed:?}: {err}")))?;
        Self::new(value)
            .ok_or_else(|| ClueError::invalid(format!("invalid id {trimmed:?}: ids start at 1")))
    }

    #[must_use]
    pub fn get(self) -> usize {
        self.0.get()
    }

    /// 0-based index into the store's sequence.
    #[must_use]
    pub fn index(self) -> usize {
        self.0.get() - 1
    }
}

impl FromStr for Position {
    type Err = ClueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered clue storage addressed by position.
///
/// Implementations must perform each bounds check and the access it guards atomically.
pub trait ClueStore: Send + Sync + Debug {
    /// Append one clue and return its position.
    fn append(&self, clue: Clue) -> Position;

    /// # Errors
    /// Returns [`ClueError::NotFound`] when `position` exceeds the current length.
    fn get(&self, position: Position) -> Result<Clue, ClueError>;

    /// Overwrite the clue at `position`, returning the previous value.
    ///
    /// # Errors
    /// Returns [`ClueError::NotFound`] when `position` exceeds the current length.
    fn replace(&self, position: Position, clue: Clue) -> Result<Clue, ClueError>;

    /// Remove the clue at `position`; every later clue moves down one position.
    ///
    /// # Errors
    /// Returns [`ClueError::NotFound`] when `position` exceeds the current length.
    fn remove(&self, position: Position) -> Result<Clue, ClueError>;

    /// Copy of `[start, start + count)`, with `count` defaulting to the current length.
    ///
    /// # Errors
    /// Returns [`ClueError::InvalidInput`] when the range does not fit the sequence.
    fn range(&self, start: usize, count: Option<usize>) -> Result<Vec<Clue>, ClueError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared bounds rule for [`ClueStore::range`] implementations.
///
/// # Errors
/// Returns [`ClueError::InvalidInput`] when `start + count` overflows or exceeds `len`.
pub fn checked_range(
    start: usize,
    count: usize,
    len: usize,
) -> Result<std::ops::Range<usize>, ClueError> {
    match start.checked_add(count) {
        Some(end) if end <= len => Ok(start..end),
        _ => Err(ClueError::invalid(format!(
            "range [{start}, {start}+{count}) out of bounds for {len} clues"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clue(title: &str, number: &str) -> Clue {
        Clue { title: title.to_string(), number: number.to_string(), ..Clue::default() }
    }

    #[test]
    fn validate_rejects_blank_title_or_number() {
        assert!(clue("A", "1").validate().is_ok());
        for (title, number) in [("", "1"), ("A", ""), ("   ", "1"), ("A", "\t\n")] {
            match clue(title, number).validate() {
                Err(ClueError::InvalidInput(message)) => {
                    assert_eq!(message, MSG_EMPTY_TITLE_OR_NUMBER);
                }
                other => panic!("expected invalid input for {title:?}/{number:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn position_parse_trims_and_rejects_bad_values() {
        match Position::parse(" 3 ") {
            Ok(position) => {
                assert_eq!(position.get(), 3);
                assert_eq!(position.index(), 2);
            }
            Err(err) => panic!("expected valid position: {err}"),
        }

        match Position::parse("  ") {
            Err(ClueError::InvalidInput(message)) => assert_eq!(message, MSG_INVALID_PARAMETER),
            other => panic!("expected invalid parameter, got {other:?}"),
        }
        for raw in ["abc", "0", "-1", "1.5"] {
            assert!(
                matches!(Position::parse(raw), Err(ClueError::InvalidInput(_))),
                "expected {raw:?} to be rejected"
            );
        }
    }

    #[test]
    fn position_from_index_is_one_based() {
        assert_eq!(Position::from_index(0).get(), 1);
        assert_eq!(Position::from_index(4).to_string(), "5");
    }

    #[test]
    fn clue_uses_protocol_field_names() {
        let value = match serde_json::to_value(Clue {
            title: "A".to_string(),
            description: "d".to_string(),
            count: 2,
            number: "1".to_string(),
            attachments: vec!["x.png".to_string()],
        }) {
            Ok(value) => value,
            Err(err) => panic!("failed to serialize clue: {err}"),
        };
        assert_eq!(
            value,
            serde_json::json!({
                "title": "A",
                "desc": "d",
                "count": 2,
                "number": "1",
                "attachment": ["x.png"]
            })
        );
    }

    #[test]
    fn clue_accepts_aliases_nulls_and_missing_fields() {
        let parsed: Clue = match serde_json::from_str(
            r#"{"title":"A","description":"long","attachments":["a"],"number":"7"}"#,
        ) {
            Ok(clue) => clue,
            Err(err) => panic!("failed to parse aliased clue: {err}"),
        };
        assert_eq!(parsed.description, "long");
        assert_eq!(parsed.attachments, vec!["a".to_string()]);
        assert_eq!(parsed.count, 0);

        let parsed: Clue = match serde_json::from_str(r#"{"title":"A","attachment":null}"#) {
            Ok(clue) => clue,
            Err(err) => panic!("failed to parse null attachment: {err}"),
        };
        assert!(parsed.attachments.is_empty());
        assert!(parsed.number.is_empty());
    }

    #[test]
    fn checked_range_enforces_bounds() {
        assert!(matches!(checked_range(0, 3, 3), Ok(range) if range == (0..3)));
        assert!(matches!(checked_range(3, 0, 3), Ok(range) if range.is_empty()));
        assert!(matches!(checked_range(1, 3, 3), Err(ClueError::InvalidInput(_))));
        assert!(matches!(checked_range(usize::MAX, 2, 3), Err(ClueError::InvalidInput(_))));
    }
}
