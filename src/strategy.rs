use serde::{Deserialize, Serialize};
use std::fmt;

/// What a build does when a non-root entity's identity value is null.
/// Selected once per build call, for every level alike.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullIdStrategy {
    /// Leave the entity out of this row and move on to the next level.
    #[default]
    Skip,
    /// Abort the whole build call.
    Throw,
    /// Key the entity by null: every id-less row for a type shares one instance.
    AllowNull,
}

impl fmt::Display for NullIdStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Skip => "skip",
            Self::Throw => "throw",
            Self::AllowNull => "allow_null",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_is_default() {
        assert_eq!(NullIdStrategy::default(), NullIdStrategy::Skip);
    }

    #[test]
    fn serde_names_are_snake_case() {
        let json = serde_json::to_string(&NullIdStrategy::AllowNull).unwrap();
        assert_eq!(json, "\"allow_null\"");
        let back: NullIdStrategy = serde_json::from_str("\"throw\"").unwrap();
        assert_eq!(back, NullIdStrategy::Throw);
    }
}
