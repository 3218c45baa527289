use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Raw answer as produced by an exercise.
///
/// Exercises report different shapes; `normalize` reduces every shape to the
/// slot value a session stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Answer {
    Unanswered,
    SingleChoice(u32),
    MultiChoice(Vec<u32>),
    Correctness(bool),
}

/// Expected answer shape of a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExpectedAnswer {
    Single(u32),
    /// Compared as a set: order and duplicates are ignored.
    Multi(Vec<u32>),
}

impl Answer {
    /// Reduce to the canonical slot value: `None` when unanswered, otherwise
    /// whether the answer is correct.
    ///
    /// A choice answer whose shape does not match the expected shape counts
    /// as incorrect.
    #[must_use]
    pub fn normalize(&self, expected: &ExpectedAnswer) -> Option<bool> {
        match (self, expected) {
            (Answer::Unanswered, _) => None,
            (Answer::Correctness(correct), _) => Some(*correct),
            (Answer::SingleChoice(got), ExpectedAnswer::Single(want)) => Some(got == want),
            (Answer::MultiChoice(got), ExpectedAnswer::Multi(want)) => {
                let got: BTreeSet<_> = got.iter().collect();
                let want: BTreeSet<_> = want.iter().collect();
                Some(got == want)
            }
            (Answer::SingleChoice(_), ExpectedAnswer::Multi(_))
            | (Answer::MultiChoice(_), ExpectedAnswer::Single(_)) => Some(false),
        }
    }
}
