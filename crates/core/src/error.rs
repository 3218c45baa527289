use thiserror::Error;

use crate::model::{SessionKeyError, SessionModelError};
use crate::scoring::ScoreError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Key(#[from] SessionKeyError),
    #[error(transparent)]
    Session(#[from] SessionModelError),
    #[error(transparent)]
    Score(#[from] ScoreError),
}
