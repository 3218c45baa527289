mod answer;
mod ids;
mod session;

pub use answer::{Answer, ExpectedAnswer};
pub use ids::{ParseIdError, SessionId, SessionKey, SessionKeyError};
pub use session::{NewSession, Session, SessionModelError};
