//! Optional behaviours an entity type can opt into.
//!
//! The core never implements these; it only needs to invoke them without knowing the concrete
//! row type. Each trait names the command that carries the change, and the generic helpers run
//! the entity's own checks before sending it.
use std::fmt;

use log::debug;

use crate::{
    error::ClientError,
    protocol::{CommandId, TableId},
    session::Session,
    table::row::Row,
};

/// Why a row cannot be removed right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CannotRemoveReason {
    pub reason: String,
    /// Table holding the rows that depend on this one, when there is one.
    pub dependent: Option<TableId>,
}

impl fmt::Display for CannotRemoveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dependent {
            Some(table) => write!(f, "{} ({table})", self.reason),
            None => write!(f, "{}", self.reason),
        }
    }
}

pub trait Removable: Row {
    const REMOVE: CommandId;

    /// Reasons the row must stay, or an empty list when it can be removed.
    fn cannot_remove_reasons(&self, session: &Session) -> Result<Vec<CannotRemoveReason>, ClientError>;
}

pub trait Disablable: Row {
    /// Takes the row key followed by the new disabled flag.
    const SET_DISABLED: CommandId;

    fn is_disabled(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordProblem {
    TooShort { minimum: usize },
    ContainsUsername,
    SingleCharacterClass,
    Other(String),
}

impl fmt::Display for PasswordProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PasswordProblem::TooShort { minimum } => {
                write!(f, "must be at least {minimum} characters")
            }
            PasswordProblem::ContainsUsername => write!(f, "must not contain the username"),
            PasswordProblem::SingleCharacterClass => {
                write!(f, "must mix letters with digits or punctuation")
            }
            PasswordProblem::Other(message) => write!(f, "{message}"),
        }
    }
}

pub trait PasswordChecked: Row {
    /// Takes the row key followed by the new password.
    const SET_PASSWORD: CommandId;

    /// Problems with `password` for this row, or an empty list when it is strong enough.
    fn check_password(&self, password: &str) -> Vec<PasswordProblem>;
}

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Strength checks most password-bearing entities share.
pub fn basic_password_problems(username: &str, password: &str) -> Vec<PasswordProblem> {
    let mut problems = Vec::new();
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        problems.push(PasswordProblem::TooShort {
            minimum: MIN_PASSWORD_LENGTH,
        });
    }
    if !username.is_empty() && password.to_lowercase().contains(&username.to_lowercase()) {
        problems.push(PasswordProblem::ContainsUsername);
    }
    let letters = password.chars().any(char::is_alphabetic);
    let others = password.chars().any(|c| !c.is_alphabetic());
    if !(letters && others) {
        problems.push(PasswordProblem::SingleCharacterClass);
    }
    problems
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    Refused(Vec<CannotRemoveReason>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordOutcome {
    Changed,
    Rejected(Vec<PasswordProblem>),
}

/// Removes `row` unless it reports reasons to stay.
pub fn remove_checked<R: Removable>(session: &Session, row: &R) -> Result<RemoveOutcome, ClientError> {
    let reasons = row.cannot_remove_reasons(session)?;
    if !reasons.is_empty() {
        debug!("{} refused removal of {:?}", R::TABLE_ID, row.key());
        return Ok(RemoveOutcome::Refused(reasons));
    }
    let key = row.key();
    session.request_update_with_invalidation(R::REMOVE, |out, _| R::write_key(&key, out))?;
    Ok(RemoveOutcome::Removed)
}

/// Flips the disabled flag of `row`. Returns the new flag.
pub fn toggle_disabled<R: Disablable>(session: &Session, row: &R) -> Result<bool, ClientError> {
    let disabled = !row.is_disabled();
    let key = row.key();
    session.request_update_with_invalidation(R::SET_DISABLED, |out, _| {
        R::write_key(&key, out)?;
        out.write_bool(disabled)
    })?;
    Ok(disabled)
}

/// Sets the password of `row` if it passes the row's own strength checks.
pub fn set_password_checked<R: PasswordChecked>(
    session: &Session,
    row: &R,
    password: &str,
) -> Result<PasswordOutcome, ClientError> {
    let problems = row.check_password(password);
    if !problems.is_empty() {
        return Ok(PasswordOutcome::Rejected(problems));
    }
    let key = row.key();
    session.request_update_with_invalidation(R::SET_PASSWORD, |out, _| {
        R::write_key(&key, out)?;
        out.write_str(password)
    })?;
    Ok(PasswordOutcome::Changed)
}
