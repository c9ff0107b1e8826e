//! Operator commands. Each one composes the vhost edits with the system
//! collaborators and reports progress through `output`.

pub mod auth;
pub mod php;
pub mod ssl;
pub mod vhost;

use anyhow::{bail, Result};
use dialoguer::{Confirm, Input, Password};

/// Returns `value`, or asks for it on the terminal when it was not given.
fn value_or_prompt(value: Option<&str>, prompt: &str) -> Result<String> {
    let value = match value {
        Some(value) => value.trim().to_string(),
        None => Input::<String>::new()
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()?
            .trim()
            .to_string(),
    };

    if value.is_empty() {
        bail!("{} is required", prompt);
    }
    Ok(value)
}

fn secret_or_prompt(value: Option<&str>, prompt: &str) -> Result<String> {
    let value = match value {
        Some(value) => value.to_string(),
        None => Password::new()
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()?,
    };

    if value.is_empty() {
        bail!("{} is required", prompt);
    }
    Ok(value)
}

/// Asks a yes/no question defaulting to no, unless `assume_yes` answers it.
fn confirm(prompt: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    Ok(Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?)
}
