//! Interactive selection among candidates the user left unspecified.

use dialoguer::Select;
use thiserror::Error;

/// Failures while asking the user to choose.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SelectionError {
    /// There was nothing to choose from.
    #[error("no candidates available for: {prompt}")]
    Empty {
        /// Prompt that would have been shown.
        prompt: String,
    },
    /// The user dismissed the prompt.
    #[error("selection cancelled: {prompt}")]
    Cancelled {
        /// Prompt that was dismissed.
        prompt: String,
    },
    /// The terminal could not be driven.
    #[error("selection prompt failed: {message}")]
    Prompt {
        /// Underlying terminal error.
        message: String,
    },
}

/// Chooses exactly one candidate by index.
pub trait Selector: Send + Sync {
    /// Returns the index of the chosen entry in `options`.
    ///
    /// # Errors
    ///
    /// Returns [`SelectionError`] when `options` is empty or no choice is made.
    fn select(&self, prompt: &str, options: &[String]) -> Result<usize, SelectionError>;
}

/// Terminal menu backed by `dialoguer`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PromptSelector;

impl Selector for PromptSelector {
    fn select(&self, prompt: &str, options: &[String]) -> Result<usize, SelectionError> {
        if options.is_empty() {
            return Err(SelectionError::Empty {
                prompt: prompt.to_owned(),
            });
        }
        Select::new()
            .with_prompt(prompt)
            .items(options)
            .default(0)
            .interact_opt()
            .map_err(|err| SelectionError::Prompt {
                message: err.to_string(),
            })?
            .ok_or_else(|| SelectionError::Cancelled {
                prompt: prompt.to_owned(),
            })
    }
}
