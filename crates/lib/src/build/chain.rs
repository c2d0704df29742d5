//! Ordered shell command generation.
//!
//! A [`BuildChain`] is a list of steps, each rendering itself to one or more
//! shell lines through [`CommandLine`]. The rendered lines run in a single
//! interactive shell, so later lines see the cwd and variables of earlier ones.

use std::fmt;

use super::BuildError;

/// A step that knows how to render itself as shell lines.
pub trait CommandLine: fmt::Debug + Send + Sync {
  /// Render the step.
  ///
  /// # Errors
  ///
  /// Returns a [`BuildError`] when the step's fields cannot form a valid
  /// command (invalid variable names, empty paths).
  fn command_lines(&self) -> Result<Vec<String>, BuildError>;
}

#[derive(Debug, Default)]
pub struct BuildChain {
  steps: Vec<Box<dyn CommandLine>>,
}

impl BuildChain {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append a step.
  pub fn with(mut self, step: impl CommandLine + 'static) -> Self {
    self.steps.push(Box::new(step));
    self
  }

  pub fn len(&self) -> usize {
    self.steps.len()
  }

  pub fn is_empty(&self) -> bool {
    self.steps.is_empty()
  }

  /// Render every step in order into one flat command list.
  pub fn generate_commands(&self) -> Result<Vec<String>, BuildError> {
    let mut commands = Vec::new();
    for step in &self.steps {
      commands.extend(step.command_lines()?);
    }
    Ok(commands)
  }
}
