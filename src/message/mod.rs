//! Timeout diagnostics attached to steps.

use std::fmt;

/// The diagnostic reported if the watchdog fires while a step is running.
///
/// A message is resolved to text only at the moment a failure is actually
/// reported, so an expensive description costs nothing on the passing path.
pub enum Message {
    /// Fixed text.
    Literal(String),
    /// Text produced on demand at failure-report time.
    Lazy(Box<dyn Fn() -> String + Send>),
}

impl Message {
    /// Creates a message whose text is produced only if the failure is
    /// actually reported.
    ///
    /// # Example
    ///
    /// ```rust
    /// use stepchain::message::Message;
    ///
    /// let message = Message::lazy(|| format!("queue still empty after {} polls", 20));
    /// assert_eq!(message.resolve(), "queue still empty after 20 polls");
    /// ```
    pub fn lazy<F>(describe: F) -> Self
    where
        F: Fn() -> String + Send + 'static,
    {
        Self::Lazy(Box::new(describe))
    }

    /// Resolves the message to its text.
    #[must_use]
    pub fn resolve(&self) -> String {
        match self {
            Self::Literal(text) => text.clone(),
            Self::Lazy(describe) => describe(),
        }
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::Literal(text.to_owned())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::Literal(text)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(text) => f.debug_tuple("Literal").field(text).finish(),
            Self::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_literal_resolves_to_its_text() {
        let message = Message::from("the socket never connected");
        assert_eq!(message.resolve(), "the socket never connected");
    }

    #[test]
    fn test_lazy_is_not_called_until_resolved() {
        let calls = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&calls);
        let message = Message::lazy(move || {
            observed.fetch_add(1, Ordering::SeqCst);
            "built on demand".to_owned()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(message.resolve(), "built on demand");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_debug_hides_the_lazy_closure() {
        let message = Message::lazy(|| "text".to_owned());
        assert_eq!(format!("{message:?}"), "Lazy(..)");
    }
}
