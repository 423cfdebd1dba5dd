/// Message exchanged between adjacent stages.
///
/// Buffers never carry bare values: every element is an envelope so the
/// end-of-stream signal can travel in-band, behind any items still queued
/// ahead of it. Each stage forwards `End` exactly once and then exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope<T> {
    /// A live item flowing downstream.
    Item(T),
    /// The generator's input is exhausted; no further items will follow.
    End,
}

impl<T> Envelope<T> {
    /// Whether this envelope is the end-of-stream marker.
    pub fn is_end(&self) -> bool {
        matches!(self, Envelope::End)
    }

    /// The carried item, or `None` for the end-of-stream marker.
    pub fn into_item(self) -> Option<T> {
        match self {
            Envelope::Item(value) => Some(value),
            Envelope::End => None,
        }
    }
}

impl<T> From<Option<T>> for Envelope<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Envelope::Item(value),
            None => Envelope::End,
        }
    }
}
