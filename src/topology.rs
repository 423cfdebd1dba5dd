/// Output envelope of a filter stage.
///
/// A filter stage ingests N items and emits at most N: when it returns an
/// empty `Filtered`, the data flow that started with that input simply ends
/// and the stage moves on to the next input.
///
/// Closures returning `Option<T>` convert via `From`, so
/// `|n: i32| (n % 2 != 0).then_some(n)` is a valid filter callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Filtered<T> {
    data: Option<T>,
}

impl<T> Filtered<T> {
    /// Keep `value`: it is forwarded downstream.
    pub fn keep(value: T) -> Self {
        Self { data: Some(value) }
    }

    /// Drop the current item; nothing is forwarded.
    pub fn discard() -> Self {
        Self { data: None }
    }

    /// Whether the envelope carries a value.
    pub fn has_value(&self) -> bool {
        self.data.is_some()
    }

    /// The carried value, if any.
    pub fn into_inner(self) -> Option<T> {
        self.data
    }
}

impl<T> From<Option<T>> for Filtered<T> {
    fn from(data: Option<T>) -> Self {
        Self { data }
    }
}

/// Input and output envelope of a hatch stage.
///
/// A hatch stage ingests N items and emits N or more. Its callable first
/// receives the popped input wrapped in a non-empty `Hatchable`; as long as
/// it returns a non-empty envelope, the value is forwarded and the callable
/// is invoked again with `Hatchable::empty()` to hatch a follow-up output.
/// An empty result returns control to the input queue.
///
/// Closures returning `Option<T>` convert via `From`, matching the filter
/// callable shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hatchable<T> {
    data: Option<T>,
}

impl<T> Hatchable<T> {
    /// Wrap a fresh input value.
    pub fn new(value: T) -> Self {
        Self { data: Some(value) }
    }

    /// The "keep hatching" ping passed on re-invocation.
    pub fn empty() -> Self {
        Self { data: None }
    }

    /// Whether the envelope carries a value.
    pub fn has_value(&self) -> bool {
        self.data.is_some()
    }

    /// The carried value, if any.
    pub fn into_inner(self) -> Option<T> {
        self.data
    }

    /// A reference to the carried value, if any.
    pub fn value(&self) -> Option<&T> {
        self.data.as_ref()
    }
}

impl<T> From<Option<T>> for Hatchable<T> {
    fn from(data: Option<T>) -> Self {
        Self { data }
    }
}
