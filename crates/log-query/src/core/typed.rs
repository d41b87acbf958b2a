//! Direction-typed iterator views.
//!
//! [`ForwardIterator`] only exposes `first`/`next` and [`BackwardIterator`]
//! only `last`/`prev`, so a direction mix-up fails to compile instead of
//! surfacing as `OpNotSupported` at runtime.

use crate::error::{QueryError, QueryResult};
use crate::types::LogItem;

use super::iterator::{BoxedIterator, LogIterator};

/// Oldest-first view over an iterator.
pub struct ForwardIterator<I: LogIterator + ?Sized = dyn LogIterator> {
    inner: Box<I>,
}

impl<I: LogIterator + ?Sized> ForwardIterator<I> {
    /// Wraps an iterator that has not been navigated yet.
    pub fn new(inner: Box<I>) -> Self {
        Self { inner }
    }

    /// See [`LogIterator::first`].
    pub async fn first(&mut self) -> bool {
        self.inner.first().await
    }

    /// See [`LogIterator::next`].
    pub async fn next(&mut self) -> bool {
        self.inner.next().await
    }

    /// See [`LogIterator::value`].
    pub fn value(&self) -> Option<&LogItem> {
        self.inner.value()
    }

    /// See [`LogIterator::error`].
    pub fn error(&self) -> Option<&QueryError> {
        self.inner.error()
    }

    /// See [`LogIterator::close`].
    pub async fn close(&mut self) -> QueryResult<()> {
        self.inner.close().await
    }

    /// Unwraps the underlying iterator.
    pub fn into_inner(self) -> Box<I> {
        self.inner
    }
}

/// Newest-first view over an iterator.
pub struct BackwardIterator<I: LogIterator + ?Sized = dyn LogIterator> {
    inner: Box<I>,
}

impl<I: LogIterator + ?Sized> BackwardIterator<I> {
    /// Wraps an iterator that has not been navigated yet.
    pub fn new(inner: Box<I>) -> Self {
        Self { inner }
    }

    /// See [`LogIterator::last`].
    pub async fn last(&mut self) -> bool {
        self.inner.last().await
    }

    /// See [`LogIterator::prev`].
    pub async fn prev(&mut self) -> bool {
        self.inner.prev().await
    }

    /// See [`LogIterator::value`].
    pub fn value(&self) -> Option<&LogItem> {
        self.inner.value()
    }

    /// See [`LogIterator::error`].
    pub fn error(&self) -> Option<&QueryError> {
        self.inner.error()
    }

    /// See [`LogIterator::close`].
    pub async fn close(&mut self) -> QueryResult<()> {
        self.inner.close().await
    }

    /// Unwraps the underlying iterator.
    pub fn into_inner(self) -> Box<I> {
        self.inner
    }
}

impl From<BoxedIterator> for ForwardIterator {
    fn from(inner: BoxedIterator) -> Self {
        Self::new(inner)
    }
}

impl From<BoxedIterator> for BackwardIterator {
    fn from(inner: BoxedIterator) -> Self {
        Self::new(inner)
    }
}

/// Either typed view, chosen at runtime from the sign of a count.
pub enum Directed {
    /// Forward traversal.
    Forward(ForwardIterator),
    /// Backward traversal.
    Backward(BackwardIterator),
}

impl Directed {
    /// Wraps `inner` forward when `backward` is false.
    pub fn new(inner: BoxedIterator, backward: bool) -> Self {
        if backward {
            Directed::Backward(inner.into())
        } else {
            Directed::Forward(inner.into())
        }
    }

    /// Advances in the chosen direction.
    pub async fn advance(&mut self) -> bool {
        match self {
            Directed::Forward(it) => it.next().await,
            Directed::Backward(it) => it.prev().await,
        }
    }

    /// The current item.
    pub fn value(&self) -> Option<&LogItem> {
        match self {
            Directed::Forward(it) => it.value(),
            Directed::Backward(it) => it.value(),
        }
    }

    /// The error that stopped iteration.
    pub fn error(&self) -> Option<&QueryError> {
        match self {
            Directed::Forward(it) => it.error(),
            Directed::Backward(it) => it.error(),
        }
    }

    /// Returns true for backward traversal.
    pub fn is_backward(&self) -> bool {
        matches!(self, Directed::Backward(_))
    }

    /// Unwraps the underlying iterator.
    pub fn into_inner(self) -> BoxedIterator {
        match self {
            Directed::Forward(it) => it.into_inner(),
            Directed::Backward(it) => it.into_inner(),
        }
    }

    /// Mutable access to the underlying iterator.
    pub fn inner_mut(&mut self) -> &mut dyn LogIterator {
        match self {
            Directed::Forward(it) => &mut *it.inner,
            Directed::Backward(it) => &mut *it.inner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::iterator::EmptyIterator;

    #[tokio::test]
    async fn test_forward_view() {
        let mut it = ForwardIterator::new(Box::new(EmptyIterator::new()));
        assert!(!it.first().await);
        assert!(!it.next().await);
        assert!(it.error().is_none());
        it.close().await.unwrap();
        assert!(it.error().is_some_and(QueryError::is_closed));
    }

    #[tokio::test]
    async fn test_directed_from_sign() {
        let mut dir = Directed::new(Box::new(EmptyIterator::new()), true);
        assert!(dir.is_backward());
        assert!(!dir.advance().await);
        assert!(dir.error().is_none());
        assert!(dir.inner_mut().close().await.is_ok());
    }
}
