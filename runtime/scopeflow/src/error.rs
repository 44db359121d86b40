use std::fmt;
use std::sync::Arc;

/// `scopeflow`'s error type: an opaque wrapper around the concrete error type
/// returned by your providers, teardown steps and endpoint handlers.
///
/// The same error value may be shown to several teardown steps while a request
/// unwinds, therefore [`Error`] is cheap to clone.
///
/// # Implementation details
///
/// It's a thin shim over `Arc<dyn std::error::Error + Send + Sync>`.
#[derive(Debug, Clone)]
pub struct Error {
    inner: Arc<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Create a new [`Error`] from a boxable error.
    ///
    /// Wrapping an [`Error`] returns it unchanged.
    pub fn new<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let boxed: Box<dyn std::error::Error + Send + Sync> = error.into();
        match boxed.downcast::<Error>() {
            Ok(error) => *error,
            Err(other) => Self {
                inner: Arc::from(other),
            },
        }
    }

    /// Create a new [`Error`] out of a plain message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display,
    {
        Self::new(message.to_string())
    }

    /// Return a reference to the underlying error.
    pub fn inner_ref(&self) -> &(dyn std::error::Error + Send + Sync) {
        &*self.inner
    }

    /// Try to view the underlying error as an instance of `E`.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.inner.downcast_ref::<E>()
    }

    /// `true` if the underlying error is an instance of `E`.
    pub fn is<E>(&self) -> bool
    where
        E: std::error::Error + 'static,
    {
        self.inner.is::<E>()
    }

    /// `true` if both handles point at the very same error instance.
    pub fn ptr_eq(&self, other: &Error) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}
