use std::fmt;

/// A peripheral seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralHandle {
    id: String,
    name: Option<String>,
}

impl PeripheralHandle {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }

    /// Platform-assigned identifier
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Local name of the device
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether the device advertises a non-empty name
    #[inline]
    pub fn has_name(&self) -> bool {
        self.name().is_some_and(|name| !name.is_empty())
    }
}

impl fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) if !name.is_empty() => write!(f, "{} ({})", name, self.id),
            _ => write!(f, "{}", self.id),
        }
    }
}
