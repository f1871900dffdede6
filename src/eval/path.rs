use core::fmt;

/// One step into a template: an object field or a list position.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, ".{}", key),
            PathSegment::Index(index) => write!(f, "[{}]", index),
        }
    }
}

/// Location of a branch inside the overall template, rendered as `$.media[2].url`.
///
/// Only used for diagnostics. A path produced by `ExecutionContext::chain` also
/// carries the 1-based step of the chain that was running.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TemplatePath {
    segments: Vec<PathSegment>,
    chain_step: Option<usize>,
}

impl TemplatePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self {
            segments,
            chain_step: None,
        }
    }

    /// Returns a new path one level deeper. Any chain step annotation is dropped.
    pub fn child(&self, segment: impl Into<PathSegment>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self::new(segments)
    }

    pub fn join(&self, segments: &[PathSegment]) -> Self {
        let mut joined = self.segments.clone();
        joined.extend_from_slice(segments);
        Self::new(joined)
    }

    pub fn with_chain_step(&self, step: usize) -> Self {
        Self {
            segments: self.segments.clone(),
            chain_step: Some(step),
        }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn chain_step(&self) -> Option<usize> {
        self.chain_step
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for TemplatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for segment in &self.segments {
            write!(f, "{}", segment)?;
        }
        if let Some(step) = self.chain_step {
            write!(f, " — (chain step {})", step)?;
        }
        Ok(())
    }
}

impl From<Vec<PathSegment>> for TemplatePath {
    fn from(segments: Vec<PathSegment>) -> Self {
        Self::new(segments)
    }
}
