//! Workbooks offered to the user for binding.

use std::fmt;

/// One entry of the candidate list produced by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// An open workbook, identified by its full path.
    Workbook(String),
    /// The application is running but has no open workbooks.
    NoOpenWorkbooks,
    /// Enumerating the running application failed.
    Unavailable(String),
}

impl Candidate {
    /// The workbook path, if this entry can be bound to.
    pub fn path(&self) -> Option<&str> {
        match self {
            Candidate::Workbook(path) if !path.is_empty() => Some(path),
            _ => None,
        }
    }

    pub fn is_selectable(&self) -> bool {
        self.path().is_some()
    }
}

impl From<&str> for Candidate {
    fn from(path: &str) -> Self {
        Candidate::Workbook(path.to_string())
    }
}

impl From<String> for Candidate {
    fn from(path: String) -> Self {
        Candidate::Workbook(path)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Candidate::Workbook(path) => write!(f, "{path}"),
            Candidate::NoOpenWorkbooks => write!(f, "No open Excel workbooks"),
            Candidate::Unavailable(reason) => write!(f, "Error: {reason}"),
        }
    }
}

/// Result of the most recent discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateList {
    entries: Vec<Candidate>,
}

impl CandidateList {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_paths(paths: Vec<String>) -> Self {
        if paths.is_empty() {
            return Self {
                entries: vec![Candidate::NoOpenWorkbooks],
            };
        }
        Self {
            entries: paths.into_iter().map(Candidate::Workbook).collect(),
        }
    }

    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            entries: vec![Candidate::Unavailable(reason.into())],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, index: usize) -> Option<&Candidate> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candidate> {
        self.entries.iter()
    }

    /// Paths of the selectable entries.
    pub fn paths(&self) -> Vec<&str> {
        self.entries.iter().filter_map(Candidate::path).collect()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<'a> IntoIterator for &'a CandidateList {
    type Item = &'a Candidate;
    type IntoIter = std::slice::Iter<'a, Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_paths_become_sentinel() {
        let list = CandidateList::from_paths(Vec::new());
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(0), Some(&Candidate::NoOpenWorkbooks));
        assert!(list.paths().is_empty());
    }

    #[test]
    fn test_sentinel_is_not_selectable() {
        assert!(!Candidate::NoOpenWorkbooks.is_selectable());
        assert!(!Candidate::Unavailable("boom".into()).is_selectable());
        assert!(!Candidate::Workbook(String::new()).is_selectable());
        assert!(Candidate::from("C:\\A.xlsx").is_selectable());
    }

    #[test]
    fn test_sentinel_text_is_not_a_path() {
        // A workbook whose path happens to equal the sentinel's text is still a workbook.
        let text = Candidate::NoOpenWorkbooks.to_string();
        let lookalike = Candidate::Workbook(text);
        assert!(lookalike.is_selectable());
        assert_ne!(lookalike, Candidate::NoOpenWorkbooks);
    }
}
