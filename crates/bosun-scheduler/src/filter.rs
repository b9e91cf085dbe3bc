//! Change selection for schedulers.
//!
//! A `ChangeFilter` decides which changes a scheduler looks at at all; the
//! importance predicate then decides, per matched change, whether it can
//! trigger a build on its own or only rides along.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use bosun_store::Change;

/// Caller-supplied importance classification, evaluated once per change at
/// classification time. Absent predicate means every matched change is
/// important.
pub type ImportancePredicate = Arc<dyn Fn(&Change) -> bool + Send + Sync>;

/// Attribute-list filter over changes.
///
/// Each field, when set, is a whitelist; an unset field matches everything.
/// A change matches the filter when it matches every set field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFilter {
    #[serde(default)]
    pub branches: Option<Vec<String>>,

    #[serde(default)]
    pub categories: Option<Vec<String>>,

    #[serde(default)]
    pub projects: Option<Vec<String>>,

    #[serde(default)]
    pub repositories: Option<Vec<String>>,
}

impl ChangeFilter {
    /// Filter that matches every change.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_branches(mut self, branches: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.branches = Some(branches.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_categories(
        mut self,
        categories: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.categories = Some(categories.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_projects(mut self, projects: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.projects = Some(projects.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_repositories(
        mut self,
        repositories: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.repositories = Some(repositories.into_iter().map(Into::into).collect());
        self
    }

    /// True when no field is set, i.e. the filter matches everything.
    pub fn is_empty(&self) -> bool {
        self.branches.is_none()
            && self.categories.is_none()
            && self.projects.is_none()
            && self.repositories.is_none()
    }

    pub fn matches(&self, change: &Change) -> bool {
        if let Some(branches) = &self.branches {
            if !branches.contains(&change.branch) {
                return false;
            }
        }
        if let Some(categories) = &self.categories {
            // A change without a category never matches a category list.
            match &change.category {
                Some(category) if categories.contains(category) => {}
                _ => return false,
            }
        }
        if let Some(projects) = &self.projects {
            if !projects.contains(&change.project) {
                return false;
            }
        }
        if let Some(repositories) = &self.repositories {
            if !repositories.contains(&change.repository) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bosun_store::ChangeNumber;
    use chrono::Utc;

    fn change(branch: &str, category: Option<&str>, project: &str) -> Change {
        Change {
            number: ChangeNumber(1),
            author: "dev@example.com".to_string(),
            revision: "abc123".to_string(),
            files: vec!["src/lib.rs".to_string()],
            comments: "change".to_string(),
            when: Utc::now(),
            branch: branch.to_string(),
            category: category.map(str::to_string),
            project: project.to_string(),
            repository: "git@example.com:proj.git".to_string(),
            skip_build: false,
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = ChangeFilter::any();
        assert!(filter.is_empty());
        assert!(filter.matches(&change("main", None, "proj")));
        assert!(filter.matches(&change("dev", Some("release"), "other")));
    }

    #[test]
    fn branch_list_restricts_matches() {
        let filter = ChangeFilter::any().with_branches(["main", "release"]);
        assert!(filter.matches(&change("main", None, "proj")));
        assert!(!filter.matches(&change("dev", None, "proj")));
    }

    #[test]
    fn category_list_excludes_uncategorized_changes() {
        let filter = ChangeFilter::any().with_categories(["release"]);
        assert!(filter.matches(&change("main", Some("release"), "proj")));
        assert!(!filter.matches(&change("main", Some("hotfix"), "proj")));
        assert!(!filter.matches(&change("main", None, "proj")));
    }

    #[test]
    fn all_set_fields_must_match() {
        let filter = ChangeFilter::any()
            .with_branches(["main"])
            .with_projects(["proj"]);
        assert!(filter.matches(&change("main", None, "proj")));
        assert!(!filter.matches(&change("main", None, "other")));
        assert!(!filter.matches(&change("dev", None, "proj")));
    }
}
