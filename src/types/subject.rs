use serde::{Deserialize, Serialize};

/// The acting user a permission rule is checked against.
///
/// Anonymous requests are modelled as `None` at the call site rather than as
/// a special subject.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Subject {
    pub id: i64,
    pub username: String,
    pub party_id: Option<i64>,
    pub party_name: Option<String>,
    pub rating: i64,
    pub admin: bool,
}

impl Subject {
    #[must_use]
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_party(mut self, party_id: i64, party_name: impl Into<String>) -> Self {
        self.party_id = Some(party_id);
        self.party_name = Some(party_name.into());
        self
    }

    #[must_use]
    pub fn with_rating(mut self, rating: i64) -> Self {
        self.rating = rating;
        self
    }

    #[must_use]
    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    #[must_use]
    pub fn has_party(&self) -> bool {
        self.party_id.is_some_and(|id| id != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder() {
        let s = Subject::new(7, "anna").with_party(3, "Green").with_rating(40);
        assert_eq!(s.username, "anna");
        assert!(s.has_party());
        assert_eq!(s.party_name.as_deref(), Some("Green"));
        assert_eq!(s.rating, 40);
        assert!(!s.admin);
    }

    #[test]
    fn zero_party_id_counts_as_no_party() {
        let mut s = Subject::new(1, "x");
        s.party_id = Some(0);
        assert!(!s.has_party());
    }
}
