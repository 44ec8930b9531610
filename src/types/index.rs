use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::context::LawContext;
use super::error::CompileError;
use super::report::PermissionReport;
use super::rule::ActionRule;
use super::subject::Subject;
use crate::parse::LawParser;

/// Compiled permission rules indexed by canonical action name.
///
/// Each action's list is kept sorted by priority, highest first; equal
/// priorities keep insertion order. An index is treated as immutable once
/// published: writers build a new one and swap it in.
///
/// # Example
///
/// ```
/// use statute::{LawContext, LawParser, RuleIndex, Subject};
///
/// let parser = LawParser::default();
/// let mut index = RuleIndex::new();
/// index.add_law(&parser, "voting", "Пользователь член партии голосовать").unwrap();
///
/// let member = Subject::new(1, "anna").with_party(3, "Green");
/// assert!(index.check_permission(Some(&member), "vote", &LawContext::default()));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleIndex {
    pub(crate) rules: HashMap<String, Vec<ActionRule>>,
}

impl RuleIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a rule, re-sorting its action's list by priority descending.
    pub fn insert(&mut self, rule: ActionRule) {
        let list = self.rules.entry(rule.action_name.clone()).or_default();
        list.push(rule);
        list.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Parse and compile `text`, inserting one rule per action. Returns the
    /// number of rules added.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::InvalidLaw`] when the text does not parse
    /// into a valid law; the index is left unchanged.
    pub fn add_law(
        &mut self,
        parser: &LawParser,
        name: &str,
        text: &str,
    ) -> Result<usize, CompileError> {
        let parsed = parser.parse(text);
        let rules = crate::compile::compile(&parsed, name, parser.config())?;
        let added = rules.len();
        for rule in rules {
            self.insert(rule);
        }
        Ok(added)
    }

    /// Build an index from `(name, text)` pairs, failing on the first invalid law.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError`] for the first law that does not compile.
    pub fn from_laws<'a>(
        parser: &LawParser,
        laws: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, CompileError> {
        let mut index = Self::new();
        for (name, text) in laws {
            index.add_law(parser, name, text)?;
        }
        Ok(index)
    }

    /// Default-closed permission check: no rules, or no matching rule, denies.
    #[must_use]
    pub fn check_permission(
        &self,
        subject: Option<&Subject>,
        action: &str,
        ctx: &LawContext,
    ) -> bool {
        crate::evaluate::first_match(self.rules_for(action), subject, ctx).is_some_and(|r| r.allow)
    }

    /// The decision for every indexed action.
    #[must_use]
    pub fn permissions_for(
        &self,
        subject: Option<&Subject>,
        ctx: &LawContext,
    ) -> BTreeMap<String, bool> {
        self.rules
            .keys()
            .map(|action| (action.clone(), self.check_permission(subject, action, ctx)))
            .collect()
    }

    /// Permission check with diagnostics.
    pub fn explain(
        &self,
        subject: Option<&Subject>,
        action: &str,
        ctx: &LawContext,
    ) -> PermissionReport {
        crate::evaluate::evaluate_detailed(action, self.rules_for(action), subject, ctx)
    }

    /// Rules for `action` in evaluation order.
    #[must_use]
    pub fn rules_for(&self, action: &str) -> &[ActionRule] {
        self.rules.get(action).map_or(&[], Vec::as_slice)
    }

    /// Indexed action names, sorted.
    #[must_use]
    pub fn actions(&self) -> Vec<&str> {
        let mut actions: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        actions.sort_unstable();
        actions
    }

    /// Total number of rules across all actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.values().all(Vec::is_empty)
    }
}

#[cfg(feature = "binary-cache")]
impl RuleIndex {
    /// Serialize this index to a byte vector.
    ///
    /// The optional `source_text` is hashed (BLAKE3) and embedded in the
    /// payload metadata. Callers can use this to detect when the persisted
    /// laws have changed and the cache should be rebuilt.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError`](crate::serial::SerializeError) if encoding fails.
    pub fn to_bytes(
        &self,
        source_text: Option<&str>,
    ) -> Result<Vec<u8>, crate::serial::SerializeError> {
        crate::serial::encode(self, source_text)
    }

    /// Deserialize an index previously produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// Returns [`DeserializeError`](crate::serial::DeserializeError) on
    /// format or integrity failure.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, crate::serial::DeserializeError> {
        crate::serial::decode(bytes)
    }

    /// # Errors
    ///
    /// Returns [`SerializeError`](crate::serial::SerializeError) on
    /// encoding or I/O failure.
    pub fn to_binary_file(
        &self,
        path: impl AsRef<std::path::Path>,
        source_text: Option<&str>,
    ) -> Result<(), crate::serial::SerializeError> {
        let bytes = self.to_bytes(source_text)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`DeserializeError`](crate::serial::DeserializeError) on
    /// I/O, format or integrity failure.
    pub fn from_binary_file(
        path: impl AsRef<std::path::Path>,
    ) -> Result<Self, crate::serial::DeserializeError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Whether `bytes` was built from exactly `source_text`. Blobs written
    /// without a digest are never current.
    ///
    /// # Errors
    ///
    /// Returns [`DeserializeError`](crate::serial::DeserializeError) on
    /// format or integrity failure.
    pub fn is_current(
        bytes: &[u8],
        source_text: &str,
    ) -> Result<bool, crate::serial::DeserializeError> {
        let stored = crate::serial::stored_digest(bytes)?;
        Ok(stored == Some(crate::serial::source_digest(source_text)))
    }
}

impl fmt::Display for RuleIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RuleIndex({} actions, {} rules)",
            self.rules.len(),
            self.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Condition, SubjectKind};

    fn rule(action: &str, allow: bool, source: &str) -> ActionRule {
        ActionRule {
            action_name: action.into(),
            subject_type: "Пользователь".into(),
            subject_kind: SubjectKind::Ordinary,
            conditions: vec![],
            allow,
            priority: u32::from(!allow),
            source_law: source.into(),
        }
    }

    #[test]
    fn insert_keeps_priority_order_stable() {
        let mut index = RuleIndex::new();
        index.insert(rule("vote", true, "a"));
        index.insert(rule("vote", false, "b"));
        index.insert(rule("vote", true, "c"));
        index.insert(rule("vote", false, "d"));
        let order: Vec<&str> = index
            .rules_for("vote")
            .iter()
            .map(|r| r.source_law.as_str())
            .collect();
        assert_eq!(order, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn unknown_action_denies() {
        let index = RuleIndex::new();
        let user = Subject::new(1, "a");
        assert!(!index.check_permission(Some(&user), "vote", &LawContext::default()));
        assert!(index.rules_for("vote").is_empty());
    }

    #[test]
    fn party_member_scenario() {
        let parser = LawParser::default();
        let mut index = RuleIndex::new();
        let added = index
            .add_law(&parser, "voting", "Пользователь член партии голосовать")
            .unwrap();
        assert_eq!(added, 1);

        let ctx = LawContext::default();
        let loner = Subject::new(1, "a");
        let member = Subject::new(2, "b").with_party(5, "Green");
        assert!(!index.check_permission(Some(&loner), "vote", &ctx));
        assert!(index.check_permission(Some(&member), "vote", &ctx));
        assert!(!index.check_permission(None, "vote", &ctx));
    }

    #[test]
    fn denial_beats_allowance_in_either_order() {
        let parser = LawParser::default();
        let laws = [
            ("allow", "Пользователь голосовать"),
            ("deny", "Пользователь не голосовать"),
        ];
        let user = Subject::new(1, "a");
        let ctx = LawContext::default();

        let forward = RuleIndex::from_laws(&parser, laws).unwrap();
        let reversed = RuleIndex::from_laws(&parser, laws.into_iter().rev()).unwrap();
        assert!(!forward.check_permission(Some(&user), "vote", &ctx));
        assert!(!reversed.check_permission(Some(&user), "vote", &ctx));
    }

    #[test]
    fn invalid_law_leaves_index_unchanged() {
        let parser = LawParser::default();
        let mut index = RuleIndex::new();
        assert!(index.add_law(&parser, "bad", "голосовать").is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn permissions_listing_and_explain() {
        let parser = LawParser::default();
        let index = RuleIndex::from_laws(
            &parser,
            [
                ("a", "Пользователь голосовать"),
                ("b", "Правитель создавать законы"),
            ],
        )
        .unwrap();
        let user = Subject::new(1, "a");
        let ctx = LawContext::default();

        let perms = index.permissions_for(Some(&user), &ctx);
        assert_eq!(perms.get("vote"), Some(&true));
        assert_eq!(perms.get("create_law"), Some(&false));
        assert_eq!(index.actions(), vec!["create_law", "vote"]);

        let report = index.explain(Some(&user), "create_law", &ctx);
        assert!(!report.allowed());
        assert!(report.matched_rule().is_none());
        assert_eq!(report.rules_total(), 1);
    }

    #[test]
    fn display() {
        let mut index = RuleIndex::new();
        index.insert(rule("vote", true, "a"));
        let mut with_condition = rule("vote", false, "b");
        with_condition.conditions.push(Condition::HasParty(false));
        index.insert(with_condition);
        assert_eq!(index.to_string(), "RuleIndex(1 actions, 2 rules)");
        assert_eq!(index.len(), 2);
    }
}
