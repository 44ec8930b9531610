//! The capability object scripts see as `api`, and the host data seam behind it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::builtins::bind;
use super::error::{DataError, RuntimeError};
use super::format::to_str;
use super::value::{Dict, Val};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub party_id: Option<i64>,
    /// Registration date.
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyRecord {
    pub id: i64,
    pub name: String,
    /// Member count.
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub leader_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernmentRecord {
    pub form: String,
    #[serde(default)]
    pub leader_id: Option<i64>,
    #[serde(default)]
    pub description: String,
}

impl Default for GovernmentRecord {
    fn default() -> Self {
        Self {
            form: "democracy".to_owned(),
            leader_id: None,
            description: String::new(),
        }
    }
}

/// Read access to the host's domain records.
///
/// Implementations are shared across threads; each execution makes its own
/// calls and nothing is cached between executions.
pub trait DataSource: Send + Sync {
    fn user(&self, id: i64) -> Result<Option<UserRecord>, DataError>;

    fn party(&self, id: i64) -> Result<Option<PartyRecord>, DataError>;

    /// Count users whose fields equal every `(field, value)` pair. Pairs that
    /// name no user field are ignored.
    fn count_users_where(&self, filters: &[(String, Json)]) -> Result<u64, DataError>;

    /// `None` when no government is configured.
    fn government(&self) -> Result<Option<GovernmentRecord>, DataError>;
}

/// A [`DataSource`] over in-memory tables, for tests and embedded hosts.
#[derive(Debug, Clone, Default)]
pub struct InMemoryData {
    users: BTreeMap<i64, UserRecord>,
    parties: BTreeMap<i64, PartyRecord>,
    government: Option<GovernmentRecord>,
}

impl InMemoryData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(mut self, user: UserRecord) -> Self {
        self.users.insert(user.id, user);
        self
    }

    #[must_use]
    pub fn with_party(mut self, party: PartyRecord) -> Self {
        self.parties.insert(party.id, party);
        self
    }

    #[must_use]
    pub fn with_government(mut self, government: GovernmentRecord) -> Self {
        self.government = Some(government);
        self
    }
}

impl DataSource for InMemoryData {
    fn user(&self, id: i64) -> Result<Option<UserRecord>, DataError> {
        Ok(self.users.get(&id).cloned())
    }

    fn party(&self, id: i64) -> Result<Option<PartyRecord>, DataError> {
        Ok(self.parties.get(&id).cloned())
    }

    fn count_users_where(&self, filters: &[(String, Json)]) -> Result<u64, DataError> {
        let mut count = 0;
        for user in self.users.values() {
            let Json::Object(fields) =
                serde_json::to_value(user).map_err(|e| DataError::new(e.to_string()))?
            else {
                continue;
            };
            let matches = filters
                .iter()
                .all(|(field, wanted)| fields.get(field).map_or(true, |actual| actual == wanted));
            if matches {
                count += 1;
            }
        }
        Ok(count)
    }

    fn government(&self) -> Result<Option<GovernmentRecord>, DataError> {
        Ok(self.government.clone())
    }
}

fn record(fields: Vec<(&str, Val)>) -> Val {
    let mut dict = Dict::new();
    for (name, value) in fields {
        // String keys always hash.
        let _ = dict.insert(Val::str(name), value);
    }
    Val::dict(dict)
}

fn optional_id(id: Option<i64>) -> Val {
    id.map_or(Val::None, Val::Int)
}

/// Per-execution state behind the `api` global.
pub(crate) struct LawApi {
    data: Arc<dyn DataSource>,
    context_user: Option<i64>,
    users: HashMap<i64, Val>,
    logs: Vec<String>,
}

impl LawApi {
    pub(crate) const METHODS: &'static [&'static str] = &[
        "get_user",
        "get_party",
        "count_users_where",
        "get_government",
        "log_action",
    ];

    pub(crate) fn new(data: Arc<dyn DataSource>, context_user: Option<i64>) -> Self {
        Self {
            data,
            context_user,
            users: HashMap::new(),
            logs: Vec::new(),
        }
    }

    pub(crate) fn into_logs(self) -> Vec<String> {
        self.logs
    }

    pub(crate) fn call(
        &mut self,
        name: &'static str,
        args: Vec<Val>,
        kwargs: Vec<(String, Val)>,
    ) -> Result<Val, RuntimeError> {
        match name {
            "get_user" => {
                let slots = bind(name, &["user_id"], 0, args, kwargs)?;
                let id = match &slots[0] {
                    Some(Val::None) | None => self.context_user,
                    Some(v) => Some(v.expect_int("user_id")?),
                };
                match id {
                    Some(id) => self.user(id),
                    None => Ok(Val::None),
                }
            }
            "get_party" => {
                let slots = bind(name, &["party_id"], 1, args, kwargs)?;
                let id = match &slots[0] {
                    Some(Val::None) | None => return Ok(Val::None),
                    Some(v) => v.expect_int("party_id")?,
                };
                Ok(match self.data.party(id)? {
                    Some(party) => record(vec![
                        ("id", Val::Int(party.id)),
                        ("name", Val::str(party.name)),
                        ("count", Val::Int(party.count)),
                        ("leader_id", optional_id(party.leader_id)),
                    ]),
                    None => Val::None,
                })
            }
            "count_users_where" => {
                if !args.is_empty() {
                    return Err(RuntimeError::Type(
                        "count_users_where() takes keyword arguments only".to_owned(),
                    ));
                }
                let filters = kwargs
                    .into_iter()
                    .map(|(field, value)| Ok((field, value.to_json()?)))
                    .collect::<Result<Vec<_>, RuntimeError>>()?;
                let count = self.data.count_users_where(&filters)?;
                Ok(Val::Int(i64::try_from(count).map_err(|_| RuntimeError::Overflow)?))
            }
            "get_government" => {
                bind(name, &[], 0, args, kwargs)?;
                let government = self.data.government()?.unwrap_or_default();
                Ok(record(vec![
                    ("form", Val::str(government.form)),
                    ("leader_id", optional_id(government.leader_id)),
                    ("description", Val::str(government.description)),
                ]))
            }
            "log_action" => {
                let mut slots = bind(name, &["action", "details"], 1, args, kwargs)?;
                let action = slots[0].take().map(|v| to_str(&v)).unwrap_or_default();
                let details = slots[1].take().map(|v| to_str(&v)).unwrap_or_default();
                tracing::info!(target: "statute::law", action = %action, details = %details, "law action");
                self.logs.push(if details.is_empty() {
                    action
                } else {
                    format!("{action} - {details}")
                });
                Ok(Val::None)
            }
            other => Err(RuntimeError::Attribute {
                type_name: "LawApi".to_owned(),
                attr: other.to_owned(),
            }),
        }
    }

    /// Users are fetched once per execution; repeated lookups share one dict
    /// and a missing user is not looked up twice.
    fn user(&mut self, id: i64) -> Result<Val, RuntimeError> {
        if let Some(cached) = self.users.get(&id) {
            return Ok(cached.clone());
        }
        let Some(user) = self.data.user(id)? else {
            self.users.insert(id, Val::None);
            return Ok(Val::None);
        };
        let value = record(vec![
            ("id", Val::Int(user.id)),
            ("username", Val::str(user.username)),
            ("party_id", optional_id(user.party_id)),
            ("date", Val::DateTime(user.date.naive_utc())),
            ("admin", Val::Bool(user.admin)),
        ]);
        self.users.insert(id, value.clone());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn data() -> InMemoryData {
        let date = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        InMemoryData::new()
            .with_user(UserRecord {
                id: 1,
                username: "ivan".into(),
                party_id: Some(7),
                date,
                admin: false,
            })
            .with_user(UserRecord {
                id: 2,
                username: "olga".into(),
                party_id: Some(7),
                date,
                admin: true,
            })
            .with_user(UserRecord {
                id: 3,
                username: "petr".into(),
                party_id: None,
                date,
                admin: false,
            })
    }

    #[test]
    fn counts_ignore_unknown_fields() {
        let data = data();
        assert_eq!(
            data.count_users_where(&[("party_id".into(), json!(7))]).unwrap(),
            2
        );
        assert_eq!(
            data.count_users_where(&[
                ("party_id".into(), json!(7)),
                ("admin".into(), json!(true)),
                ("shoe_size".into(), json!(44)),
            ])
            .unwrap(),
            1
        );
        assert_eq!(data.count_users_where(&[]).unwrap(), 3);
    }

    #[test]
    fn get_user_defaults_to_context_user_and_memoizes() {
        let mut api = LawApi::new(Arc::new(data()), Some(2));
        let first = api.call("get_user", vec![], vec![]).unwrap();
        let second = api.call("get_user", vec![Val::Int(2)], vec![]).unwrap();
        match (&first, &second) {
            (Val::Dict(a), Val::Dict(b)) => assert!(Rc::ptr_eq(a, b)),
            _ => panic!("expected user dicts"),
        }
        assert!(matches!(
            api.call("get_user", vec![Val::Int(99)], vec![]).unwrap(),
            Val::None
        ));
    }

    #[test]
    fn government_defaults_to_democracy() {
        let mut api = LawApi::new(Arc::new(InMemoryData::new()), None);
        let Val::Dict(gov) = api.call("get_government", vec![], vec![]).unwrap() else {
            panic!("expected dict");
        };
        let form = gov.borrow().get(&Val::str("form")).unwrap().cloned();
        assert!(matches!(form, Some(Val::Str(s)) if &*s == "democracy"));
    }

    #[test]
    fn log_action_formats_details() {
        let mut api = LawApi::new(Arc::new(InMemoryData::new()), None);
        api.call("log_action", vec![Val::str("vote")], vec![]).unwrap();
        api.call(
            "log_action",
            vec![Val::str("ban")],
            vec![("details".into(), Val::Int(3))],
        )
        .unwrap();
        assert_eq!(api.into_logs(), vec!["vote", "ban - 3"]);
    }

    #[test]
    fn unknown_methods_are_attribute_errors() {
        let mut api = LawApi::new(Arc::new(InMemoryData::new()), None);
        let err = api.call("delete_user", vec![Val::Int(1)], vec![]).unwrap_err();
        assert_eq!(err.to_string(), "'LawApi' object has no attribute 'delete_user'");
    }

    #[derive(Default)]
    struct CountingData {
        user_calls: std::sync::atomic::AtomicUsize,
    }

    impl DataSource for CountingData {
        fn user(&self, _id: i64) -> Result<Option<UserRecord>, DataError> {
            self.user_calls
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Ok(None)
        }

        fn party(&self, _id: i64) -> Result<Option<PartyRecord>, DataError> {
            Ok(None)
        }

        fn count_users_where(&self, _filters: &[(String, Json)]) -> Result<u64, DataError> {
            Ok(0)
        }

        fn government(&self) -> Result<Option<GovernmentRecord>, DataError> {
            Ok(None)
        }
    }

    #[test]
    fn missing_users_are_cached_too() {
        let data = Arc::new(CountingData::default());
        let mut api = LawApi::new(Arc::clone(&data) as Arc<dyn DataSource>, Some(42));
        for _ in 0..3 {
            assert!(matches!(api.call("get_user", vec![], vec![]).unwrap(), Val::None));
        }
        assert_eq!(
            data.user_calls.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }
}
