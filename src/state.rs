use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Flow-owned key/value data carried by a session between steps.
pub type SessionData = HashMap<String, StateValue>;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(untagged)]
pub enum StateValue {
    String(String),
    Number(f64),
    Boolean(bool),
    List(Vec<StateValue>),
    Map(HashMap<String, StateValue>),
    Null,
}

impl StateValue {
    pub fn as_str(&self) -> Option<&str> {
        if let StateValue::String(s) = self {
            Some(s)
        } else {
            None
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        if let StateValue::Number(n) = self {
            Some(*n)
        } else {
            None
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        if let StateValue::Boolean(b) = self {
            Some(*b)
        } else {
            None
        }
    }

    pub fn as_list(&self) -> Option<&Vec<StateValue>> {
        if let StateValue::List(l) = self {
            Some(l)
        } else {
            None
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, StateValue>> {
        if let StateValue::Map(m) = self {
            Some(m)
        } else {
            None
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            StateValue::String(s) => json!(s),
            StateValue::Number(n) => json!(n),
            StateValue::Boolean(b) => json!(b),
            StateValue::List(l) => json!(l.iter().map(|v| v.to_json()).collect::<Vec<_>>()),
            StateValue::Map(m) => {
                json!(m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect::<HashMap<_, _>>())
            }
            StateValue::Null => Value::Null,
        }
    }
}

impl TryFrom<Value> for StateValue {
    type Error = ();

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) => Ok(StateValue::String(s)),
            Value::Number(n) => Ok(StateValue::Number(n.as_f64().ok_or(())?)),
            Value::Bool(b) => Ok(StateValue::Boolean(b)),
            Value::Array(a) => Ok(StateValue::List(
                a.into_iter().filter_map(|v| StateValue::try_from(v).ok()).collect(),
            )),
            Value::Object(o) => Ok(StateValue::Map(
                o.into_iter()
                    .filter_map(|(k, v)| Some((k, StateValue::try_from(v).ok()?)))
                    .collect(),
            )),
            Value::Null => Ok(StateValue::Null),
        }
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::String(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::String(value)
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        StateValue::Number(value)
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Number(value as f64)
    }
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Boolean(value)
    }
}

/// Shallow merge: keys in `patch` overwrite keys in `target`, nested maps are
/// replaced wholesale.
pub fn merge_data(target: &mut SessionData, patch: SessionData) {
    for (key, value) in patch {
        target.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_value_accessors() {
        let string = StateValue::String("hello".into());
        assert_eq!(string.as_str(), Some("hello"));
        assert_eq!(string.as_number(), None);

        let number = StateValue::Number(42.0);
        assert_eq!(number.as_number(), Some(42.0));
        assert_eq!(number.as_str(), None);

        let boolean = StateValue::Boolean(true);
        assert_eq!(boolean.as_bool(), Some(true));

        let list = StateValue::List(vec![StateValue::Null]);
        assert!(list.as_list().is_some());

        let mut map_data = HashMap::new();
        map_data.insert("k".into(), StateValue::Null);
        let map = StateValue::Map(map_data.clone());
        assert_eq!(map.as_map(), Some(&map_data));

        assert_eq!(StateValue::Null.as_str(), None);
    }

    #[test]
    fn test_merge_overwrites_and_adds() {
        let mut data: SessionData = HashMap::new();
        data.insert("a".into(), 1i64.into());
        data.insert("b".into(), 2i64.into());

        let mut patch: SessionData = HashMap::new();
        patch.insert("b".into(), 3i64.into());
        patch.insert("c".into(), 4i64.into());

        merge_data(&mut data, patch);

        assert_eq!(data.len(), 3);
        assert_eq!(data["a"], StateValue::Number(1.0));
        assert_eq!(data["b"], StateValue::Number(3.0));
        assert_eq!(data["c"], StateValue::Number(4.0));
    }

    #[test]
    fn test_merge_is_shallow() {
        let mut inner = HashMap::new();
        inner.insert("name".to_string(), StateValue::from("Ada"));
        inner.insert("email".to_string(), StateValue::from("ada@example.com"));
        let mut data: SessionData = HashMap::new();
        data.insert("form".into(), StateValue::Map(inner));

        let mut replacement = HashMap::new();
        replacement.insert("name".to_string(), StateValue::from("Grace"));
        let mut patch: SessionData = HashMap::new();
        patch.insert("form".into(), StateValue::Map(replacement));

        merge_data(&mut data, patch);

        let form = data["form"].as_map().unwrap();
        assert_eq!(form.len(), 1);
        assert_eq!(form["name"], StateValue::from("Grace"));
    }

    #[test]
    fn test_json_round_trip_of_nested_value() {
        let value = json!({"rating": "good", "score": 4, "tags": ["fast", true]});
        let state = StateValue::try_from(value.clone()).unwrap();
        assert_eq!(state.to_json(), json!({"rating": "good", "score": 4.0, "tags": ["fast", true]}));
    }
}
