//! Mock response generation from Mock.js style templates.
//!
//! A template is a JSON object whose keys may carry a generation rule after a `|`:
//!
//! | key               | number            | string             | array / object          |
//! |-------------------|-------------------|--------------------|-------------------------|
//! | `name|min-max`    | integer in range  | repeated min..=max | items repeated / picked |
//! | `name|count`      | `count`           | repeated `count`   | items repeated / picked |
//! | `name|+step`      | value, then +step | unchanged          | unchanged               |
//!
//! Booleans with a rule are random. Generation is driven by a seeded RNG so a given
//! seed always produces the same document.

use once_cell::sync::Lazy;
use rand::{Rng, SeedableRng, rngs::StdRng, seq::index::sample};
use regex::Regex;
use rustc_hash::FxHashMap;
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Upper bound for how often a string, array or object rule may repeat its value
pub const MAX_REPEAT: u64 = 10_000;

static RULE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?P<min>-?\d+)-(?P<max>-?\d+)|(?P<count>\d+)|\+(?P<step>-?\d+))$")
        .expect("valid mock rule regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MockError {
    #[error("invalid template JSON: {0}")]
    Json(String),

    #[error("template must be a JSON object")]
    NotAnObject,

    #[error("invalid rule '{rule}' on field '{name}': {reason}")]
    InvalidRule {
        name: String,
        rule: String,
        reason: String,
    },

    #[error("field '{name}' is declared with conflicting rules '{first}' and '{second}'")]
    ConflictingRules {
        name: String,
        first: String,
        second: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockRule {
    Range { min: i64, max: i64 },
    Count(u64),
    Step(i64),
}

impl MockRule {
    fn parse(name: &str, rule: &str) -> Result<Self, MockError> {
        let invalid = |reason: &str| MockError::InvalidRule {
            name: name.to_owned(),
            rule: rule.to_owned(),
            reason: reason.to_owned(),
        };
        let captures = RULE
            .captures(rule)
            .ok_or_else(|| invalid("expected 'min-max', 'count' or '+step'"))?;
        let number = |group: &str| {
            captures
                .name(group)
                .map(|m| m.as_str().parse::<i64>().map_err(|_| invalid("number out of range")))
                .transpose()
        };

        if let (Some(min), Some(max)) = (number("min")?, number("max")?) {
            if min > max {
                return Err(invalid("minimum is greater than maximum"));
            }
            return Ok(Self::Range { min, max });
        }
        if let Some(count) = number("count")? {
            return u64::try_from(count)
                .map(Self::Count)
                .map_err(|_| invalid("count must not be negative"));
        }
        number("step")?
            .map(Self::Step)
            .ok_or_else(|| invalid("empty rule"))
    }

    /// Largest repetition the rule can ask for; `None` for `+step`
    fn max_repeat(self) -> Option<u64> {
        match self {
            Self::Range { max, .. } => Some(u64::try_from(max).unwrap_or(0)),
            Self::Count(count) => Some(count),
            Self::Step(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Object(Template),
    Array(Vec<Node>),
    Leaf(Value),
}

#[derive(Debug, Clone, PartialEq)]
struct Field {
    name: String,
    rule: Option<MockRule>,
    /// The rule as written, for error messages
    rule_text: Option<String>,
    value: Node,
}

/// A validated template
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    fields: Vec<Field>,
}

impl Template {
    pub fn parse(json: &str) -> Result<Self, MockError> {
        let value: Value = serde_json::from_str(json).map_err(|e| MockError::Json(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, MockError> {
        match value {
            Value::Object(map) => compile_object(map),
            _ => Err(MockError::NotAnObject),
        }
    }
}

fn compile_object(map: &Map<String, Value>) -> Result<Template, MockError> {
    let mut fields: Vec<Field> = Vec::with_capacity(map.len());
    for (key, value) in map {
        let (name, rule_text) = match key.split_once('|') {
            Some((name, rule)) => (name, Some(rule)),
            None => (key.as_str(), None),
        };
        let rule = rule_text.map(|rule| MockRule::parse(name, rule)).transpose()?;
        if let (Some(rule), Some(text)) = (rule, rule_text) {
            let repeats = matches!(value, Value::String(_) | Value::Array(_) | Value::Object(_));
            if repeats && rule.max_repeat().is_some_and(|max| max > MAX_REPEAT) {
                return Err(MockError::InvalidRule {
                    name: name.to_owned(),
                    rule: text.to_owned(),
                    reason: format!("repeat count exceeds {MAX_REPEAT}"),
                });
            }
        }

        if let Some(existing) = fields.iter().find(|field| field.name == name) {
            return Err(MockError::ConflictingRules {
                name: name.to_owned(),
                first: existing.rule_text.clone().unwrap_or_default(),
                second: rule_text.unwrap_or_default().to_owned(),
            });
        }
        fields.push(Field {
            name: name.to_owned(),
            rule,
            rule_text: rule_text.map(str::to_owned),
            value: compile_node(value)?,
        });
    }
    Ok(Template { fields })
}

fn compile_node(value: &Value) -> Result<Node, MockError> {
    Ok(match value {
        Value::Object(map) => Node::Object(compile_object(map)?),
        Value::Array(items) => Node::Array(items.iter().map(compile_node).collect::<Result<_, _>>()?),
        other => Node::Leaf(other.clone()),
    })
}

/// Seeded generator; `+step` counters persist across calls
#[derive(Debug)]
pub struct MockGenerator {
    rng: StdRng,
    counters: FxHashMap<String, Number>,
}

impl MockGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            counters: FxHashMap::default(),
        }
    }

    pub fn generate(&mut self, template: &Template) -> Value {
        self.object(template, "")
    }

    fn object(&mut self, template: &Template, path: &str) -> Value {
        let mut out = Map::new();
        for field in &template.fields {
            let path = format!("{path}.{}", field.name);
            let value = self.field(field, &path);
            out.insert(field.name.clone(), value);
        }
        Value::Object(out)
    }

    fn node(&mut self, node: &Node, path: &str) -> Value {
        match node {
            Node::Object(template) => self.object(template, path),
            Node::Array(items) => {
                let item_path = format!("{path}[]");
                Value::Array(items.iter().map(|item| self.node(item, &item_path)).collect())
            }
            Node::Leaf(value) => value.clone(),
        }
    }

    fn count(&mut self, rule: MockRule) -> usize {
        match rule {
            MockRule::Range { min, max } => {
                let drawn = self.rng.gen_range(min..=max).clamp(0, MAX_REPEAT as i64);
                usize::try_from(drawn).unwrap_or(0)
            }
            MockRule::Count(count) => usize::try_from(count.min(MAX_REPEAT)).unwrap_or(0),
            MockRule::Step(_) => 1,
        }
    }

    fn field(&mut self, field: &Field, path: &str) -> Value {
        let Some(rule) = field.rule else {
            return self.node(&field.value, path);
        };

        match (&field.value, rule) {
            (Node::Leaf(Value::Number(start)), MockRule::Step(step)) => self.step(path, start, step),
            (Node::Leaf(Value::Number(_)), MockRule::Range { min, max }) => {
                Value::from(self.rng.gen_range(min..=max))
            }
            (Node::Leaf(Value::Number(_)), MockRule::Count(count)) => Value::from(count),
            (Node::Leaf(Value::String(text)), rule @ (MockRule::Range { .. } | MockRule::Count(_))) => {
                let times = self.count(rule);
                Value::String(text.repeat(times))
            }
            (Node::Leaf(Value::Bool(value)), MockRule::Range { min, max }) => {
                let total = min as f64 + max as f64;
                let keep = if total > 0.0 {
                    (min as f64 / total).clamp(0.0, 1.0)
                } else {
                    0.5
                };
                Value::Bool(if self.rng.gen_bool(keep) { *value } else { !*value })
            }
            (Node::Leaf(Value::Bool(_)), MockRule::Count(_)) => Value::Bool(self.rng.gen_bool(0.5)),
            (Node::Array(items), rule @ (MockRule::Range { .. } | MockRule::Count(_))) => {
                let times = self.count(rule);
                let item_path = format!("{path}[]");
                let mut out = Vec::with_capacity(items.len().saturating_mul(times));
                for _ in 0..times {
                    for item in items {
                        out.push(self.node(item, &item_path));
                    }
                }
                Value::Array(out)
            }
            (Node::Object(template), rule @ (MockRule::Range { .. } | MockRule::Count(_))) => {
                let amount = self.count(rule).min(template.fields.len());
                let mut picked = sample(&mut self.rng, template.fields.len(), amount).into_vec();
                picked.sort_unstable();
                let subset = Template {
                    fields: picked
                        .into_iter()
                        .map(|i| template.fields[i].clone())
                        .collect(),
                };
                self.object(&subset, path)
            }
            (node, _) => self.node(node, path),
        }
    }

    /// First call yields `start`, each later call adds `step`
    fn step(&mut self, path: &str, start: &Number, step: i64) -> Value {
        let current = self
            .counters
            .entry(path.to_owned())
            .or_insert_with(|| start.clone());
        let value = Value::Number(current.clone());
        let next = match current.as_i64() {
            Some(n) => Number::from(n.saturating_add(step)),
            None => current
                .as_f64()
                .and_then(|f| Number::from_f64(f + step as f64))
                .unwrap_or_else(|| current.clone()),
        };
        *current = next;
        value
    }
}
