//! Matrix expansion for job strategies

use crate::core::config::scalar_to_string;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// Values assigned to each axis for one matrix combination
pub type MatrixValues = IndexMap<String, String>;

/// Matrix definition of a job strategy
///
/// Axes keep their declaration order so expanded jobs come out in the order
/// the author wrote them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IndexMap<String, Value>", into = "IndexMap<String, Value>")]
pub struct MatrixConfig {
    pub axes: IndexMap<String, Vec<String>>,
    pub include: Vec<MatrixValues>,
    pub exclude: Vec<MatrixValues>,
}

/// One generated matrix combination
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixCell {
    pub index: usize,
    pub values: MatrixValues,
}

impl MatrixCell {
    /// Comma-separated values, used to label jobs (`build (3.8)`)
    pub fn label(&self) -> String {
        self.values
            .values()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Check whether the cell agrees with every given `axis=value` pair
    pub fn matches(&self, selection: &[(String, String)]) -> bool {
        selection
            .iter()
            .all(|(axis, value)| self.values.get(axis) == Some(value))
    }
}

impl MatrixConfig {
    /// Check that the matrix produces at least one combination
    pub fn validate(&self) -> Result<(), String> {
        if self.axes.is_empty() && self.include.is_empty() {
            return Err("matrix must define at least one axis".to_string());
        }

        for (axis, values) in &self.axes {
            if values.is_empty() {
                return Err(format!("matrix axis '{}' must have at least one value", axis));
            }
        }

        for entry in &self.exclude {
            for key in entry.keys() {
                if !self.axes.contains_key(key) {
                    return Err(format!("exclude references unknown axis '{}'", key));
                }
            }
        }

        if self.expand().is_empty() {
            return Err("matrix excludes every combination".to_string());
        }

        Ok(())
    }

    /// Axis names, including keys only introduced by `include`
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.axes.keys().cloned().collect();
        for entry in &self.include {
            for key in entry.keys() {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }
        keys
    }

    /// Generate every combination: cartesian product, minus `exclude`,
    /// then `include` entries merged or appended
    pub fn expand(&self) -> Vec<MatrixCell> {
        let mut combinations: Vec<MatrixValues> = if self.axes.is_empty() {
            Vec::new()
        } else {
            vec![MatrixValues::new()]
        };

        for (axis, values) in &self.axes {
            combinations = combinations
                .into_iter()
                .flat_map(|combo| {
                    values.iter().map(move |value| {
                        let mut next = combo.clone();
                        next.insert(axis.clone(), value.clone());
                        next
                    })
                })
                .collect();
        }

        combinations.retain(|combo| {
            !self
                .exclude
                .iter()
                .any(|entry| entry.iter().all(|(k, v)| combo.get(k) == Some(v)))
        });

        let original = combinations.len();
        for entry in &self.include {
            let mut merged = false;
            for combo in combinations.iter_mut().take(original) {
                let agrees = entry
                    .iter()
                    .filter(|(k, _)| self.axes.contains_key(*k))
                    .all(|(k, v)| combo.get(k) == Some(v));
                if agrees {
                    for (k, v) in entry {
                        if !self.axes.contains_key(k) {
                            combo.insert(k.clone(), v.clone());
                        }
                    }
                    merged = true;
                }
            }
            if !merged {
                combinations.push(entry.clone());
            }
        }

        combinations
            .into_iter()
            .enumerate()
            .map(|(index, values)| MatrixCell { index, values })
            .collect()
    }
}

impl TryFrom<IndexMap<String, Value>> for MatrixConfig {
    type Error = String;

    fn try_from(raw: IndexMap<String, Value>) -> Result<Self, Self::Error> {
        let mut config = MatrixConfig::default();

        for (key, value) in raw {
            match key.as_str() {
                "include" => config.include = value_entries(&key, &value)?,
                "exclude" => config.exclude = value_entries(&key, &value)?,
                _ => {
                    let items = value
                        .as_sequence()
                        .ok_or_else(|| format!("matrix axis '{}' must be a list", key))?;
                    let values = items
                        .iter()
                        .map(|item| {
                            scalar_to_string(item)
                                .ok_or_else(|| format!("matrix axis '{}' values must be scalars", key))
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    config.axes.insert(key, values);
                }
            }
        }

        Ok(config)
    }
}

impl From<MatrixConfig> for IndexMap<String, Value> {
    fn from(config: MatrixConfig) -> Self {
        let mut raw = IndexMap::new();
        for (axis, values) in config.axes {
            raw.insert(
                axis,
                Value::Sequence(values.into_iter().map(Value::String).collect()),
            );
        }
        if !config.include.is_empty() {
            raw.insert("include".to_string(), entries_value(config.include));
        }
        if !config.exclude.is_empty() {
            raw.insert("exclude".to_string(), entries_value(config.exclude));
        }
        raw
    }
}

fn value_entries(key: &str, value: &Value) -> Result<Vec<MatrixValues>, String> {
    let items = value
        .as_sequence()
        .ok_or_else(|| format!("matrix '{}' must be a list", key))?;

    items
        .iter()
        .map(|item| {
            let map = item
                .as_mapping()
                .ok_or_else(|| format!("matrix '{}' entries must be mappings", key))?;
            map.iter()
                .map(|(k, v)| {
                    let k = k
                        .as_str()
                        .ok_or_else(|| format!("matrix '{}' keys must be strings", key))?;
                    let v = scalar_to_string(v)
                        .ok_or_else(|| format!("matrix '{}' values must be scalars", key))?;
                    Ok((k.to_string(), v))
                })
                .collect()
        })
        .collect()
}

fn entries_value(entries: Vec<MatrixValues>) -> Value {
    Value::Sequence(
        entries
            .into_iter()
            .map(|entry| {
                Value::Mapping(
                    entry
                        .into_iter()
                        .map(|(k, v)| (Value::String(k), Value::String(v)))
                        .collect(),
                )
            })
            .collect(),
    )
}
