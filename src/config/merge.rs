//! Data-driven merging of configuration sources.
//!
//! Sources merge in order (defaults, then files alphabetically, then
//! flags, then overrides) on the serde-value level, before any typed
//! struct exists. Each field's behavior is declared by its merge rule:
//! scalars take the last value, sequences concatenate, and mappings merge
//! recursively. The rule is derived from the value kind, with a schema of
//! per-path exceptions for fields that deviate.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
	ScalarLast,
	SequenceConcat,
	MapDeep,
}

/// Per-path exceptions to the kind-derived rule. Paths are dotted from
/// the document root.
const SCHEMA: &[(&str, MergeRule)] = &[
	// meta maps replace wholesale per key (deep merge of string maps is
	// exactly last-wins per key, listed here for clarity)
	("node_meta", MergeRule::MapDeep),
];

fn rule_for(path: &str, value: &Value) -> MergeRule {
	if let Some((_, rule)) =
		SCHEMA.iter().find(|(p, _)| *p == path)
	{
		return *rule;
	}

	match value {
		Value::Object(_) => MergeRule::MapDeep,
		Value::Array(_) => MergeRule::SequenceConcat,
		_ => MergeRule::ScalarLast,
	}
}

/// Merges `incoming` into `base` under the schema rules.
pub fn merge(base: &mut Value, incoming: Value) {
	merge_at(base, incoming, "");
}

fn merge_at(base: &mut Value, incoming: Value, path: &str) {
	match rule_for(path, &incoming) {
		MergeRule::MapDeep => {
			let (Value::Object(base_map), Value::Object(incoming_map)) =
				(&mut *base, incoming)
			else {
				// kind mismatch between sources: the later source wins
				return;
			};

			for (key, value) in incoming_map {
				let child_path = if path.is_empty() {
					key.clone()
				} else {
					format!("{path}.{key}")
				};

				match base_map.get_mut(&key) {
					Some(existing) => {
						merge_at(existing, value, &child_path);
					}
					None => {
						base_map.insert(key, value);
					}
				}
			}
		}

		MergeRule::SequenceConcat => {
			match (&mut *base, incoming) {
				(Value::Array(base_seq), Value::Array(incoming_seq)) => {
					base_seq.extend(incoming_seq);
				}
				(base_slot, incoming) => *base_slot = incoming,
			}
		}

		MergeRule::ScalarLast => *base = incoming,
	}
}

#[cfg(test)]
mod tests {
	use {super::*, serde_json::json};

	#[test]
	fn scalars_last_win() {
		let mut base = json!({"datacenter": "dc1", "server": false});
		merge(&mut base, json!({"server": true}));

		assert_eq!(base["datacenter"], "dc1");
		assert_eq!(base["server"], true);
	}

	#[test]
	fn sequences_concatenate() {
		let mut base = json!({"retry_join": ["a"]});
		merge(&mut base, json!({"retry_join": ["b", "c"]}));

		assert_eq!(base["retry_join"], json!(["a", "b", "c"]));
	}

	#[test]
	fn mappings_merge_deeply() {
		let mut base = json!({
			"ports": {"http": 8500, "dns": 8600},
			"acl": {"tokens": {"agent": "a"}},
		});
		merge(&mut base, json!({
			"ports": {"http": 9500},
			"acl": {"enabled": true},
		}));

		assert_eq!(base["ports"]["http"], 9500);
		assert_eq!(base["ports"]["dns"], 8600);
		assert_eq!(base["acl"]["enabled"], true);
		assert_eq!(base["acl"]["tokens"]["agent"], "a");
	}

	#[test]
	fn merging_is_associative_on_disjoint_keys() {
		let a = json!({"datacenter": "dc1"});
		let b = json!({"node_name": "n1"});
		let c = json!({"ports": {"http": 1}});

		// (a ⊕ b) ⊕ c
		let mut left = a.clone();
		merge(&mut left, b.clone());
		merge(&mut left, c.clone());

		// a ⊕ (b ⊕ c)
		let mut bc = b;
		merge(&mut bc, c);
		let mut right = a;
		merge(&mut right, bc);

		assert_eq!(left, right);
	}
}
