//! Configuration sources and loading.
//!
//! Two textual formats are accepted: JSON documents and a nested
//! `key = value` format with dotted keys. All sources flatten into
//! serde values and merge in order: defaults, files (alphabetical),
//! flags, overrides.

use {
	super::{merge::merge, raw::RawConfig},
	crate::Error,
	core::time::Duration,
	serde_json::Value,
	std::path::{Path, PathBuf},
};

/// Environment variable that may supply the auto-config intro token.
pub const INTRO_TOKEN_ENV: &str = "MERIDIAN_INTRO_TOKEN";

/// One configuration source, merged in order.
#[derive(Debug, Clone)]
pub enum Source {
	/// A config file; JSON when the extension is `.json`, the nested
	/// key/value format otherwise.
	File(PathBuf),

	/// Pre-parsed values from the command line.
	Flags(Value),

	/// Programmatic overrides, applied last.
	Override(Value),
}

/// Loads and merges all sources into the raw config. File sources given
/// as directories expand to their contained config files in alphabetical
/// order.
pub fn load(sources: &[Source]) -> Result<RawConfig, Error> {
	let mut merged = Value::Object(serde_json::Map::new());

	for source in sources {
		match source {
			Source::File(path) => {
				for file in expand(path)? {
					let value = parse_file(&file)?;
					merge(&mut merged, value);
				}
			}
			Source::Flags(value) | Source::Override(value) => {
				merge(&mut merged, value.clone());
			}
		}
	}

	let mut raw: RawConfig =
		serde_json::from_value(merged).map_err(|e| {
			Error::Config(format!("invalid configuration: {e}"))
		})?;

	apply_intro_token_env(&mut raw);
	Ok(raw)
}

/// A directory source expands to its `.json` and `.conf` files sorted by
/// name; a file source is itself.
fn expand(path: &Path) -> Result<Vec<PathBuf>, Error> {
	if path.is_file() {
		return Ok(vec![path.to_path_buf()]);
	}
	if !path.is_dir() {
		return Err(Error::Config(format!(
			"config path {path:?} does not exist"
		)));
	}

	let mut files = Vec::new();
	let entries = std::fs::read_dir(path).map_err(|e| {
		Error::Config(format!("cannot read config dir {path:?}: {e}"))
	})?;
	for entry in entries {
		let entry = entry.map_err(|e| {
			Error::Config(format!("cannot read config dir {path:?}: {e}"))
		})?;
		let file = entry.path();
		let ext = file.extension().and_then(|e| e.to_str());
		if matches!(ext, Some("json") | Some("conf")) {
			files.push(file);
		}
	}

	files.sort();
	Ok(files)
}

fn parse_file(path: &Path) -> Result<Value, Error> {
	let raw = std::fs::read_to_string(path).map_err(|e| {
		Error::Config(format!("cannot read config file {path:?}: {e}"))
	})?;

	let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
	if is_json {
		serde_json::from_str(&raw).map_err(|e| {
			Error::Config(format!("invalid JSON in {path:?}: {e}"))
		})
	} else {
		parse_kv(&raw).map_err(|e| {
			Error::Config(format!("invalid config in {path:?}: {e}"))
		})
	}
}

/// The nested key/value format: one `dotted.key = value` per line, `#`
/// comments, values as JSON scalars or bare strings.
///
/// ```text
/// datacenter   = "east"
/// server       = true
/// ports.http   = 8500
/// retry_join   = ["id@10.0.0.1:8301"]
/// ```
pub fn parse_kv(input: &str) -> Result<Value, String> {
	let mut root = Value::Object(serde_json::Map::new());

	for (line_no, line) in input.lines().enumerate() {
		let line = line.trim();
		if line.is_empty() || line.starts_with('#') {
			continue;
		}

		let Some((key, value)) = line.split_once('=') else {
			return Err(format!("line {}: missing '='", line_no + 1));
		};
		let key = key.trim();
		let value = value.trim();

		// JSON scalar/array first; anything unparsable is a bare string
		let value: Value = serde_json::from_str(value)
			.unwrap_or_else(|_| Value::String(value.to_string()));

		let mut slot = &mut root;
		let segments: Vec<&str> = key.split('.').collect();
		for (i, segment) in segments.iter().enumerate() {
			let map = slot.as_object_mut().ok_or_else(|| {
				format!("line {}: key {key:?} conflicts", line_no + 1)
			})?;

			if i == segments.len() - 1 {
				map.insert(segment.to_string(), value);
				break;
			}
			slot = map
				.entry(segment.to_string())
				.or_insert_with(|| Value::Object(serde_json::Map::new()));
		}
	}

	Ok(root)
}

/// The intro token may arrive via the environment; explicit file or flag
/// values take precedence with a warning.
fn apply_intro_token_env(raw: &mut RawConfig) {
	let Ok(token) = std::env::var(INTRO_TOKEN_ENV) else {
		return;
	};
	if token.is_empty() {
		return;
	}

	if raw.auto_config.intro_token.is_some() {
		tracing::warn!(
			"both {INTRO_TOKEN_ENV} and an explicit intro token are set; \
			 using the explicit value",
		);
		return;
	}
	raw.auto_config.intro_token = Some(token);
}

/// Parses a human duration: bare integers are milliseconds, suffixes
/// `ms`, `s`, `m`, `h` scale.
pub fn parse_duration(input: &str) -> Result<Duration, Error> {
	let input = input.trim();
	let bad =
		|| Error::Config(format!("invalid duration {input:?}"));

	let (number, unit) = match input.find(|c: char| c.is_ascii_alphabetic())
	{
		Some(at) => input.split_at(at),
		None => (input, "ms"),
	};

	let number: f64 = number.trim().parse().map_err(|_| bad())?;
	if !number.is_finite() || number < 0.0 {
		return Err(bad());
	}

	let millis = match unit {
		"ms" => number,
		"s" => number * 1000.0,
		"m" => number * 60.0 * 1000.0,
		"h" => number * 3600.0 * 1000.0,
		_ => return Err(bad()),
	};

	Ok(Duration::from_millis(millis as u64))
}

#[cfg(test)]
mod tests {
	use {super::*, serde_json::json};

	#[test]
	fn kv_format_round_trips_through_the_raw_layer() {
		let parsed = parse_kv(
			r#"
			# agent identity
			datacenter = "east"
			server = true
			bootstrap_expect = 3
			ports.serf_lan = 8301
			retry_join = ["peer-a", "peer-b"]
			acl.enabled = true
			"#,
		)
		.unwrap();

		let raw: RawConfig = serde_json::from_value(parsed).unwrap();
		assert_eq!(raw.datacenter.as_deref(), Some("east"));
		assert_eq!(raw.server, Some(true));
		assert_eq!(raw.bootstrap_expect, Some(3));
		assert_eq!(raw.ports.serf_lan, Some(8301));
		assert_eq!(raw.retry_join, vec!["peer-a", "peer-b"]);
		assert_eq!(raw.acl.enabled, Some(true));
	}

	#[test]
	fn files_merge_with_later_sources_winning_scalars() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(
			dir.path().join("a.json"),
			r#"{"datacenter": "dc1", "retry_join": ["x"]}"#,
		)
		.unwrap();
		std::fs::write(
			dir.path().join("b.conf"),
			"datacenter = \"dc2\"\nretry_join = [\"y\"]\n",
		)
		.unwrap();

		let raw = load(&[
			Source::File(dir.path().to_path_buf()),
			Source::Flags(json!({"node_name": "n1"})),
		])
		.unwrap();

		// files merge alphabetically, so the .conf (b) wins the scalar
		assert_eq!(raw.datacenter.as_deref(), Some("dc2"));
		// sequences concatenate across sources
		assert_eq!(raw.retry_join, vec!["x", "y"]);
		assert_eq!(raw.node_name.as_deref(), Some("n1"));
	}

	#[test]
	fn unknown_fields_are_rejected() {
		let result = load(&[Source::Override(json!({"no_such_field": 1}))]);
		assert!(matches!(result, Err(Error::Config(_))));
	}

	#[test]
	fn durations_parse_with_suffixes() {
		assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
		assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
		assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
		assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
		assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
		assert!(parse_duration("5 parsecs").is_err());
		assert!(parse_duration("-3s").is_err());
	}
}
