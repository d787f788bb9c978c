use std::{error::Error, fs::File, io::BufReader, path::Path};

use log::debug;
use picodeploy_core::ConfigDocument;
use serde_json::Value;

/// Loads the config document from `path` and applies `key=value` overrides
/// on top. Returns `None` when neither is given.
pub fn load_config(
    path: Option<&Path>,
    overrides: &[String],
) -> Result<Option<ConfigDocument>, Box<dyn Error>> {
    if path.is_none() && overrides.is_empty() {
        return Ok(None);
    }

    let mut document = match path {
        Some(path) => {
            let reader = BufReader::new(File::open(path)?);
            match serde_json::from_reader::<_, Value>(reader)? {
                Value::Object(document) => document,
                _ => {
                    return Err(format!("{} must contain a JSON object", path.display()).into());
                }
            }
        }
        None => ConfigDocument::new(),
    };

    for entry in overrides {
        let (key, value) = parse_override(entry)?;
        debug!("Config override {} = {}", key, value);
        document.insert(key, value);
    }

    Ok(Some(document))
}

/// `key=value`, where the value is JSON if it parses as such and a plain
/// string otherwise.
fn parse_override(entry: &str) -> Result<(String, Value), String> {
    let (key, value) = entry
        .split_once('=')
        .ok_or_else(|| format!("Expected key=value, got '{}'", entry))?;

    let key = key.trim();
    if key.is_empty() {
        return Err(format!("Missing key in '{}'", entry));
    }

    let value =
        serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn nothing_given() {
        assert_eq!(load_config(None, &[]).unwrap(), None);
    }

    #[test]
    fn file_with_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("default.json");
        fs::write(&path, r#"{ "device_name": "Pad", "led_brightness": 10 }"#).unwrap();

        let overrides = vec![
            "led_brightness=128".to_string(),
            "device_name=BGG Guitar Controller".to_string(),
            r#"button_mapping={"green":2}"#.to_string(),
        ];
        let document = load_config(Some(&path), &overrides).unwrap().unwrap();

        assert_eq!(
            Value::Object(document),
            json!({
                "device_name": "BGG Guitar Controller",
                "led_brightness": 128,
                "button_mapping": { "green": 2 }
            })
        );
    }

    #[test]
    fn rejects_non_object() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("list.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        assert!(load_config(Some(&path), &[]).is_err());
    }

    #[test]
    fn bad_override() {
        assert!(parse_override("no-equals").is_err());
        assert!(parse_override("=5").is_err());
        assert_eq!(
            parse_override("enabled=true").unwrap(),
            ("enabled".to_string(), Value::Bool(true))
        );
    }
}
