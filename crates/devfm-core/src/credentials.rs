//! Database credentials from the environment configuration file.
//!
//! Lines of the form `DB_<KEY>="value"` become `<key>` fields. When the
//! structured parse leaves `user` or `password` unset, a targeted `grep`
//! is tried for that key alone; whatever is still missing gets a default.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use devfm_platform::command::PrivilegedCommand;

use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::paths::display;
use crate::resolver::{Operation, Plan};

const KEY_PREFIX: &str = "DB_";
const DEFAULT_USER: &str = "root";
const DEFAULT_PASSWORD: &str = "";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    /// Any other `DB_*` keys, e.g. `host`, `name`
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

fn credential_line() -> Option<&'static Regex> {
    static LINE: OnceLock<Option<Regex>> = OnceLock::new();
    LINE.get_or_init(|| Regex::new(r#"(?m)^\s*(DB_\w+)\s*=\s*"([^"]*)"\s*$"#).ok())
        .as_ref()
}

/// Every `DB_<KEY>="value"` line, keyed by lower-cased `<key>`.
pub fn parse_credential_lines(content: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    let Some(re) = credential_line() else {
        return fields;
    };
    for cap in re.captures_iter(content) {
        let key = cap[1].replace(KEY_PREFIX, "").to_lowercase();
        fields.insert(key, cap[2].to_string());
    }
    fields
}

/// What `grep KEY file | cut -d'"' -f2` prints: the second `"`-delimited
/// field of every line (the whole line when it has no quote), trimmed.
pub fn second_quoted_field(output: &str) -> Option<String> {
    let cut: Vec<&str> = output
        .lines()
        .map(|line| line.split('"').nth(1).unwrap_or(line))
        .collect();
    let value = cut.join("\n").trim().to_string();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

impl Gateway {
    pub async fn credentials(&self) -> Result<Credentials, GatewayError> {
        let config = self.config();
        let file = config.credentials_path();

        if !self.fs().exists(&file) {
            if !self.fs().is_dir(&config.config_dir) {
                return Err(GatewayError::not_found(format!(
                    "Directory di configurazione non trovata: {}",
                    display(&config.config_dir)
                )));
            }
            return Err(GatewayError::not_found(format!(
                "File di credenziali non trovato: {}",
                display(&file)
            )));
        }

        let op = Operation::Read { path: &file };
        let content = match self.resolver().plan(&op) {
            Plan::Elevate(plan) => {
                self.run_elevated(&plan, "Impossibile leggere il file delle credenziali")
                    .await?
                    .raw
            }
            Plan::Direct => match self.fs().read(&file) {
                Ok(bytes) => bytes,
                Err(e) => match self.resolver().fallback(&op, &e) {
                    Some(plan) => {
                        self.run_elevated(&plan, "Impossibile leggere il file delle credenziali")
                            .await?
                            .raw
                    }
                    None => {
                        warn!("cannot read {}: {}", file.display(), e);
                        return Err(GatewayError::io(
                            "Errore nella lettura del file delle credenziali",
                            e,
                        ));
                    }
                },
            },
        };

        let mut fields = parse_credential_lines(&String::from_utf8_lossy(&content));

        if self.resolver().elevation_enabled() {
            for (key, field) in [("DB_USER", "user"), ("DB_PASSWORD", "password")] {
                if fields.contains_key(field) {
                    continue;
                }
                let grep = PrivilegedCommand::GrepKey {
                    key: key.to_string(),
                    file: file.clone(),
                };
                let result = self
                    .runner()
                    .run(&grep, true)
                    .await
                    .map_err(|e| GatewayError::exec("Errore nella ricerca della chiave", e))?;
                if !result.success() {
                    debug!("grep {} found nothing (status {})", key, result.status);
                    continue;
                }
                if let Some(value) = second_quoted_field(&result.output) {
                    fields.insert(field.to_string(), value);
                }
            }
        }

        let user = fields
            .remove("user")
            .unwrap_or_else(|| DEFAULT_USER.to_string());
        let password = fields
            .remove("password")
            .unwrap_or_else(|| DEFAULT_PASSWORD.to_string());
        Ok(Credentials {
            user,
            password,
            extra: fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lines() {
        let content = "# generated\nDB_USER=\"app\"\n  DB_PASSWORD = \"s3cr=t\"  \nDB_HOST=\"localhost\"\nOTHER=\"x\"\nDB_NAME=unquoted\n";
        let fields = parse_credential_lines(content);
        assert_eq!(fields.get("user").map(String::as_str), Some("app"));
        assert_eq!(fields.get("password").map(String::as_str), Some("s3cr=t"));
        assert_eq!(fields.get("host").map(String::as_str), Some("localhost"));
        assert!(!fields.contains_key("other"));
        assert!(!fields.contains_key("name"));
    }

    #[test]
    fn test_empty_value_is_present() {
        let fields = parse_credential_lines("DB_PASSWORD=\"\"\n");
        assert_eq!(fields.get("password").map(String::as_str), Some(""));
    }

    #[test]
    fn test_second_quoted_field() {
        assert_eq!(second_quoted_field("DB_USER='x' # \"admin\" \n").as_deref(), Some("admin"));
        assert_eq!(second_quoted_field("DB_USER=admin").as_deref(), Some("DB_USER=admin"));
        assert_eq!(second_quoted_field("DB_PASSWORD=\"\""), None);
        assert_eq!(second_quoted_field(""), None);
    }

    #[test]
    fn test_serializes_flat() {
        let creds = Credentials {
            user: "root".into(),
            password: "".into(),
            extra: BTreeMap::from([("host".to_string(), "db".to_string())]),
        };
        assert_eq!(
            serde_json::to_value(creds).unwrap(),
            serde_json::json!({"user": "root", "password": "", "host": "db"})
        );
    }
}
